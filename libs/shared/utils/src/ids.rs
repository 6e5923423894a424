/// Normalise a raw value into a document-id segment: whitespace becomes `_`,
/// anything outside `[A-Za-z0-9_]` is stripped.
pub fn sanitize_doc_id(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}
