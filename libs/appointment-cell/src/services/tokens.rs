use std::sync::OnceLock;

use regex::Regex;

/// Advance tokens encode position: `A{session+1}-{slotIndex+1:03}`.
pub fn format_advance_token(session_index: usize, numeric_token: u32) -> String {
    format!("A{}-{:03}", session_index + 1, numeric_token)
}

/// Walk-in tokens come from the per-day counter: `W{session+1}-{nnn}`.
pub fn format_walk_in_token(session_index: usize, numeric_token: u32) -> String {
    format!("W{}-{:03}", session_index + 1, numeric_token)
}

/// Classic clinics keep a plain per-session sequence alongside.
pub fn format_classic_token(number: u32) -> String {
    format!("{:03}", number)
}

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[AW][1-9][0-9]*-[0-9]{3,}$").unwrap())
}

pub fn is_well_formed_token(token: &str) -> bool {
    token_regex().is_match(token)
}

/// Tokens shaped like `A…`/`W…` are position tokens; classic display rules
/// suppress them in favour of the plain sequence.
pub fn is_position_token(token: &str) -> bool {
    token.starts_with('A') || token.starts_with('W')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_session_scoped_and_zero_padded() {
        assert_eq!(format_advance_token(0, 4), "A1-004");
        assert_eq!(format_walk_in_token(1, 105), "W2-105");
        assert_eq!(format_classic_token(7), "007");
    }

    #[test]
    fn shape_check_accepts_generated_tokens_only() {
        assert!(is_well_formed_token("A1-004"));
        assert!(is_well_formed_token("W2-105"));
        assert!(is_well_formed_token("W1-1050"));
        assert!(!is_well_formed_token("A0-004"));
        assert!(!is_well_formed_token("X1-004"));
        assert!(!is_well_formed_token("A1-04"));
        assert!(!is_well_formed_token("007"));
    }
}
