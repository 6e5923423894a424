use std::sync::Arc;

use serde_json::json;
use thiserror::Error;
use tracing::debug;

use shared_store::{DocumentStore, FieldValue, StoreError};

use crate::models::{Clinic, ConsultationStatus, Doctor};

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("doctor not found: {0}")]
    DoctorNotFound(String),

    #[error("clinic not found: {0}")]
    ClinicNotFound(String),

    #[error("malformed record: {0}")]
    Malformed(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Read-side access to clinic and doctor profiles. Profile CRUD itself lives
/// with an external service; the scheduler only loads and patches status.
pub struct DoctorDirectoryService {
    store: Arc<dyn DocumentStore>,
}

impl DoctorDirectoryService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn get_doctor(&self, doctor_id: &str) -> Result<Doctor, DirectoryError> {
        let path = format!("doctors/{}", doctor_id);
        let doc = self
            .store
            .get(&path)
            .await?
            .ok_or_else(|| DirectoryError::DoctorNotFound(doctor_id.to_string()))?;
        serde_json::from_value(doc.data).map_err(|e| DirectoryError::Malformed(e.to_string()))
    }

    pub async fn get_clinic(&self, clinic_id: &str) -> Result<Clinic, DirectoryError> {
        let path = format!("clinics/{}", clinic_id);
        let doc = self
            .store
            .get(&path)
            .await?
            .ok_or_else(|| DirectoryError::ClinicNotFound(clinic_id.to_string()))?;
        serde_json::from_value(doc.data).map_err(|e| DirectoryError::Malformed(e.to_string()))
    }

    pub async fn set_consultation_status(
        &self,
        doctor_id: &str,
        status: ConsultationStatus,
    ) -> Result<(), DirectoryError> {
        debug!(doctor_id = %doctor_id, status = %status, "updating consultation status");
        let path = format!("doctors/{}", doctor_id);
        let mut tx = self.store.begin().await?;
        tx.get(&path)
            .await?
            .ok_or_else(|| DirectoryError::DoctorNotFound(doctor_id.to_string()))?;
        tx.update(
            &path,
            vec![(
                "consultationStatus".to_string(),
                FieldValue::Value(json!(status)),
            )],
        );
        tx.commit().await?;
        Ok(())
    }
}
