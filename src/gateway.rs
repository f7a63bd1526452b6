//! Record access gateway contracts.
//!
//! The persistence layer lives out of process; the stores depend only on
//! these async traits. Every call may fail, and failure always surfaces as
//! a typed error, never as a silently empty result. Once issued, a call is
//! not cancellable; it resolves by completion or by the store-side timeout.

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    NewPatient, NewToothTreatment, Patient, PatientUpdate, ToothTreatment, TreatmentUpdate,
};

/// Errors surfaced by gateway calls.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("record not found: {0}")]
    NotFound(Uuid),

    #[error("storage failure: {0}")]
    Storage(String),

    /// Produced by the store-side timeout wrapper, not by gateways themselves.
    #[error("gateway call timed out after {0:?}")]
    Timeout(Duration),
}

/// Asynchronous CRUD/query access to persisted tooth treatments.
///
/// Records come back ordered by ascending tooth number, then ascending
/// priority.
#[async_trait]
pub trait TreatmentGateway: Send + Sync {
    async fn get_all(&self) -> Result<Vec<ToothTreatment>, GatewayError>;

    async fn get_by_patient(&self, patient_id: Uuid) -> Result<Vec<ToothTreatment>, GatewayError>;

    async fn get_by_tooth(
        &self,
        patient_id: Uuid,
        tooth_number: u8,
    ) -> Result<Vec<ToothTreatment>, GatewayError>;

    async fn get_by_appointment(
        &self,
        appointment_id: Uuid,
    ) -> Result<Vec<ToothTreatment>, GatewayError>;

    /// Persists a new record; the gateway assigns id and timestamps.
    async fn create(&self, new: NewToothTreatment) -> Result<ToothTreatment, GatewayError>;

    async fn update(&self, id: Uuid, update: TreatmentUpdate)
        -> Result<ToothTreatment, GatewayError>;

    async fn delete(&self, id: Uuid) -> Result<bool, GatewayError>;

    /// Reassigns priorities 1..n for one tooth in the order given.
    async fn reorder(
        &self,
        patient_id: Uuid,
        tooth_number: u8,
        ordered_ids: Vec<Uuid>,
    ) -> Result<(), GatewayError>;
}

/// Asynchronous CRUD/query access to persisted patients.
#[async_trait]
pub trait PatientGateway: Send + Sync {
    async fn get_all(&self) -> Result<Vec<Patient>, GatewayError>;

    async fn create(&self, new: NewPatient) -> Result<Patient, GatewayError>;

    async fn update(&self, id: Uuid, update: PatientUpdate) -> Result<Patient, GatewayError>;

    async fn delete(&self, id: Uuid) -> Result<bool, GatewayError>;

    async fn search(&self, query: &str) -> Result<Vec<Patient>, GatewayError>;
}
