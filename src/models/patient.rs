use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    pub full_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Creation payload; id and timestamps are assigned by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPatient {
    pub full_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
}

/// Partial update. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatientUpdate {
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl PatientUpdate {
    pub fn apply(&self, patient: &mut Patient) {
        if let Some(ref full_name) = self.full_name {
            patient.full_name = full_name.clone();
        }
        if let Some(ref phone) = self.phone {
            patient.phone = Some(phone.clone());
        }
        if let Some(ref email) = self.email {
            patient.email = Some(email.clone());
        }
    }
}
