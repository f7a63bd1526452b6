use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{TreatmentCategory, TreatmentStatus};

/// One planned or performed procedure on one tooth of one patient.
///
/// `priority` values within a (patient, tooth) group form a dense ascending
/// sequence starting at 1, reflecting treatment order for that tooth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToothTreatment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub tooth_number: u8,
    pub category: TreatmentCategory,
    pub status: TreatmentStatus,
    pub priority: u32,
    pub cost: f64,
    pub appointment_id: Option<Uuid>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Creation payload; id and timestamps are assigned by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewToothTreatment {
    pub patient_id: Uuid,
    pub tooth_number: u8,
    pub category: TreatmentCategory,
    pub status: TreatmentStatus,
    pub priority: u32,
    pub cost: f64,
    pub appointment_id: Option<Uuid>,
    pub notes: Option<String>,
}

/// Partial update. Outer `None` means unchanged; for the double-`Option`
/// fields the inner `None` clears the value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TreatmentUpdate {
    pub status: Option<TreatmentStatus>,
    pub category: Option<TreatmentCategory>,
    pub priority: Option<u32>,
    pub cost: Option<f64>,
    pub appointment_id: Option<Option<Uuid>>,
    pub notes: Option<Option<String>>,
}

impl TreatmentUpdate {
    pub fn apply(&self, treatment: &mut ToothTreatment) {
        if let Some(status) = self.status {
            treatment.status = status;
        }
        if let Some(category) = self.category {
            treatment.category = category;
        }
        if let Some(priority) = self.priority {
            treatment.priority = priority;
        }
        if let Some(cost) = self.cost {
            treatment.cost = cost;
        }
        if let Some(appointment_id) = self.appointment_id {
            treatment.appointment_id = appointment_id;
        }
        if let Some(ref notes) = self.notes {
            treatment.notes = notes.clone();
        }
    }
}
