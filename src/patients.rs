//! Patient store — gateway CRUD plus client-side filtering.
//!
//! The second independent publisher on the change bus: every successful
//! mutation announces a `patients` domain event, which the sync coordinator
//! turns into a debounced table refresh.

use std::sync::{Arc, PoisonError, RwLock};

use uuid::Uuid;

use crate::events::{ChangeAction, ChangeEvent, EventBus, SyncDomain};
use crate::gateway::{GatewayError, PatientGateway};
use crate::models::{NewPatient, Patient, PatientUpdate};

/// Errors from patient store operations.
#[derive(Debug, thiserror::Error)]
pub enum PatientStoreError {
    #[error("failed to load patients: {0}")]
    LoadFailure(GatewayError),

    #[error("failed to {operation} patient: {source}")]
    WriteFailure {
        operation: &'static str,
        source: GatewayError,
    },
}

#[derive(Default)]
struct PatientState {
    patients: Vec<Patient>,
    filtered: Vec<Patient>,
    search_query: String,
    selected: Option<Uuid>,
    last_error: Option<String>,
}

pub struct PatientStore<G> {
    gateway: Arc<G>,
    bus: Arc<EventBus>,
    state: RwLock<PatientState>,
}

impl<G: PatientGateway> PatientStore<G> {
    pub fn new(gateway: Arc<G>, bus: Arc<EventBus>) -> Self {
        Self {
            gateway,
            bus,
            state: RwLock::new(PatientState::default()),
        }
    }

    // ── Accessors ───────────────────────────────────────────

    pub fn patients(&self) -> Vec<Patient> {
        self.read_state(|s| s.patients.clone())
    }

    /// The collection after the current search query is applied.
    pub fn filtered_patients(&self) -> Vec<Patient> {
        self.read_state(|s| s.filtered.clone())
    }

    pub fn selected_patient(&self) -> Option<Uuid> {
        self.read_state(|s| s.selected)
    }

    pub fn set_selected_patient(&self, patient_id: Option<Uuid>) {
        self.write_state(|s| s.selected = patient_id);
    }

    pub fn last_error(&self) -> Option<String> {
        self.read_state(|s| s.last_error.clone())
    }

    pub fn clear_error(&self) {
        self.write_state(|s| s.last_error = None);
    }

    /// Filter the in-memory collection by name, phone, or email substring.
    pub fn set_search_query(&self, query: &str) {
        self.write_state(|s| {
            s.search_query = query.to_string();
            apply_filter(s);
        });
    }

    // ── Operations ──────────────────────────────────────────

    pub async fn load_patients(&self) -> Result<Vec<Patient>, PatientStoreError> {
        match self.gateway.get_all().await {
            Ok(patients) => {
                self.write_state(|s| {
                    s.patients = patients.clone();
                    apply_filter(s);
                    s.last_error = None;
                });
                Ok(patients)
            }
            Err(source) => {
                self.write_state(|s| s.last_error = Some(source.to_string()));
                tracing::error!(error = %source, "patient load failed");
                Err(PatientStoreError::LoadFailure(source))
            }
        }
    }

    pub async fn create_patient(&self, new: NewPatient) -> Result<Patient, PatientStoreError> {
        let created = self.gateway.create(new).await.map_err(|source| {
            self.write_state(|s| s.last_error = Some(source.to_string()));
            PatientStoreError::WriteFailure {
                operation: "create",
                source,
            }
        })?;

        self.write_state(|s| {
            s.patients.push(created.clone());
            apply_filter(s);
            s.last_error = None;
        });
        self.bus.publish(&ChangeEvent::Record {
            domain: SyncDomain::Patients,
            action: ChangeAction::Created,
            id: created.id,
        });
        Ok(created)
    }

    pub async fn update_patient(
        &self,
        id: Uuid,
        update: PatientUpdate,
    ) -> Result<Patient, PatientStoreError> {
        let updated = self.gateway.update(id, update).await.map_err(|source| {
            self.write_state(|s| s.last_error = Some(source.to_string()));
            PatientStoreError::WriteFailure {
                operation: "update",
                source,
            }
        })?;

        self.write_state(|s| {
            if let Some(patient) = s.patients.iter_mut().find(|p| p.id == id) {
                *patient = updated.clone();
            }
            apply_filter(s);
            s.last_error = None;
        });
        self.bus.publish(&ChangeEvent::Record {
            domain: SyncDomain::Patients,
            action: ChangeAction::Updated,
            id,
        });
        Ok(updated)
    }

    pub async fn delete_patient(&self, id: Uuid) -> Result<(), PatientStoreError> {
        self.gateway.delete(id).await.map_err(|source| {
            self.write_state(|s| s.last_error = Some(source.to_string()));
            PatientStoreError::WriteFailure {
                operation: "delete",
                source,
            }
        })?;

        self.write_state(|s| {
            s.patients.retain(|p| p.id != id);
            if s.selected == Some(id) {
                s.selected = None;
            }
            apply_filter(s);
            s.last_error = None;
        });
        self.bus.publish(&ChangeEvent::Record {
            domain: SyncDomain::Patients,
            action: ChangeAction::Deleted,
            id,
        });
        Ok(())
    }

    /// Server-side search; the result replaces the filtered view.
    pub async fn search_patients(&self, query: &str) -> Result<Vec<Patient>, PatientStoreError> {
        match self.gateway.search(query).await {
            Ok(matches) => {
                self.write_state(|s| {
                    s.search_query = query.to_string();
                    s.filtered = matches.clone();
                    s.last_error = None;
                });
                Ok(matches)
            }
            Err(source) => {
                self.write_state(|s| s.last_error = Some(source.to_string()));
                Err(PatientStoreError::LoadFailure(source))
            }
        }
    }

    fn read_state<T>(&self, f: impl FnOnce(&PatientState) -> T) -> T {
        let guard = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn write_state<T>(&self, f: impl FnOnce(&mut PatientState) -> T) -> T {
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

fn apply_filter(state: &mut PatientState) {
    if state.search_query.is_empty() {
        state.filtered = state.patients.clone();
        return;
    }
    let needle = state.search_query.to_lowercase();
    state.filtered = state
        .patients
        .iter()
        .filter(|p| {
            p.full_name.to_lowercase().contains(&needle)
                || p.phone.as_deref().is_some_and(|v| v.contains(&needle))
                || p.email
                    .as_deref()
                    .is_some_and(|v| v.to_lowercase().contains(&needle))
        })
        .cloned()
        .collect();
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;

    use crate::events::Channel;

    #[derive(Default)]
    struct MockPatientGateway {
        patients: Mutex<Vec<Patient>>,
        fail: AtomicBool,
    }

    impl MockPatientGateway {
        fn seeded(patients: Vec<Patient>) -> Arc<Self> {
            Arc::new(Self {
                patients: Mutex::new(patients),
                fail: AtomicBool::new(false),
            })
        }

        fn guard(&self) -> Result<(), GatewayError> {
            if self.fail.load(Ordering::SeqCst) {
                Err(GatewayError::Storage("injected failure".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl PatientGateway for MockPatientGateway {
        async fn get_all(&self) -> Result<Vec<Patient>, GatewayError> {
            self.guard()?;
            Ok(self.patients.lock().unwrap().clone())
        }

        async fn create(&self, new: NewPatient) -> Result<Patient, GatewayError> {
            self.guard()?;
            let now = Utc::now();
            let created = Patient {
                id: Uuid::new_v4(),
                full_name: new.full_name,
                phone: new.phone,
                email: new.email,
                created_at: now,
                updated_at: now,
            };
            self.patients.lock().unwrap().push(created.clone());
            Ok(created)
        }

        async fn update(&self, id: Uuid, update: PatientUpdate) -> Result<Patient, GatewayError> {
            self.guard()?;
            let mut patients = self.patients.lock().unwrap();
            let patient = patients
                .iter_mut()
                .find(|p| p.id == id)
                .ok_or(GatewayError::NotFound(id))?;
            update.apply(patient);
            patient.updated_at = Utc::now();
            Ok(patient.clone())
        }

        async fn delete(&self, id: Uuid) -> Result<bool, GatewayError> {
            self.guard()?;
            let mut patients = self.patients.lock().unwrap();
            let before = patients.len();
            patients.retain(|p| p.id != id);
            Ok(patients.len() < before)
        }

        async fn search(&self, query: &str) -> Result<Vec<Patient>, GatewayError> {
            self.guard()?;
            let needle = query.to_lowercase();
            Ok(self
                .patients
                .lock()
                .unwrap()
                .iter()
                .filter(|p| p.full_name.to_lowercase().contains(&needle))
                .cloned()
                .collect())
        }
    }

    fn patient_named(name: &str) -> Patient {
        let now = Utc::now();
        Patient {
            id: Uuid::new_v4(),
            full_name: name.to_string(),
            phone: Some("0500000000".into()),
            email: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn collect_changed(bus: &EventBus) -> Arc<Mutex<Vec<ChangeEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(Channel::Changed(SyncDomain::Patients), move |event| {
            sink.lock().unwrap().push(event.clone());
        });
        seen
    }

    #[tokio::test]
    async fn load_fills_collection_and_filter() {
        let gateway = MockPatientGateway::seeded(vec![
            patient_named("Alice"),
            patient_named("Bob"),
        ]);
        let bus = Arc::new(EventBus::new());
        let store = PatientStore::new(gateway, Arc::clone(&bus));

        let loaded = store.load_patients().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(store.filtered_patients().len(), 2);
    }

    #[tokio::test]
    async fn create_publishes_patient_change() {
        let gateway = MockPatientGateway::seeded(vec![]);
        let bus = Arc::new(EventBus::new());
        let store = PatientStore::new(gateway, Arc::clone(&bus));
        let changed = collect_changed(&bus);

        let created = store
            .create_patient(NewPatient {
                full_name: "Alice".into(),
                phone: None,
                email: None,
            })
            .await
            .unwrap();

        assert_eq!(store.patients().len(), 1);
        let events = changed.lock().unwrap();
        assert!(matches!(
            events[0],
            ChangeEvent::Record {
                domain: SyncDomain::Patients,
                action: ChangeAction::Created,
                id,
            } if id == created.id
        ));
    }

    #[tokio::test]
    async fn delete_clears_selection_and_publishes() {
        let patients = vec![patient_named("Alice"), patient_named("Bob")];
        let target = patients[0].id;
        let gateway = MockPatientGateway::seeded(patients);
        let bus = Arc::new(EventBus::new());
        let store = PatientStore::new(gateway, Arc::clone(&bus));
        let changed = collect_changed(&bus);

        store.load_patients().await.unwrap();
        store.set_selected_patient(Some(target));
        store.delete_patient(target).await.unwrap();

        assert_eq!(store.patients().len(), 1);
        assert!(store.selected_patient().is_none());
        assert_eq!(changed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn search_query_narrows_filtered_view() {
        let gateway = MockPatientGateway::seeded(vec![
            patient_named("Alice Smith"),
            patient_named("Bob Jones"),
        ]);
        let bus = Arc::new(EventBus::new());
        let store = PatientStore::new(gateway, Arc::clone(&bus));

        store.load_patients().await.unwrap();
        store.set_search_query("smith");
        assert_eq!(store.filtered_patients().len(), 1);

        store.set_search_query("");
        assert_eq!(store.filtered_patients().len(), 2);
    }

    #[tokio::test]
    async fn gateway_search_replaces_filtered_view() {
        let gateway = MockPatientGateway::seeded(vec![
            patient_named("Alice"),
            patient_named("Alina"),
            patient_named("Bob"),
        ]);
        let bus = Arc::new(EventBus::new());
        let store = PatientStore::new(gateway, Arc::clone(&bus));

        store.load_patients().await.unwrap();
        let matches = store.search_patients("ali").await.unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(store.filtered_patients().len(), 2);
    }

    #[tokio::test]
    async fn failed_load_surfaces_error() {
        let gateway = MockPatientGateway::seeded(vec![patient_named("Alice")]);
        gateway.fail.store(true, Ordering::SeqCst);
        let bus = Arc::new(EventBus::new());
        let store = PatientStore::new(Arc::clone(&gateway), Arc::clone(&bus));

        assert!(matches!(
            store.load_patients().await,
            Err(PatientStoreError::LoadFailure(_))
        ));
        assert!(store.last_error().is_some());
        assert!(store.patients().is_empty());
    }
}
