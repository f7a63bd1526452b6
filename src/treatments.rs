//! Treatment store — per-patient cached reads, gateway-mediated writes.
//!
//! Reads for a patient are served from an in-memory snapshot while fresh
//! (5-minute TTL, checked lazily at read time; there is no background
//! sweep). Every mutation goes through the gateway and invalidates the
//! affected patient's entry rather than patching it; the entry for the
//! currently selected patient is eagerly refetched after a successful write
//! so the active UI never shows a gap.
//!
//! Writes for one patient are serialized through a per-patient lock, so the
//! eager refetch that follows a successful write cannot race an overlapping
//! write to the same patient. Operations on different patients interleave
//! freely.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use crate::dentition;
use crate::events::{ChangeAction, ChangeEvent, EventBus, SyncDomain};
use crate::gateway::{GatewayError, TreatmentGateway};
use crate::models::{NewToothTreatment, ToothTreatment, TreatmentUpdate};

/// How long a cached per-patient snapshot stays trusted.
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Bound on gateway reads in the patient read path.
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on gateway writes. Generous: a slow write still fails explicitly
/// instead of hanging the UI forever.
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

// ═══════════════════════════════════════════════════════════
// Config and errors
// ═══════════════════════════════════════════════════════════

/// Timing knobs for the treatment store.
#[derive(Debug, Clone)]
pub struct TreatmentStoreConfig {
    pub cache_ttl: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for TreatmentStoreConfig {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

/// Errors from treatment store operations.
#[derive(Debug, thiserror::Error)]
pub enum TreatmentStoreError {
    #[error("failed to load treatments: {0}")]
    LoadAllFailure(GatewayError),

    #[error("failed to load treatments for patient {patient_id}: {source}")]
    LoadFailure {
        patient_id: Uuid,
        source: GatewayError,
    },

    #[error("failed to load treatments for appointment {appointment_id}: {source}")]
    AppointmentLoadFailure {
        appointment_id: Uuid,
        source: GatewayError,
    },

    #[error("failed to {operation} treatment: {source}")]
    WriteFailure {
        operation: &'static str,
        source: GatewayError,
    },

    #[error("tooth number {0} is outside every dentition range")]
    InvalidToothNumber(u8),

    #[error("treatment requires a patient id")]
    MissingPatient,
}

// ═══════════════════════════════════════════════════════════
// Cache entry and store state
// ═══════════════════════════════════════════════════════════

/// One patient's snapshot plus its capture time.
///
/// Owned exclusively by the store; accessors hand out clones, and all
/// mutations go through the store's write path.
struct CacheEntry {
    records: Vec<ToothTreatment>,
    fetched_at: Instant,
}

impl CacheEntry {
    fn new(records: Vec<ToothTreatment>) -> Self {
        Self {
            records,
            fetched_at: Instant::now(),
        }
    }

    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() < ttl
    }
}

/// Mutable store state. The lock is never held across an await.
#[derive(Default)]
struct StoreState {
    /// Working collection the UI renders from.
    treatments: Vec<ToothTreatment>,
    cache: HashMap<Uuid, CacheEntry>,
    selected_patient: Option<Uuid>,
    selected_tooth: Option<u8>,
    last_error: Option<String>,
}

// ═══════════════════════════════════════════════════════════
// TreatmentStore
// ═══════════════════════════════════════════════════════════

/// Mediates every read and write of treatment data between the UI and the
/// gateway. Constructed once at application start and injected into
/// consumers.
pub struct TreatmentStore<G> {
    gateway: Arc<G>,
    bus: Arc<EventBus>,
    config: TreatmentStoreConfig,
    state: RwLock<StoreState>,
    /// One async mutex per patient id: serializes write+refetch sequences.
    write_locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl<G: TreatmentGateway> TreatmentStore<G> {
    pub fn new(gateway: Arc<G>, bus: Arc<EventBus>) -> Self {
        Self::with_config(gateway, bus, TreatmentStoreConfig::default())
    }

    pub fn with_config(gateway: Arc<G>, bus: Arc<EventBus>, config: TreatmentStoreConfig) -> Self {
        Self {
            gateway,
            bus,
            config,
            state: RwLock::new(StoreState::default()),
            write_locks: Mutex::new(HashMap::new()),
        }
    }

    // ── Accessors ───────────────────────────────────────────

    /// Snapshot of the working collection.
    pub fn treatments(&self) -> Vec<ToothTreatment> {
        self.read_state(|s| s.treatments.clone())
    }

    pub fn last_error(&self) -> Option<String> {
        self.read_state(|s| s.last_error.clone())
    }

    pub fn clear_error(&self) {
        self.write_state(|s| s.last_error = None);
    }

    pub fn selected_patient(&self) -> Option<Uuid> {
        self.read_state(|s| s.selected_patient)
    }

    pub fn selected_tooth(&self) -> Option<u8> {
        self.read_state(|s| s.selected_tooth)
    }

    pub fn set_selected_patient(&self, patient_id: Option<Uuid>) {
        self.write_state(|s| s.selected_patient = patient_id);
    }

    pub fn set_selected_tooth(&self, tooth_number: Option<u8>) {
        self.write_state(|s| s.selected_tooth = tooth_number);
    }

    /// Whether a cache entry is currently held for the patient, fresh or not.
    pub fn is_cached(&self, patient_id: Uuid) -> bool {
        self.read_state(|s| s.cache.contains_key(&patient_id))
    }

    pub fn cached_patients(&self) -> Vec<Uuid> {
        self.read_state(|s| s.cache.keys().copied().collect())
    }

    // ── Reads ───────────────────────────────────────────────

    /// Load every treatment record. Uncached: the result replaces the
    /// working collection but never populates a per-patient entry.
    pub async fn load_all_treatments(&self) -> Result<Vec<ToothTreatment>, TreatmentStoreError> {
        match self.gateway.get_all().await {
            Ok(records) => {
                self.write_state(|s| {
                    s.treatments = records.clone();
                    s.last_error = None;
                });
                Ok(records)
            }
            Err(source) => {
                self.write_state(|s| s.last_error = Some(source.to_string()));
                Err(TreatmentStoreError::LoadAllFailure(source))
            }
        }
    }

    /// Load one patient's treatments, serving from the cache while fresh.
    ///
    /// On gateway failure or timeout the prior entry for the patient is
    /// discarded, never served stale: the caller gets an error and the
    /// working collection is cleared.
    pub async fn load_treatments_for_patient(
        &self,
        patient_id: Uuid,
    ) -> Result<Vec<ToothTreatment>, TreatmentStoreError> {
        let hit = self.read_state(|s| {
            s.cache
                .get(&patient_id)
                .filter(|entry| entry.is_fresh(self.config.cache_ttl))
                .map(|entry| entry.records.clone())
        });
        if let Some(records) = hit {
            tracing::debug!(%patient_id, count = records.len(), "treatment cache hit");
            self.write_state(|s| {
                s.treatments = records.clone();
                s.selected_patient = Some(patient_id);
                s.last_error = None;
            });
            self.bus.publish(&ChangeEvent::TreatmentsLoaded {
                patient_id,
                count: records.len(),
                from_cache: true,
            });
            return Ok(records);
        }

        let fetched = self
            .call_with_timeout(
                self.config.read_timeout,
                self.gateway.get_by_patient(patient_id),
            )
            .await;
        match fetched {
            Ok(records) => {
                self.write_state(|s| {
                    s.cache.insert(patient_id, CacheEntry::new(records.clone()));
                    s.treatments = records.clone();
                    s.selected_patient = Some(patient_id);
                    s.last_error = None;
                });
                tracing::debug!(%patient_id, count = records.len(), "treatments fetched from gateway");
                self.bus.publish(&ChangeEvent::TreatmentsLoaded {
                    patient_id,
                    count: records.len(),
                    from_cache: false,
                });
                Ok(records)
            }
            Err(source) => {
                self.write_state(|s| {
                    s.cache.remove(&patient_id);
                    s.treatments.clear();
                    s.last_error = Some(source.to_string());
                });
                tracing::error!(%patient_id, error = %source, "treatment load failed");
                self.bus.publish(&ChangeEvent::TreatmentLoadError {
                    patient_id,
                    message: source.to_string(),
                });
                Err(TreatmentStoreError::LoadFailure { patient_id, source })
            }
        }
    }

    /// Load the treatments of one tooth. Always bypasses the per-patient
    /// cache and never populates it.
    pub async fn load_treatments_for_tooth(
        &self,
        patient_id: Uuid,
        tooth_number: u8,
    ) -> Result<Vec<ToothTreatment>, TreatmentStoreError> {
        match self.gateway.get_by_tooth(patient_id, tooth_number).await {
            Ok(records) => {
                self.write_state(|s| {
                    s.treatments = records.clone();
                    s.selected_patient = Some(patient_id);
                    s.selected_tooth = Some(tooth_number);
                    s.last_error = None;
                });
                Ok(records)
            }
            Err(source) => {
                self.write_state(|s| s.last_error = Some(source.to_string()));
                Err(TreatmentStoreError::LoadFailure { patient_id, source })
            }
        }
    }

    /// Load the treatments linked to one appointment. Always bypasses the
    /// per-patient cache.
    pub async fn load_treatments_for_appointment(
        &self,
        appointment_id: Uuid,
    ) -> Result<Vec<ToothTreatment>, TreatmentStoreError> {
        match self.gateway.get_by_appointment(appointment_id).await {
            Ok(records) => {
                self.write_state(|s| {
                    s.treatments = records.clone();
                    s.last_error = None;
                });
                Ok(records)
            }
            Err(source) => {
                self.write_state(|s| s.last_error = Some(source.to_string()));
                Err(TreatmentStoreError::AppointmentLoadFailure {
                    appointment_id,
                    source,
                })
            }
        }
    }

    // ── Writes ──────────────────────────────────────────────

    /// Persist a new treatment, invalidate the patient's entry, and announce
    /// the change. When the patient is the currently selected one, the entry
    /// is eagerly refetched so the active UI sees the record immediately.
    pub async fn create_treatment(
        &self,
        new: NewToothTreatment,
    ) -> Result<ToothTreatment, TreatmentStoreError> {
        if new.patient_id.is_nil() {
            return Err(TreatmentStoreError::MissingPatient);
        }
        if !dentition::is_valid_tooth_number(new.tooth_number) {
            return Err(TreatmentStoreError::InvalidToothNumber(new.tooth_number));
        }

        let patient_id = new.patient_id;
        let lock = self.patient_write_lock(patient_id);
        let _guard = lock.lock().await;

        let created = match self
            .call_with_timeout(self.config.write_timeout, self.gateway.create(new))
            .await
        {
            Ok(created) => created,
            Err(source) => {
                self.record_write_failure(Some(patient_id), "create", &source);
                return Err(TreatmentStoreError::WriteFailure {
                    operation: "create",
                    source,
                });
            }
        };

        self.write_state(|s| {
            s.cache.remove(&patient_id);
            s.treatments.push(created.clone());
            s.last_error = None;
        });
        self.bus.publish(&ChangeEvent::Record {
            domain: SyncDomain::Treatments,
            action: ChangeAction::Created,
            id: created.id,
        });
        if self.selected_patient() == Some(patient_id) {
            self.refresh_selected_patient("create").await;
        }
        Ok(created)
    }

    /// Persist a partial update.
    ///
    /// The update is applied to the working collection before the gateway
    /// responds, so the UI reflects it without waiting on the refetch. On
    /// gateway failure the optimistic rows are kept and the error surfaced;
    /// the next authoritative load supersedes them.
    pub async fn update_treatment(
        &self,
        id: Uuid,
        update: TreatmentUpdate,
    ) -> Result<(), TreatmentStoreError> {
        // Patient looked up from the pre-update in-memory state.
        let known_patient =
            self.read_state(|s| s.treatments.iter().find(|t| t.id == id).map(|t| t.patient_id));

        let lock = known_patient.map(|pid| self.patient_write_lock(pid));
        let _guard = match &lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        self.write_state(|s| {
            if let Some(treatment) = s.treatments.iter_mut().find(|t| t.id == id) {
                update.apply(treatment);
                treatment.updated_at = chrono::Utc::now();
            }
        });

        let updated = match self
            .call_with_timeout(self.config.write_timeout, self.gateway.update(id, update))
            .await
        {
            Ok(updated) => updated,
            Err(source) => {
                self.record_write_failure(known_patient, "update", &source);
                return Err(TreatmentStoreError::WriteFailure {
                    operation: "update",
                    source,
                });
            }
        };

        let patient_id = known_patient.unwrap_or(updated.patient_id);
        self.write_state(|s| {
            s.cache.remove(&patient_id);
            s.last_error = None;
        });
        self.bus.publish(&ChangeEvent::Record {
            domain: SyncDomain::Treatments,
            action: ChangeAction::Updated,
            id,
        });
        self.bus.publish(&ChangeEvent::ToothColorUpdate {
            treatment_id: id,
            patient_id: updated.patient_id,
        });
        self.refresh_selected_patient("update").await;
        Ok(())
    }

    /// Delete a treatment. No local removal happens on gateway failure.
    pub async fn delete_treatment(&self, id: Uuid) -> Result<(), TreatmentStoreError> {
        let known_patient =
            self.read_state(|s| s.treatments.iter().find(|t| t.id == id).map(|t| t.patient_id));

        let lock = known_patient.map(|pid| self.patient_write_lock(pid));
        let _guard = match &lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        if let Err(source) = self
            .call_with_timeout(self.config.write_timeout, self.gateway.delete(id))
            .await
        {
            self.record_write_failure(known_patient, "delete", &source);
            return Err(TreatmentStoreError::WriteFailure {
                operation: "delete",
                source,
            });
        }

        self.write_state(|s| {
            s.treatments.retain(|t| t.id != id);
            if let Some(patient_id) = known_patient {
                s.cache.remove(&patient_id);
            }
            s.last_error = None;
        });
        self.bus.publish(&ChangeEvent::Record {
            domain: SyncDomain::Treatments,
            action: ChangeAction::Deleted,
            id,
        });
        self.bus
            .publish(&ChangeEvent::TreatmentPaymentsDeleted { treatment_id: id });
        Ok(())
    }

    /// Persist a new priority order for one tooth, then refresh just that
    /// tooth's records, splicing them into the working collection and the
    /// patient's cache entry. Entries for other teeth and patients are
    /// untouched.
    pub async fn reorder_treatments(
        &self,
        patient_id: Uuid,
        tooth_number: u8,
        ordered_ids: Vec<Uuid>,
    ) -> Result<(), TreatmentStoreError> {
        if !dentition::is_valid_tooth_number(tooth_number) {
            return Err(TreatmentStoreError::InvalidToothNumber(tooth_number));
        }

        let lock = self.patient_write_lock(patient_id);
        let _guard = lock.lock().await;

        if let Err(source) = self
            .call_with_timeout(
                self.config.write_timeout,
                self.gateway.reorder(patient_id, tooth_number, ordered_ids),
            )
            .await
        {
            self.record_write_failure(Some(patient_id), "reorder", &source);
            return Err(TreatmentStoreError::WriteFailure {
                operation: "reorder",
                source,
            });
        }

        match self.gateway.get_by_tooth(patient_id, tooth_number).await {
            Ok(refreshed) => {
                self.write_state(|s| {
                    splice_tooth(&mut s.treatments, patient_id, tooth_number, &refreshed);
                    if let Some(entry) = s.cache.get_mut(&patient_id) {
                        splice_tooth(&mut entry.records, patient_id, tooth_number, &refreshed);
                    }
                    s.last_error = None;
                });
                Ok(())
            }
            Err(source) => {
                self.record_write_failure(Some(patient_id), "reorder", &source);
                Err(TreatmentStoreError::WriteFailure {
                    operation: "reorder",
                    source,
                })
            }
        }
    }

    // ── Internals ───────────────────────────────────────────

    /// Refetch the selected patient and repopulate their entry after a
    /// successful write. A failed refetch only delays consistency, since
    /// the write itself already landed, so it downgrades to a warning.
    async fn refresh_selected_patient(&self, operation: &'static str) {
        let Some(patient_id) = self.selected_patient() else {
            return;
        };
        match self.gateway.get_by_patient(patient_id).await {
            Ok(records) => {
                self.write_state(|s| {
                    s.treatments = records.clone();
                    s.cache.insert(patient_id, CacheEntry::new(records));
                });
            }
            Err(error) => {
                tracing::warn!(%patient_id, %operation, %error, "post-write refresh failed");
            }
        }
    }

    fn patient_write_lock(&self, patient_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .write_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(patient_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn record_write_failure(
        &self,
        patient_id: Option<Uuid>,
        operation: &'static str,
        source: &GatewayError,
    ) {
        self.write_state(|s| s.last_error = Some(source.to_string()));
        tracing::error!(%operation, error = %source, "treatment write failed");
        if let Some(patient_id) = patient_id {
            self.bus.publish(&ChangeEvent::TreatmentLoadError {
                patient_id,
                message: source.to_string(),
            });
        }
    }

    async fn call_with_timeout<T>(
        &self,
        bound: Duration,
        call: impl Future<Output = Result<T, GatewayError>>,
    ) -> Result<T, GatewayError> {
        match tokio::time::timeout(bound, call).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(bound)),
        }
    }

    fn read_state<T>(&self, f: impl FnOnce(&StoreState) -> T) -> T {
        let guard = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn write_state<T>(&self, f: impl FnOnce(&mut StoreState) -> T) -> T {
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

/// Replace the (patient, tooth) subset of `records` with `refreshed`,
/// keeping the canonical tooth-then-priority order.
fn splice_tooth(
    records: &mut Vec<ToothTreatment>,
    patient_id: Uuid,
    tooth_number: u8,
    refreshed: &[ToothTreatment],
) {
    records.retain(|t| !(t.patient_id == patient_id && t.tooth_number == tooth_number));
    records.extend_from_slice(refreshed);
    records.sort_by_key(|t| (t.patient_id, t.tooth_number, t.priority));
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
