//! Real-time sync coordinator — debounced cross-store refresh.
//!
//! Subscribes to the per-domain catch-all channels and collapses bursts of
//! change events into one authoritative reload per domain, fired after a
//! quiescence window. At most one pending timer per domain; unrelated
//! domains never delay each other. Reload delegates are supplied by the
//! domain stores and must be idempotent, since the coordinator may call them
//! repeatedly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::events::{Channel, EventBus, SubscriptionId, SyncDomain};

/// Quiescence window: events closer together than this collapse into one
/// reload.
const DEFAULT_QUIESCENCE: Duration = Duration::from_millis(300);

/// A domain's authoritative reload operation.
pub type ReloadFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// A pending trailing-edge debounce timer.
struct PendingTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

struct CoordinatorInner {
    quiescence: Duration,
    reloaders: Mutex<HashMap<SyncDomain, ReloadFn>>,
    /// Pending timer per domain. An entry is removed when its timer fires
    /// or is replaced by a newer event.
    timers: Mutex<HashMap<SyncDomain, PendingTimer>>,
    next_generation: AtomicU64,
    runtime: Handle,
}

/// Translates bursts of change events into a minimal set of domain reloads.
///
/// Must be created within a tokio runtime; the captured handle is used to
/// spawn debounce timers from synchronous bus callbacks.
pub struct SyncCoordinator {
    inner: Arc<CoordinatorInner>,
    bus: Arc<EventBus>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl SyncCoordinator {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self::with_quiescence(bus, DEFAULT_QUIESCENCE)
    }

    pub fn with_quiescence(bus: Arc<EventBus>, quiescence: Duration) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                quiescence,
                reloaders: Mutex::new(HashMap::new()),
                timers: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                runtime: Handle::current(),
            }),
            bus,
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Register the reload delegate for one domain.
    pub fn on_reload<F>(&self, domain: SyncDomain, reload: F)
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        lock(&self.inner.reloaders).insert(domain, Arc::new(reload));
    }

    /// Subscribe to the catch-all channel of every UI-table domain.
    pub fn attach(&self) {
        let mut subscriptions = lock(&self.subscriptions);
        for domain in SyncDomain::TABLE_DOMAINS {
            let inner = Arc::clone(&self.inner);
            let id = self.bus.subscribe(Channel::Changed(domain), move |_event| {
                CoordinatorInner::schedule(&inner, domain);
            });
            subscriptions.push(id);
        }
        tracing::debug!("sync coordinator attached to change channels");
    }

    /// Reload one domain immediately, bypassing the debounce window. A
    /// domain without a registered delegate is a no-op.
    pub async fn refresh_table(&self, domain: SyncDomain) {
        let reload = lock(&self.inner.reloaders).get(&domain).cloned();
        if let Some(reload) = reload {
            tracing::debug!(domain = domain.as_str(), "immediate table refresh");
            reload().await;
        }
    }

    /// Reload every registered domain at once, bypassing the debounce
    /// window. Reloads run concurrently.
    pub async fn refresh_all(&self) {
        let reloads: Vec<ReloadFn> = lock(&self.inner.reloaders).values().cloned().collect();
        futures_util::future::join_all(reloads.iter().map(|reload| reload())).await;
    }

    /// Number of domains with a reload currently pending.
    pub fn pending_reloads(&self) -> usize {
        lock(&self.inner.timers).len()
    }

    /// Cancel every pending timer and deregister from the bus, so no reload
    /// fires against a torn-down context.
    pub fn shutdown(&self) {
        for id in lock(&self.subscriptions).drain(..) {
            self.bus.unsubscribe(id);
        }
        let mut timers = lock(&self.inner.timers);
        for (_, timer) in timers.drain() {
            timer.handle.abort();
        }
        tracing::debug!("sync coordinator shut down");
    }
}

impl Drop for SyncCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl CoordinatorInner {
    /// Trailing-edge debounce: replace any pending timer for the domain.
    fn schedule(this: &Arc<Self>, domain: SyncDomain) {
        let generation = this.next_generation.fetch_add(1, Ordering::SeqCst);
        let inner = Arc::clone(this);
        let handle = this.runtime.spawn(async move {
            tokio::time::sleep(inner.quiescence).await;
            // Clear the pending entry before reloading, so events arriving
            // during the reload schedule a fresh timer. Only the entry this
            // task owns is removed; a replacement may already be in place.
            {
                let mut timers = lock(&inner.timers);
                match timers.get(&domain) {
                    Some(timer) if timer.generation == generation => {
                        timers.remove(&domain);
                    }
                    _ => return,
                }
            }
            let reload = lock(&inner.reloaders).get(&domain).cloned();
            if let Some(reload) = reload {
                tracing::debug!(domain = domain.as_str(), "quiescence elapsed; reloading");
                reload().await;
            }
        });

        let mut timers = lock(&this.timers);
        if let Some(previous) = timers.insert(domain, PendingTimer { generation, handle }) {
            previous.handle.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use futures_util::FutureExt;
    use uuid::Uuid;

    use crate::events::{ChangeAction, ChangeEvent};

    fn counting_reloader(coordinator: &SyncCoordinator, domain: SyncDomain) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        coordinator.on_reload(domain, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        });
        count
    }

    fn change(domain: SyncDomain) -> ChangeEvent {
        ChangeEvent::Record {
            domain,
            action: ChangeAction::Updated,
            id: Uuid::new_v4(),
        }
    }

    async fn settle(duration: Duration) {
        tokio::time::sleep(duration).await;
        tokio::task::yield_now().await;
    }

    #[tokio::test(start_paused = true)]
    async fn burst_collapses_to_single_reload() {
        let bus = Arc::new(EventBus::new());
        let coordinator = SyncCoordinator::new(Arc::clone(&bus));
        let reloads = counting_reloader(&coordinator, SyncDomain::Payments);
        coordinator.attach();

        for _ in 0..5 {
            bus.publish(&change(SyncDomain::Payments));
            settle(Duration::from_millis(50)).await;
        }
        settle(Duration::from_millis(400)).await;

        assert_eq!(reloads.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.pending_reloads(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn spaced_events_each_produce_a_reload() {
        let bus = Arc::new(EventBus::new());
        let coordinator = SyncCoordinator::new(Arc::clone(&bus));
        let reloads = counting_reloader(&coordinator, SyncDomain::Appointments);
        coordinator.attach();

        bus.publish(&change(SyncDomain::Appointments));
        settle(Duration::from_millis(500)).await;
        bus.publish(&change(SyncDomain::Appointments));
        settle(Duration::from_millis(500)).await;

        assert_eq!(reloads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn each_event_inside_the_window_resets_it() {
        let bus = Arc::new(EventBus::new());
        let coordinator = SyncCoordinator::new(Arc::clone(&bus));
        let reloads = counting_reloader(&coordinator, SyncDomain::Patients);
        coordinator.attach();

        // Three events 200 ms apart: every one lands inside the previous
        // window, so nothing fires until 300 ms after the last.
        for _ in 0..3 {
            bus.publish(&change(SyncDomain::Patients));
            settle(Duration::from_millis(200)).await;
        }
        assert_eq!(reloads.load(Ordering::SeqCst), 0, "window still open");

        settle(Duration::from_millis(300)).await;
        assert_eq!(reloads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn domains_debounce_independently() {
        let bus = Arc::new(EventBus::new());
        let coordinator = SyncCoordinator::new(Arc::clone(&bus));
        let payments = counting_reloader(&coordinator, SyncDomain::Payments);
        let inventory = counting_reloader(&coordinator, SyncDomain::Inventory);
        coordinator.attach();

        bus.publish(&change(SyncDomain::Payments));
        settle(Duration::from_millis(100)).await;
        bus.publish(&change(SyncDomain::Inventory));
        settle(Duration::from_millis(600)).await;

        assert_eq!(payments.load(Ordering::SeqCst), 1);
        assert_eq!(inventory.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn specific_action_channels_reach_the_coordinator() {
        let bus = Arc::new(EventBus::new());
        let coordinator = SyncCoordinator::new(Arc::clone(&bus));
        let reloads = counting_reloader(&coordinator, SyncDomain::Prescriptions);
        coordinator.attach();

        // A created event lands on the catch-all channel too.
        bus.publish(&ChangeEvent::Record {
            domain: SyncDomain::Prescriptions,
            action: ChangeAction::Created,
            id: Uuid::new_v4(),
        });
        settle(Duration::from_millis(400)).await;

        assert_eq!(reloads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn patient_store_mutation_drives_a_debounced_reload() {
        use async_trait::async_trait;
        use chrono::Utc;

        use crate::gateway::{GatewayError, PatientGateway};
        use crate::models::{NewPatient, Patient, PatientUpdate};
        use crate::patients::PatientStore;

        struct StubPatientGateway;

        #[async_trait]
        impl PatientGateway for StubPatientGateway {
            async fn get_all(&self) -> Result<Vec<Patient>, GatewayError> {
                Ok(Vec::new())
            }

            async fn create(&self, new: NewPatient) -> Result<Patient, GatewayError> {
                let now = Utc::now();
                Ok(Patient {
                    id: Uuid::new_v4(),
                    full_name: new.full_name,
                    phone: new.phone,
                    email: new.email,
                    created_at: now,
                    updated_at: now,
                })
            }

            async fn update(
                &self,
                id: Uuid,
                _update: PatientUpdate,
            ) -> Result<Patient, GatewayError> {
                Err(GatewayError::NotFound(id))
            }

            async fn delete(&self, _id: Uuid) -> Result<bool, GatewayError> {
                Ok(false)
            }

            async fn search(&self, _query: &str) -> Result<Vec<Patient>, GatewayError> {
                Ok(Vec::new())
            }
        }

        let bus = Arc::new(EventBus::new());
        let coordinator = SyncCoordinator::new(Arc::clone(&bus));
        let reloads = counting_reloader(&coordinator, SyncDomain::Patients);
        coordinator.attach();

        // The full path: store mutation, gateway success, patients event on
        // the bus, debounced table reload.
        let store = PatientStore::new(Arc::new(StubPatientGateway), Arc::clone(&bus));
        store
            .create_patient(NewPatient {
                full_name: "Alice".into(),
                phone: None,
                email: None,
            })
            .await
            .unwrap();

        settle(Duration::from_millis(400)).await;
        assert_eq!(reloads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_pending_reloads() {
        let bus = Arc::new(EventBus::new());
        let coordinator = SyncCoordinator::new(Arc::clone(&bus));
        let reloads = counting_reloader(&coordinator, SyncDomain::Inventory);
        coordinator.attach();

        bus.publish(&change(SyncDomain::Inventory));
        assert_eq!(coordinator.pending_reloads(), 1);
        coordinator.shutdown();

        settle(Duration::from_millis(500)).await;
        assert_eq!(reloads.load(Ordering::SeqCst), 0);
        assert_eq!(coordinator.pending_reloads(), 0);

        // Deregistered: further events schedule nothing.
        bus.publish(&change(SyncDomain::Inventory));
        settle(Duration::from_millis(500)).await;
        assert_eq!(reloads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_refresh_skips_the_debounce_window() {
        let bus = Arc::new(EventBus::new());
        let coordinator = SyncCoordinator::new(Arc::clone(&bus));
        let reloads = counting_reloader(&coordinator, SyncDomain::Patients);
        coordinator.attach();

        coordinator.refresh_table(SyncDomain::Patients).await;
        assert_eq!(reloads.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.pending_reloads(), 0);

        // Unregistered domain: nothing to do, nothing pending.
        coordinator.refresh_table(SyncDomain::Inventory).await;
        assert_eq!(coordinator.pending_reloads(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_all_reloads_every_registered_domain() {
        let bus = Arc::new(EventBus::new());
        let coordinator = SyncCoordinator::new(Arc::clone(&bus));
        let payments = counting_reloader(&coordinator, SyncDomain::Payments);
        let patients = counting_reloader(&coordinator, SyncDomain::Patients);
        coordinator.attach();

        coordinator.refresh_all().await;
        assert_eq!(payments.load(Ordering::SeqCst), 1);
        assert_eq!(patients.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn domain_without_reloader_is_ignored() {
        let bus = Arc::new(EventBus::new());
        let coordinator = SyncCoordinator::new(Arc::clone(&bus));
        coordinator.attach();

        bus.publish(&change(SyncDomain::Appointments));
        settle(Duration::from_millis(400)).await;
        assert_eq!(coordinator.pending_reloads(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn treatment_events_do_not_trigger_table_reloads() {
        let bus = Arc::new(EventBus::new());
        let coordinator = SyncCoordinator::new(Arc::clone(&bus));
        let payments = counting_reloader(&coordinator, SyncDomain::Payments);
        coordinator.attach();

        bus.publish(&change(SyncDomain::Treatments));
        settle(Duration::from_millis(400)).await;
        assert_eq!(payments.load(Ordering::SeqCst), 0);
        assert_eq!(coordinator.pending_reloads(), 0);
    }
}
