//! Change notification bus — typed in-process publish/subscribe.
//!
//! Every data store announces its mutations here so unrelated UI surfaces
//! stay consistent without direct coupling. Channels are a closed enum
//! rather than free-form strings: a mistyped channel is a compile error,
//! and every event's payload shape is fixed by its variant.
//!
//! Delivery is synchronous and in registration order. A subscriber that
//! panics is isolated: the panic is caught and logged, and delivery
//! continues with the next subscriber. Purely in-memory: no persistence,
//! no replay across restarts.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use uuid::Uuid;

// ═══════════════════════════════════════════════════════════
// Domains, actions, channels
// ═══════════════════════════════════════════════════════════

/// One category of persisted entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncDomain {
    Appointments,
    Payments,
    Patients,
    Prescriptions,
    Inventory,
    Treatments,
}

impl SyncDomain {
    /// The five domains whose UI tables the sync coordinator refreshes.
    pub const TABLE_DOMAINS: [SyncDomain; 5] = [
        SyncDomain::Appointments,
        SyncDomain::Payments,
        SyncDomain::Patients,
        SyncDomain::Prescriptions,
        SyncDomain::Inventory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Appointments => "appointments",
            Self::Payments => "payments",
            Self::Patients => "patients",
            Self::Prescriptions => "prescriptions",
            Self::Inventory => "inventory",
            Self::Treatments => "treatments",
        }
    }
}

/// What happened to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeAction {
    Created,
    Updated,
    Deleted,
}

/// A named broadcast channel.
///
/// Specific actions get their own channel plus a per-domain catch-all, so
/// subscribers choose their granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Added(SyncDomain),
    Updated(SyncDomain),
    Deleted(SyncDomain),
    /// Catch-all: every create/update/delete within the domain.
    Changed(SyncDomain),
    /// Treatments for one patient finished loading (cache hit or fetch).
    TreatmentsLoaded,
    /// A treatment read failed; the UI shows an error indicator.
    TreatmentLoadError,
    /// Rendering-critical tooth colour refresh, kept off the debounced path.
    ToothColorUpdate,
    /// A treatment was deleted; payment listeners drop its payments.
    TreatmentPaymentsDeleted,
}

// ═══════════════════════════════════════════════════════════
// ChangeEvent — the broadcast message
// ═══════════════════════════════════════════════════════════

/// An immutable broadcast message announcing a domain mutation.
///
/// Constructed at the moment a mutation succeeds against the gateway,
/// consumed by any number of listeners, then discarded.
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    Record {
        domain: SyncDomain,
        action: ChangeAction,
        id: Uuid,
    },
    TreatmentsLoaded {
        patient_id: Uuid,
        count: usize,
        from_cache: bool,
    },
    TreatmentLoadError {
        patient_id: Uuid,
        message: String,
    },
    ToothColorUpdate {
        treatment_id: Uuid,
        patient_id: Uuid,
    },
    TreatmentPaymentsDeleted {
        treatment_id: Uuid,
    },
}

impl ChangeEvent {
    /// Channels this event is delivered on: specific first, catch-all second.
    pub fn channels(&self) -> Vec<Channel> {
        match self {
            Self::Record { domain, action, .. } => {
                let specific = match action {
                    ChangeAction::Created => Channel::Added(*domain),
                    ChangeAction::Updated => Channel::Updated(*domain),
                    ChangeAction::Deleted => Channel::Deleted(*domain),
                };
                vec![specific, Channel::Changed(*domain)]
            }
            Self::TreatmentsLoaded { .. } => vec![Channel::TreatmentsLoaded],
            Self::TreatmentLoadError { .. } => vec![Channel::TreatmentLoadError],
            Self::ToothColorUpdate { .. } => vec![Channel::ToothColorUpdate],
            Self::TreatmentPaymentsDeleted { .. } => vec![Channel::TreatmentPaymentsDeleted],
        }
    }
}

// ═══════════════════════════════════════════════════════════
// EventBus
// ═══════════════════════════════════════════════════════════

/// Handle returned by `subscribe`, used to deregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId {
    channel: Channel,
    seq: u64,
}

type Handler = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

struct Subscriber {
    seq: u64,
    handler: Handler,
}

/// Process-wide publish/subscribe bus.
///
/// Subscribing the same closure twice registers it twice; idempotence is
/// the caller's responsibility.
pub struct EventBus {
    inner: Mutex<BusInner>,
}

struct BusInner {
    next_seq: u64,
    subscribers: HashMap<Channel, Vec<Subscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BusInner {
                next_seq: 0,
                subscribers: HashMap::new(),
            }),
        }
    }

    /// Register a handler on one channel. Handlers fire in registration order.
    pub fn subscribe<F>(&self, channel: Channel, handler: F) -> SubscriptionId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let mut inner = self.lock_inner();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.subscribers.entry(channel).or_default().push(Subscriber {
            seq,
            handler: Arc::new(handler),
        });
        SubscriptionId { channel, seq }
    }

    /// Deregister a previously subscribed handler. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut inner = self.lock_inner();
        if let Some(subs) = inner.subscribers.get_mut(&id.channel) {
            subs.retain(|s| s.seq != id.seq);
        }
    }

    /// Deliver an event to every subscriber of each of its channels.
    ///
    /// Handlers run outside the registry lock, so a handler may subscribe
    /// or unsubscribe reentrantly without deadlocking.
    pub fn publish(&self, event: &ChangeEvent) {
        for channel in event.channels() {
            let handlers: Vec<Handler> = {
                let inner = self.lock_inner();
                inner
                    .subscribers
                    .get(&channel)
                    .map(|subs| subs.iter().map(|s| Arc::clone(&s.handler)).collect())
                    .unwrap_or_default()
            };
            for handler in handlers {
                if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                    tracing::error!(?channel, "event subscriber panicked; continuing delivery");
                }
            }
        }
    }

    /// Number of handlers currently registered on a channel.
    pub fn subscriber_count(&self, channel: Channel) -> usize {
        self.lock_inner()
            .subscribers
            .get(&channel)
            .map(Vec::len)
            .unwrap_or(0)
    }

    // The registry holds no invariant a panicking handler could break, so a
    // poisoned lock is recovered rather than propagated.
    fn lock_inner(&self) -> std::sync::MutexGuard<'_, BusInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
