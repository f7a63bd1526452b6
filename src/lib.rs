//! Dentara — local-first dental clinic data core.
//!
//! The live core is three pieces: the treatment store (per-patient cached
//! snapshots over an out-of-process gateway), the change notification bus
//! (typed in-process pub/sub), and the sync coordinator (per-domain
//! debounced table refresh). Stores are constructed once at application
//! start and injected into consumers; cross-store interaction happens only
//! through bus events, never through shared mutable references.
//!
//! The maintenance module is a separate one-shot repair path over the
//! database file, used by the `repair` binary.

pub mod config;
pub mod dentition;
pub mod events;
pub mod gateway;
pub mod maintenance;
pub mod models;
pub mod patients;
pub mod sync;
pub mod treatments;

pub use events::{ChangeAction, ChangeEvent, Channel, EventBus, SubscriptionId, SyncDomain};
pub use gateway::{GatewayError, PatientGateway, TreatmentGateway};
pub use patients::{PatientStore, PatientStoreError};
pub use sync::{ReloadFn, SyncCoordinator};
pub use treatments::{TreatmentStore, TreatmentStoreConfig, TreatmentStoreError};
