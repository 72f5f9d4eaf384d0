//! Context Bus
//!
//! Session-scoped shared state for the diagnosis pipeline. Every stage and
//! capability port reads and writes the per-session `ContextRecord` through
//! the bus, which owns storage, validation and mutation arbitration.
//!
//! # Architecture
//!
//! - **Record**: `ContextRecord` and the sparse `ContextUpdate`
//! - **Store**: pluggable storage behind `ContextStore` (in-process by default)
//! - **Bus**: `ContextBus`, the single arbitration point for all mutation

pub mod bus;
pub mod record;
pub mod store;

pub use bus::ContextBus;
pub use record::{
    ContextRecord, ContextUpdate, DocumentInput, EnumField, RegionalPayload,
    DIAGNOSIS_UNAVAILABLE, PENDING_DIAGNOSIS,
};
pub use store::{ContextStore, InMemoryContextStore};
