//! # zakat-hawl
//!
//! Multi-methodology Zakat calculation and Nisab-year (Hawl) lifecycle engine.
//!
//! - [`calculation::ZakatEngine`] computes zakat over a set of assets under a
//!   methodology, with a step-by-step explanation.
//! - [`service::NisabYearService`] tracks one record per Hawl, guarding every
//!   lifecycle transition and appending to the record's audit trail.
//! - [`scheduler::HawlSweeper`] opens drafts when wealth crosses the Nisab.

pub mod assets;
pub mod audit;
pub mod calculation;
pub mod config;
pub mod hawl;
pub mod inputs;
pub mod lifecycle;
pub mod methodology;
pub mod modifier;
pub mod nisab;
pub mod prelude;
pub mod pricing;
pub mod record;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod types;
pub mod wealth;

pub use calculation::{CalculationRequest, ZakatCalculation, ZakatEngine};
pub use config::EngineConfig;
pub use methodology::MethodologyId;
pub use record::{NisabYearRecord, RecordStatus};
pub use service::NisabYearService;
pub use types::ZakatError;
