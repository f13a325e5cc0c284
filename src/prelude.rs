//! Prelude module for zakat-hawl
//!
//! Re-exports the types most callers need.
//!
//! ```rust
//! use zakat_hawl::prelude::*;
//! ```

pub use crate::assets::{Asset, AssetCategory, AssetFilter, AssetStore, InMemoryAssetStore};
pub use crate::audit::{AuditDetails, AuditEventType, AuditTrailEntry};
pub use crate::calculation::{CalculationRequest, CalendarType, ZakatCalculation, ZakatEngine};
pub use crate::config::EngineConfig;
pub use crate::hawl::{Clock, HawlPeriod, HijriDate, IslamicCivilCalendar, ManualClock, SystemClock};
pub use crate::inputs::IntoZakatDecimal;
pub use crate::lifecycle::LifecycleAction;
pub use crate::methodology::{CustomNisabBasis, CustomRules, MethodologyId, NisabBasis};
pub use crate::nisab::{NisabInfo, NisabSource};
pub use crate::pricing::{CachedPriceOracle, Metal, MetalPrice, PriceOracle, Prices, StaticPriceOracle};
pub use crate::record::{NisabYearRecord, RecordPatch, RecordStatus};
pub use crate::scheduler::{HawlSweeper, SweepReport};
pub use crate::service::{CreateRecordRequest, NisabYearService, SweepOutcome};
pub use crate::store::{InMemoryRecordStore, RecordStore};
pub use crate::types::ZakatError;
