//! Nisab-year service: the request-level operations over records.
//!
//! Every lifecycle write goes through [`NisabYearService::mutate`], which
//! re-reads the record, re-checks the transition, verifies the audit trail
//! and commits with compare-and-swap on the record version. A writer that
//! loses the race re-reads and sees the new status, so two concurrent
//! finalizations produce one success and one `InvalidTransition`.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::assets::AssetStore;
use crate::audit::{AuditDetails, AuditTrailEntry, FrozenTotals, verify_append, verify_audit_trail};
use crate::calculation::{CalculationRequest, ValidatedRequest, ZakatCalculation, ZakatEngine};
use crate::config::EngineConfig;
use crate::hawl::{Clock, HawlPeriod, SystemClock};
use crate::lifecycle::{LifecycleAction, transition};
use crate::methodology::{self, CustomRules, MethodologyId, MethodologyRules};
use crate::nisab::{self, NisabInfo};
use crate::pricing::{CachedPriceOracle, PriceOracle};
use crate::record::{NisabYearRecord, RecordPatch, RecordTotals};
use crate::store::RecordStore;
use crate::types::ZakatError;

/// Compare-and-swap attempts before a write gives up.
const MAX_WRITE_ATTEMPTS: usize = 8;

/// Manual record creation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateRecordRequest {
    #[serde(default)]
    pub methodology: Option<String>,
    #[serde(default)]
    pub custom_rules: Option<CustomRules>,
    /// Defaults to today.
    #[serde(default)]
    pub hawl_start_date: Option<NaiveDate>,
}

/// What one sweep pass did for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "recordId", rename_all = "camelCase")]
pub enum SweepOutcome {
    /// Wealth crossed the Nisab and a draft was opened.
    Created(Uuid),
    /// A draft was already open; its live totals were refreshed.
    AlreadyOpen(Uuid),
    /// The open draft's wealth fell below its locked Nisab.
    Interrupted(Uuid),
    BelowNisab,
}

pub struct NisabYearService {
    records: Arc<dyn RecordStore>,
    assets: Arc<dyn AssetStore>,
    oracle: Arc<dyn PriceOracle>,
    clock: Arc<dyn Clock>,
    engine: ZakatEngine,
    config: EngineConfig,
}

impl std::fmt::Debug for NisabYearService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NisabYearService")
            .field("engine", &self.engine)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl NisabYearService {
    pub fn new(
        records: Arc<dyn RecordStore>,
        assets: Arc<dyn AssetStore>,
        oracle: Arc<dyn PriceOracle>,
    ) -> Self {
        Self {
            records,
            assets,
            oracle,
            clock: Arc::new(SystemClock),
            engine: ZakatEngine::default(),
            config: EngineConfig::default(),
        }
    }

    /// Builds a service whose upstream oracle is wrapped in a cache tuned by `config`.
    pub fn from_config(
        records: Arc<dyn RecordStore>,
        assets: Arc<dyn AssetStore>,
        upstream: Arc<dyn PriceOracle>,
        config: EngineConfig,
    ) -> Self {
        let oracle = CachedPriceOracle::from_config(upstream, &config);
        Self::new(records, assets, Arc::new(oracle)).with_config(config)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_engine(mut self, engine: ZakatEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Nisab at current prices.
    pub async fn current_nisab(
        &self,
        methodology: MethodologyId,
        custom_rules: Option<&CustomRules>,
    ) -> Result<NisabInfo, ZakatError> {
        let rules = methodology::resolve(methodology, custom_rules)?;
        self.nisab_for(&rules).await
    }

    async fn nisab_for(&self, rules: &MethodologyRules) -> Result<NisabInfo, ZakatError> {
        let prices = self.oracle.get_prices().await?;
        nisab::compute_nisab(prices.gold_per_gram, prices.silver_per_gram, rules)
    }

    /// Calculates zakat over the user's assets at current prices.
    pub async fn calculate(
        &self,
        user_id: Uuid,
        request: &CalculationRequest,
    ) -> Result<ZakatCalculation, ZakatError> {
        let validated = self.engine.validate(request)?;
        let assets = self.assets.list_assets(user_id, None).await?;
        let nisab = self.nisab_for(&validated.rules).await?;
        self.engine.calculate_with_nisab(&validated, &assets, nisab)
    }

    /// Opens a draft record by hand.
    pub async fn create_record(
        &self,
        user_id: Uuid,
        request: &CreateRecordRequest,
    ) -> Result<NisabYearRecord, ZakatError> {
        let methodology = match request.methodology.as_deref() {
            Some(raw) => MethodologyId::parse(raw)?,
            None => self.config.default_methodology,
        };
        let rules = methodology::resolve(methodology, request.custom_rules.as_ref())?;

        let today = self.clock.today();
        let start = request.hawl_start_date.unwrap_or(today);
        if start > today {
            return Err(ZakatError::validation("hawlStartDate", "cannot start a Hawl in the future"));
        }

        if let Some(existing) = self.records.open_draft(user_id).await? {
            return Err(ZakatError::validation(
                "userId",
                format!("user already has an open draft record {}", existing.id),
            ));
        }

        let nisab = self.nisab_for(&rules).await?;
        let record = self
            .open_draft(user_id, rules, request.custom_rules.clone(), nisab, start)
            .await?;

        if !self.records.create_draft(&record).await? {
            return Err(ZakatError::validation("userId", "user already has an open draft record"));
        }
        tracing::info!(record_id = %record.id, %user_id, "opened draft record");
        Ok(record)
    }

    async fn open_draft(
        &self,
        user_id: Uuid,
        rules: MethodologyRules,
        custom_rules: Option<CustomRules>,
        nisab: NisabInfo,
        start: NaiveDate,
    ) -> Result<NisabYearRecord, ZakatError> {
        let assets = self.assets.list_assets(user_id, None).await?;
        let calculation =
            self.engine
                .calculate_with_nisab(&ValidatedRequest::for_rules(rules, start), &assets, nisab)?;
        let period = HawlPeriod::starting(self.engine.calendar().as_ref(), start, self.config.hawl)?;
        Ok(NisabYearRecord::open_draft(user_id, custom_rules, period, &calculation, self.clock.now()))
    }

    async fn load_owned(&self, user_id: Uuid, record_id: Uuid) -> Result<NisabYearRecord, ZakatError> {
        match self.records.get_record(record_id).await? {
            Some(record) if record.user_id == user_id => Ok(record),
            _ => Err(ZakatError::not_found("record", record_id)),
        }
    }

    /// Recomputes a record's totals against its locked Nisab.
    async fn live_calculation(&self, record: &NisabYearRecord) -> Result<ZakatCalculation, ZakatError> {
        let rules = methodology::resolve(record.methodology, record.custom_rules.as_ref())?;
        let assets = self.assets.list_assets(record.user_id, None).await?;
        let request = ValidatedRequest::for_rules(rules, self.clock.today());
        self.engine.calculate_with_nisab(&request, &assets, record.nisab.clone())
    }

    /// Fetches a record. Draft totals are computed live and not persisted.
    pub async fn get_record(&self, user_id: Uuid, record_id: Uuid) -> Result<NisabYearRecord, ZakatError> {
        let mut record = self.load_owned(user_id, record_id).await?;
        if record.is_draft() {
            let live = self.live_calculation(&record).await?;
            record.apply_totals(RecordTotals::from(&live));
        }
        Ok(record)
    }

    pub async fn list_records(&self, user_id: Uuid) -> Result<Vec<NisabYearRecord>, ZakatError> {
        let mut records = self.records.list_records(user_id).await?;
        for record in records.iter_mut().filter(|r| r.is_draft()) {
            let live = self.live_calculation(record).await?;
            record.apply_totals(RecordTotals::from(&live));
        }
        Ok(records)
    }

    /// Applies a lifecycle action with optimistic concurrency.
    ///
    /// `apply` edits the re-read record and returns the audit details to append.
    async fn mutate<F>(
        &self,
        user_id: Uuid,
        record_id: Uuid,
        action: LifecycleAction,
        mut apply: F,
    ) -> Result<NisabYearRecord, ZakatError>
    where
        F: FnMut(&mut NisabYearRecord, DateTime<Utc>) -> Result<Option<AuditDetails>, ZakatError> + Send,
    {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let current = self.load_owned(user_id, record_id).await?;
            let next = transition(record_id, current.status, action)?;

            let trail = self.records.audit_trail(record_id).await?;
            verify_audit_trail(record_id, &trail)?;

            let now = self.clock.now();
            let mut updated = current.clone();
            let details = apply(&mut updated, now)?;
            updated.status = next;
            updated.version = current.version + 1;
            updated.updated_at = now;

            let entry = match details {
                Some(details) => {
                    let at = trail.last().map_or(now, |last| now.max(last.timestamp()));
                    let entry = AuditTrailEntry::new(record_id, trail.len() as u64, at, user_id, details);
                    verify_append(record_id, &trail, &entry)?;
                    Some(entry)
                }
                None => None,
            };

            if self.records.save_record(&updated, current.version, entry.as_ref()).await? {
                if let Some(entry) = &entry {
                    tracing::info!(
                        %record_id,
                        event = %entry.event_type(),
                        sequence = entry.sequence(),
                        from = %current.status,
                        to = %updated.status,
                        "record transitioned"
                    );
                }
                return Ok(updated);
            }

            tracing::debug!(%record_id, %action, "version conflict; retrying");
        }

        Err(ZakatError::Storage(format!(
            "record {} is being modified concurrently",
            record_id
        )))
    }

    /// Finalizes a draft once its Hawl has completed.
    pub async fn finalize(&self, user_id: Uuid, record_id: Uuid) -> Result<NisabYearRecord, ZakatError> {
        let record = self.load_owned(user_id, record_id).await?;
        transition(record_id, record.status, LifecycleAction::Finalize)?;
        let live = RecordTotals::from(&self.live_calculation(&record).await?);
        let today = self.clock.today();

        self.mutate(user_id, record_id, LifecycleAction::Finalize, |record, now| {
            if today < record.hawl_completion_date {
                return Err(ZakatError::PrematureFinalization {
                    record_id: record.id,
                    completion_date: record.hawl_completion_date,
                });
            }
            record.apply_totals(live);
            record.finalized_at = Some(now);
            Ok(Some(AuditDetails::Finalized { totals: FrozenTotals::from(&*record) }))
        })
        .await
    }

    /// Unlocks a finalized record for correction.
    pub async fn unlock(
        &self,
        user_id: Uuid,
        record_id: Uuid,
        reason: &str,
    ) -> Result<NisabYearRecord, ZakatError> {
        let reason = reason.trim();
        let min = self.config.unlock_reason_min_len;
        if reason.chars().count() < min {
            return Err(ZakatError::validation(
                "reason",
                format!("unlock reason must be at least {} characters", min),
            ));
        }

        self.mutate(user_id, record_id, LifecycleAction::Unlock, |_, _| {
            Ok(Some(AuditDetails::Unlocked { reason: reason.to_string() }))
        })
        .await
    }

    /// Edits an unlocked record.
    pub async fn update_record(
        &self,
        user_id: Uuid,
        record_id: Uuid,
        patch: &RecordPatch,
    ) -> Result<NisabYearRecord, ZakatError> {
        patch.validate()?;
        self.mutate(user_id, record_id, LifecycleAction::Edit, |record, _| {
            let changes = patch.apply(record)?;
            Ok(Some(AuditDetails::Edited { changes }))
        })
        .await
    }

    /// Locks an unlocked record again.
    pub async fn refinalize(&self, user_id: Uuid, record_id: Uuid) -> Result<NisabYearRecord, ZakatError> {
        self.mutate(user_id, record_id, LifecycleAction::Refinalize, |record, now| {
            record.finalized_at = Some(now);
            Ok(Some(AuditDetails::Refinalized { totals: FrozenTotals::from(&*record) }))
        })
        .await
    }

    /// Re-captures a draft's asset snapshot. The locked Nisab is kept.
    pub async fn refresh_assets(&self, user_id: Uuid, record_id: Uuid) -> Result<NisabYearRecord, ZakatError> {
        let record = self.load_owned(user_id, record_id).await?;
        transition(record_id, record.status, LifecycleAction::RefreshAssets)?;
        let live = self.live_calculation(&record).await?;

        self.mutate(user_id, record_id, LifecycleAction::RefreshAssets, |record, now| {
            record.refresh_from(&live, now);
            Ok(None)
        })
        .await
    }

    /// Deletes a draft.
    pub async fn delete_record(&self, user_id: Uuid, record_id: Uuid) -> Result<(), ZakatError> {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let record = self.load_owned(user_id, record_id).await?;
            transition(record_id, record.status, LifecycleAction::Delete)?;
            if self.records.delete_record(record_id, record.version).await? {
                tracing::info!(%record_id, %user_id, "deleted draft record");
                return Ok(());
            }
        }
        Err(ZakatError::Storage(format!(
            "record {} is being modified concurrently",
            record_id
        )))
    }

    /// Verified audit trail of a record.
    pub async fn audit_trail(&self, user_id: Uuid, record_id: Uuid) -> Result<Vec<AuditTrailEntry>, ZakatError> {
        self.load_owned(user_id, record_id).await?;
        let trail = self.records.audit_trail(record_id).await?;
        verify_audit_trail(record_id, &trail)?;
        Ok(trail)
    }

    /// Recomputes the open draft's derived totals after an asset change.
    ///
    /// Writes no audit entry. Returns the updated draft, if any.
    pub async fn on_assets_changed(&self, user_id: Uuid) -> Result<Option<NisabYearRecord>, ZakatError> {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let Some(draft) = self.records.open_draft(user_id).await? else {
                return Ok(None);
            };

            let live = self.live_calculation(&draft).await?;
            let now = self.clock.now();
            let mut updated = draft.clone();
            let mut changed = updated.apply_totals(RecordTotals::from(&live));

            if !live.meets_nisab && updated.mark_interrupted(now) {
                tracing::warn!(
                    record_id = %draft.id,
                    %user_id,
                    zakatable = %live.totals.net_zakatable,
                    nisab = %draft.nisab_threshold_at_start(),
                    "wealth fell below the locked nisab; hawl interrupted"
                );
                changed = true;
            }

            if !changed {
                return Ok(Some(draft));
            }

            updated.version = draft.version + 1;
            updated.updated_at = now;
            if self.records.save_record(&updated, draft.version, None).await? {
                tracing::debug!(record_id = %updated.id, "recomputed draft totals");
                return Ok(Some(updated));
            }
        }
        Err(ZakatError::Storage(format!(
            "open draft of user {} is being modified concurrently",
            user_id
        )))
    }

    /// One background-sweep step for one user. Idempotent while a draft is open.
    pub async fn sweep_user(&self, user_id: Uuid) -> Result<SweepOutcome, ZakatError> {
        if let Some(draft) = self.on_assets_changed(user_id).await? {
            return Ok(if draft.interrupted {
                SweepOutcome::Interrupted(draft.id)
            } else {
                SweepOutcome::AlreadyOpen(draft.id)
            });
        }

        let rules = methodology::resolve(self.config.default_methodology, None)?;
        let nisab = self.nisab_for(&rules).await?;
        let record = self
            .open_draft(user_id, rules, None, nisab, self.clock.today())
            .await?;

        if record.zakatable_wealth < record.nisab_threshold_at_start() || record.zakatable_wealth.is_zero() {
            return Ok(SweepOutcome::BelowNisab);
        }

        if self.records.create_draft(&record).await? {
            tracing::info!(
                record_id = %record.id,
                %user_id,
                hawl_completion = %record.hawl_completion_date,
                "nisab reached; opened draft record"
            );
            return Ok(SweepOutcome::Created(record.id));
        }

        // Lost a race with another creator.
        match self.records.open_draft(user_id).await? {
            Some(existing) => Ok(SweepOutcome::AlreadyOpen(existing.id)),
            None => Err(ZakatError::Storage(format!(
                "draft for user {} could not be created",
                user_id
            ))),
        }
    }
}
