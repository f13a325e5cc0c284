//! Periodic Hawl sweep.
//!
//! Walks every known user, opening drafts where wealth has crossed the Nisab
//! and flagging interruptions on open drafts. A failure for one user is
//! logged and counted; the sweep carries on with the rest.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::assets::InMemoryAssetStore;
use crate::service::{NisabYearService, SweepOutcome};
use crate::types::ZakatError;

/// Source of the users a sweep should visit.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn user_ids(&self) -> Result<Vec<Uuid>, ZakatError>;
}

#[async_trait]
impl UserDirectory for InMemoryAssetStore {
    async fn user_ids(&self) -> Result<Vec<Uuid>, ZakatError> {
        Ok(InMemoryAssetStore::user_ids(self).await)
    }
}

#[async_trait]
impl UserDirectory for Vec<Uuid> {
    async fn user_ids(&self) -> Result<Vec<Uuid>, ZakatError> {
        Ok(self.clone())
    }
}

/// Counts from one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub users: usize,
    pub created: usize,
    pub already_open: usize,
    pub interrupted: usize,
    pub below_nisab: usize,
    pub failed: usize,
}

impl SweepReport {
    fn record(&mut self, outcome: &Result<SweepOutcome, ZakatError>) {
        self.users += 1;
        match outcome {
            Ok(SweepOutcome::Created(_)) => self.created += 1,
            Ok(SweepOutcome::AlreadyOpen(_)) => self.already_open += 1,
            Ok(SweepOutcome::Interrupted(_)) => self.interrupted += 1,
            Ok(SweepOutcome::BelowNisab) => self.below_nisab += 1,
            Err(_) => self.failed += 1,
        }
    }
}

#[derive(Clone)]
pub struct HawlSweeper {
    service: Arc<NisabYearService>,
    users: Arc<dyn UserDirectory>,
}

impl HawlSweeper {
    pub fn new(service: Arc<NisabYearService>, users: Arc<dyn UserDirectory>) -> Self {
        Self { service, users }
    }

    /// Runs one pass over all users.
    pub async fn run_once(&self) -> Result<SweepReport, ZakatError> {
        let users = self.users.user_ids().await?;
        let concurrency = self.service.config().sweep_concurrency.max(1);

        let outcomes: Vec<(Uuid, Result<SweepOutcome, ZakatError>)> = stream::iter(users)
            .map(|user_id| {
                let service = self.service.clone();
                async move { (user_id, service.sweep_user(user_id).await) }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut report = SweepReport::default();
        for (user_id, outcome) in &outcomes {
            if let Err(e) = outcome {
                if e.is_fatal() {
                    tracing::error!(%user_id, error = %e, "sweep failed for user");
                } else {
                    tracing::warn!(%user_id, error = %e, "sweep skipped user");
                }
            }
            report.record(outcome);
        }

        tracing::info!(
            users = report.users,
            created = report.created,
            interrupted = report.interrupted,
            failed = report.failed,
            "hawl sweep complete"
        );
        Ok(report)
    }

    /// Runs a pass every configured sweep interval until `shutdown` flips to true.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let interval = self.service.config().sweep_interval();
        self.spawn_every(interval, shutdown)
    }

    pub fn spawn_every(self, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tracing::debug!(?interval, "starting hawl sweeper");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once().await {
                            tracing::error!(error = %e, "hawl sweep could not list users");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::debug!("hawl sweeper stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}
