use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use rust_decimal_macros::dec;
use uuid::Uuid;
use zakat_hawl::prelude::*;
use zakat_hawl::record::FieldChange;

struct Fixture {
    service: Arc<NisabYearService>,
    records: Arc<InMemoryRecordStore>,
    assets: Arc<InMemoryAssetStore>,
    clock: ManualClock,
    user: Uuid,
    cash: Asset,
}

async fn fixture() -> Fixture {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let records = Arc::new(InMemoryRecordStore::new());
    let assets = Arc::new(InMemoryAssetStore::new());
    let user = Uuid::new_v4();
    let cash = Asset::cash(user, 10_000).unwrap().named("Savings");
    assets.upsert(cash.clone()).await;
    let clock = ManualClock::at_date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
    let service = Arc::new(
        NisabYearService::new(
            records.clone(),
            assets.clone(),
            Arc::new(StaticPriceOracle::new(65, 0.80).unwrap()),
        )
        .with_clock(Arc::new(clock.clone())),
    );
    Fixture { service, records, assets, clock, user, cash }
}

impl Fixture {
    /// Stored status, version and audit trail length.
    async fn snapshot(&self, id: Uuid) -> (RecordStatus, u64, usize) {
        let stored = self.records.get_record(id).await.unwrap().unwrap();
        let trail = self.service.audit_trail(self.user, id).await.unwrap();
        (stored.status, stored.version, trail.len())
    }

    async fn assert_rejected<T: std::fmt::Debug>(
        &self,
        result: Result<T, ZakatError>,
        before: (RecordStatus, u64, usize),
    ) {
        let err = result.unwrap_err();
        assert_eq!(err.code(), "INVALID_TRANSITION", "{err}");
        let id = match &err {
            ZakatError::InvalidTransition { record_id, .. } => *record_id,
            other => panic!("unexpected error {other:?}"),
        };
        assert_eq!(self.snapshot(id).await, before);
    }

    fn complete_hawl(&self, record: &NisabYearRecord) {
        self.clock
            .set(record.hawl_completion_date.and_time(NaiveTime::MIN).and_utc());
    }
}

#[tokio::test]
async fn test_full_cycle_audit_order() {
    let f = fixture().await;
    let record = f.service.create_record(f.user, &CreateRecordRequest::default()).await.unwrap();
    f.complete_hawl(&record);

    let finalized = f.service.finalize(f.user, record.id).await.unwrap();
    assert_eq!(finalized.status, RecordStatus::Finalized);
    assert!(finalized.finalized_at.is_some());

    f.service.unlock(f.user, record.id, "Forgot the gold jewelry").await.unwrap();
    let patch = RecordPatch {
        zakat_due: Some(dec!(275)),
        ..Default::default()
    };
    let edited = f.service.update_record(f.user, record.id, &patch).await.unwrap();
    assert_eq!(edited.zakat_due, dec!(275));
    let relocked = f.service.refinalize(f.user, record.id).await.unwrap();
    assert_eq!(relocked.status, RecordStatus::Finalized);

    let trail = f.service.audit_trail(f.user, record.id).await.unwrap();
    let events: Vec<AuditEventType> = trail.iter().map(|e| e.event_type()).collect();
    assert_eq!(
        events,
        vec![
            AuditEventType::Finalized,
            AuditEventType::Unlocked,
            AuditEventType::Edited,
            AuditEventType::Refinalized,
        ]
    );
    assert!(trail.windows(2).all(|w| w[0].timestamp() <= w[1].timestamp()));
    assert!(trail.iter().all(|e| e.actor_id() == f.user));

    match trail[2].details() {
        AuditDetails::Edited { changes } => assert_eq!(
            changes,
            &vec![FieldChange::ZakatDue { before: dec!(250.00), after: dec!(275) }]
        ),
        other => panic!("unexpected details {other:?}"),
    }
    match trail[3].details() {
        AuditDetails::Refinalized { totals } => assert_eq!(totals.zakat_due, dec!(275)),
        other => panic!("unexpected details {other:?}"),
    }
}

#[tokio::test]
async fn test_illegal_actions_are_rejected() {
    let f = fixture().await;
    let record = f.service.create_record(f.user, &CreateRecordRequest::default()).await.unwrap();
    let patch = RecordPatch {
        notes: Some("note".into()),
        ..Default::default()
    };

    let before = f.snapshot(record.id).await;
    assert_eq!(before.0, RecordStatus::Draft);
    f.assert_rejected(f.service.unlock(f.user, record.id, "Long enough reason").await, before)
        .await;
    f.assert_rejected(f.service.update_record(f.user, record.id, &patch).await, before)
        .await;
    f.assert_rejected(f.service.refinalize(f.user, record.id).await, before)
        .await;

    f.complete_hawl(&record);
    f.service.finalize(f.user, record.id).await.unwrap();
    let finalized = f.snapshot(record.id).await;
    assert_eq!(finalized.0, RecordStatus::Finalized);
    f.assert_rejected(f.service.update_record(f.user, record.id, &patch).await, finalized)
        .await;
    f.assert_rejected(f.service.finalize(f.user, record.id).await, finalized)
        .await;
    f.assert_rejected(f.service.refinalize(f.user, record.id).await, finalized)
        .await;
    f.assert_rejected(f.service.delete_record(f.user, record.id).await, finalized)
        .await;
    f.assert_rejected(f.service.refresh_assets(f.user, record.id).await, finalized)
        .await;

    f.service.unlock(f.user, record.id, "Forgot the gold jewelry").await.unwrap();
    let unlocked = f.snapshot(record.id).await;
    assert_eq!(unlocked.0, RecordStatus::Unlocked);
    f.assert_rejected(f.service.finalize(f.user, record.id).await, unlocked)
        .await;
    f.assert_rejected(f.service.unlock(f.user, record.id, "Another long reason").await, unlocked)
        .await;
    f.assert_rejected(f.service.delete_record(f.user, record.id).await, unlocked)
        .await;
    f.assert_rejected(f.service.refresh_assets(f.user, record.id).await, unlocked)
        .await;
}

#[tokio::test]
async fn test_concurrent_finalize_has_one_winner() {
    let f = fixture().await;
    let record = f.service.create_record(f.user, &CreateRecordRequest::default()).await.unwrap();
    f.complete_hawl(&record);

    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let service = f.service.clone();
            let (user, id) = (f.user, record.id);
            tokio::spawn(async move { service.finalize(user, id).await })
        })
        .collect();

    let mut ok = 0;
    let mut invalid = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => ok += 1,
            Err(e) if e.code() == "INVALID_TRANSITION" => invalid += 1,
            Err(e) => panic!("unexpected error {e}"),
        }
    }
    assert_eq!((ok, invalid), (1, 1));
    assert_eq!(f.service.audit_trail(f.user, record.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_one_open_draft_per_user() {
    let f = fixture().await;
    let first = f.service.create_record(f.user, &CreateRecordRequest::default()).await.unwrap();
    let err = f
        .service
        .create_record(f.user, &CreateRecordRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");

    f.service.delete_record(f.user, first.id).await.unwrap();
    assert_eq!(
        f.service.get_record(f.user, first.id).await.unwrap_err().code(),
        "NOT_FOUND"
    );
    assert!(f.service.create_record(f.user, &CreateRecordRequest::default()).await.is_ok());
}

#[tokio::test]
async fn test_draft_reads_live_totals_against_locked_nisab() {
    let f = fixture().await;
    let record = f.service.create_record(f.user, &CreateRecordRequest::default()).await.unwrap();
    assert_eq!(record.zakat_due, dec!(250.00));

    f.assets
        .upsert(Asset::new(f.user, AssetCategory::Stocks, 2_000).unwrap())
        .await;

    // Same stores, new prices: the locked Nisab must not move.
    let repriced = NisabYearService::new(
        f.records.clone(),
        f.assets.clone(),
        Arc::new(StaticPriceOracle::new(90, 2).unwrap()),
    )
    .with_clock(Arc::new(f.clock.clone()));

    let live = repriced.get_record(f.user, record.id).await.unwrap();
    assert_eq!(live.zakatable_wealth, dec!(12000));
    assert_eq!(live.zakat_due, dec!(300.00));
    assert_eq!(live.nisab, record.nisab);

    // Reads are not persisted.
    let stored = f.records.get_record(record.id).await.unwrap().unwrap();
    assert_eq!(stored.zakat_due, dec!(250.00));

    let refreshed = repriced.refresh_assets(f.user, record.id).await.unwrap();
    assert_eq!(refreshed.asset_breakdown.len(), 2);
    assert_eq!(refreshed.nisab_threshold_at_start(), dec!(489.89));
    assert_eq!(refreshed.version, record.version + 1);
    assert!(f.service.audit_trail(f.user, record.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_dropping_below_nisab_interrupts_draft() {
    let f = fixture().await;
    let record = f.service.create_record(f.user, &CreateRecordRequest::default()).await.unwrap();

    f.assets.remove(f.user, f.cash.id).await;
    f.assets.upsert(Asset::cash(f.user, 100).unwrap()).await;

    let updated = f.service.on_assets_changed(f.user).await.unwrap().unwrap();
    assert!(updated.interrupted);
    assert!(updated.interrupted_at.is_some());
    assert_eq!(updated.status, RecordStatus::Draft);
    assert_eq!(updated.zakatable_wealth, dec!(100));
    assert!(f.service.audit_trail(f.user, record.id).await.unwrap().is_empty());

    let outcome = f.service.sweep_user(f.user).await.unwrap();
    assert_eq!(outcome, SweepOutcome::Interrupted(record.id));
}

#[tokio::test]
async fn test_sweep_is_idempotent() {
    let f = fixture().await;
    let sweeper = HawlSweeper::new(f.service.clone(), f.assets.clone());

    let first = sweeper.run_once().await.unwrap();
    assert_eq!(first.created, 1);
    for _ in 0..3 {
        let again = sweeper.run_once().await.unwrap();
        assert_eq!(again.created, 0);
        assert_eq!(again.already_open, 1);
    }
    assert_eq!(f.service.list_records(f.user).await.unwrap().len(), 1);

    let draft = f.records.open_draft(f.user).await.unwrap().unwrap();
    assert_eq!(draft.hawl_start_date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
    assert!(draft.hawl_completion_date > draft.hawl_start_date);
}

#[tokio::test]
async fn test_sweep_opens_new_hawl_after_finalization() {
    let f = fixture().await;
    let first = match f.service.sweep_user(f.user).await.unwrap() {
        SweepOutcome::Created(id) => id,
        other => panic!("expected a new draft, got {other:?}"),
    };
    let record = f.service.get_record(f.user, first).await.unwrap();
    f.complete_hawl(&record);
    f.service.finalize(f.user, first).await.unwrap();

    match f.service.sweep_user(f.user).await.unwrap() {
        SweepOutcome::Created(id) => assert_ne!(id, first),
        other => panic!("expected a new draft, got {other:?}"),
    }
    assert_eq!(f.service.list_records(f.user).await.unwrap().len(), 2);
}
