use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;
use zakat_hawl::lifecycle::next_status;
use zakat_hawl::modifier::ModifierKind;
use zakat_hawl::nisab::compute_nisab_for;
use zakat_hawl::prelude::*;

const HOLDINGS: [AssetCategory; 7] = [
    AssetCategory::Cash,
    AssetCategory::Gold,
    AssetCategory::Silver,
    AssetCategory::Business,
    AssetCategory::Stocks,
    AssetCategory::Crypto,
    AssetCategory::DebtReceivable,
];

const METHODOLOGIES: [&str; 5] = ["standard", "hanafi", "shafii", "maliki", "hanbali"];

const ACTIONS: [LifecycleAction; 6] = [
    LifecycleAction::Finalize,
    LifecycleAction::Unlock,
    LifecycleAction::Edit,
    LifecycleAction::Refinalize,
    LifecycleAction::Delete,
    LifecycleAction::RefreshAssets,
];

fn prices() -> Prices {
    Prices::new(dec!(65), dec!(0.80)).unwrap()
}

fn cents(value: u64) -> Decimal {
    Decimal::new(value as i64, 2)
}

fn holdings(user: Uuid, raw: &[(usize, u64)]) -> Vec<Asset> {
    raw.iter()
        .map(|(category, value)| Asset::new(user, HOLDINGS[*category], cents(*value)).unwrap())
        .collect()
}

fn calculate(methodology: &str, assets: &[Asset]) -> ZakatCalculation {
    ZakatEngine::default()
        .calculate(&CalculationRequest::new(methodology, "2024-06-01"), assets, &prices())
        .unwrap()
}

proptest! {
    /// Identical inputs give identical results, id included.
    #[test]
    fn calculation_is_deterministic(
        raw in prop::collection::vec((0..HOLDINGS.len(), 0u64..5_000_000), 0..12),
        m in 0..METHODOLOGIES.len(),
    ) {
        let assets = holdings(Uuid::nil(), &raw);
        prop_assert_eq!(calculate(METHODOLOGIES[m], &assets), calculate(METHODOLOGIES[m], &assets));
    }

    /// Adding a holding never lowers zakatable wealth or zakat due.
    #[test]
    fn adding_wealth_is_monotonic(
        raw in prop::collection::vec((0..HOLDINGS.len(), 0u64..5_000_000), 0..10),
        extra in 0u64..5_000_000,
        m in 0..METHODOLOGIES.len(),
    ) {
        let user = Uuid::nil();
        let before = holdings(user, &raw);
        let mut after = before.clone();
        after.push(Asset::cash(user, cents(extra)).unwrap());

        let a = calculate(METHODOLOGIES[m], &before);
        let b = calculate(METHODOLOGIES[m], &after);
        prop_assert!(b.totals.net_zakatable >= a.totals.net_zakatable);
        prop_assert!(b.zakat_due() >= a.zakat_due());
        prop_assert!(!a.meets_nisab || b.meets_nisab);
    }

    /// Below the Nisab every line is zero; receivables never carry due.
    #[test]
    fn zeroing_rules_hold(
        raw in prop::collection::vec((0..HOLDINGS.len(), 0u64..2_000_000), 0..10),
        m in 0..METHODOLOGIES.len(),
    ) {
        let calc = calculate(METHODOLOGIES[m], &holdings(Uuid::nil(), &raw));
        for line in &calc.breakdown {
            if !calc.meets_nisab || line.category == AssetCategory::DebtReceivable {
                prop_assert_eq!(line.zakat_due, Decimal::ZERO);
            }
        }
        let sum: Decimal = calc.breakdown.iter().map(|l| l.zakat_due).sum();
        prop_assert_eq!(sum, calc.zakat_due());
        prop_assert!(calc.zakat_due() <= calc.totals.net_zakatable);
    }

    /// Restricted wins over passive; passive takes 30%.
    #[test]
    fn modifiers_are_exclusive(value in 1u64..5_000_000, passive: bool, restricted: bool) {
        let asset = Asset::new(Uuid::nil(), AssetCategory::Stocks, cents(value))
            .unwrap()
            .passive(passive)
            .restricted(restricted);
        let calc = calculate("standard", std::slice::from_ref(&asset));
        let line = &calc.breakdown[0];

        let expected = match (restricted, passive) {
            (true, _) => (ModifierKind::Restricted, Decimal::ZERO),
            (false, true) => (ModifierKind::Passive, asset.value * dec!(0.3)),
            (false, false) => (ModifierKind::Full, asset.value),
        };
        prop_assert_eq!((line.modifier, line.zakatable_amount), expected);
    }

    /// Thresholds are cent-rounded: a price rise of at least one cent per gram
    /// strictly raises that metal's threshold, and any rise never lowers it.
    #[test]
    fn nisab_follows_prices(
        gold in 1u64..1_000_000,
        silver in 1u64..100_000,
        gold_step in 1u64..10_000,
        silver_step in 1u64..10_000,
        micro in 1u64..100,
        m in 0..METHODOLOGIES.len(),
    ) {
        let methodology: MethodologyId = METHODOLOGIES[m].parse().unwrap();
        let base = compute_nisab_for(cents(gold), cents(silver), methodology).unwrap();
        let dearer = compute_nisab_for(cents(gold + gold_step), cents(silver + silver_step), methodology).unwrap();
        prop_assert!(dearer.gold_nisab > base.gold_nisab);
        prop_assert!(dearer.silver_nisab > base.silver_nisab);
        prop_assert!(dearer.effective_nisab > base.effective_nisab);

        // Sub-cent moves may round away but never invert.
        let nudged = compute_nisab_for(cents(gold) + Decimal::new(micro as i64, 6), cents(silver), methodology).unwrap();
        prop_assert!(nudged.gold_nisab >= base.gold_nisab);
        prop_assert!(nudged.effective_nisab >= base.effective_nisab);

        prop_assert!(base.effective_nisab == base.gold_nisab || base.effective_nisab == base.silver_nisab);
        if base.methodology_basis.is_dual() {
            prop_assert!(base.effective_nisab <= base.gold_nisab);
            prop_assert!(base.effective_nisab <= base.silver_nisab);
        }
    }

    /// Any action sequence stays inside the status set, and only legal actions move it.
    #[test]
    fn lifecycle_is_closed(actions in prop::collection::vec(0..ACTIONS.len(), 0..40)) {
        let mut status = RecordStatus::Draft;
        let mut finalizations = 0;
        for index in actions {
            let action = ACTIONS[index];
            match next_status(status, action) {
                Some(next) => {
                    prop_assert!(status.legal_actions().contains(&action));
                    if next == RecordStatus::Finalized {
                        finalizations += 1;
                    }
                    status = next;
                }
                None => prop_assert!(!status.legal_actions().contains(&action)),
            }
        }
        // Leaving DRAFT is one-way.
        if finalizations > 0 {
            prop_assert_ne!(status, RecordStatus::Draft);
        }
    }
}
