use std::time::{Duration, Instant};

use rust_decimal_macros::dec;
use strum::IntoEnumIterator;
use uuid::Uuid;
use zakat_hawl::prelude::*;

#[test]
fn test_five_hundred_assets_under_budget() {
    let user = Uuid::new_v4();
    let categories: Vec<AssetCategory> = AssetCategory::iter().collect();
    let assets: Vec<Asset> = (0..500)
        .map(|i| {
            let category = categories[i % categories.len()];
            Asset::new(user, category, 100 + i as i64)
                .unwrap()
                .named(format!("asset-{i}"))
                .passive(i % 7 == 0)
        })
        .collect();

    let engine = ZakatEngine::default();
    let prices = Prices::new(dec!(65), dec!(0.80)).unwrap();
    let request = CalculationRequest::new("standard", "2024-06-01");

    // Warm up lazies.
    engine.calculate(&request, &assets[..1], &prices).unwrap();

    let started = Instant::now();
    let calc = engine.calculate(&request, &assets, &prices).unwrap();
    let elapsed = started.elapsed();

    assert_eq!(calc.breakdown.len(), 500);
    assert!(calc.meets_nisab);
    assert!(elapsed < Duration::from_millis(100), "aggregation took {elapsed:?}");
}
