//! Zakat calculation engine.
//!
//! [`ZakatEngine::calculate`] is the one canonical calculation: it filters
//! the requested assets, aggregates them under the methodology's rules,
//! compares the net zakatable wealth with the Nisab and produces a
//! [`ZakatCalculation`] with an ordered explanation. The lifecycle uses
//! [`ZakatEngine::calculate_with_nisab`] to evaluate a record against the
//! Nisab locked at its Hawl start.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::assets::{Asset, AssetCategory};
use crate::hawl::{HijriCalendar, HijriDate, IslamicCivilCalendar};
use crate::methodology::{self, CustomRules, DueTreatment, MethodologyId, MethodologyRules};
use crate::modifier::{ModifierKind, ModifierResolver, StandardModifierResolver};
use crate::nisab::{self, NisabInfo, round_money};
use crate::pricing::Prices;
use crate::types::{CalculationStep, ZakatError};
use crate::wealth::{self, WealthSummary};

/// Namespace for deterministic calculation ids.
const CALCULATION_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2d8e_93a4_4b57_9e0a_5c3b_7d21_e845);

/// Years below this are read as Hijri years on lunar requests.
const HIJRI_YEAR_CUTOFF: i32 = 1700;

/// Calendar the calculation date is expressed in.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    schemars::JsonSchema,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum CalendarType {
    #[default]
    #[serde(alias = "hijri")]
    #[strum(to_string = "lunar", serialize = "hijri")]
    Lunar,
    #[serde(alias = "gregorian")]
    #[strum(to_string = "solar", serialize = "gregorian")]
    Solar,
}

/// Raw calculation request as received at the request boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CalculationRequest {
    #[serde(default)]
    pub methodology: String,
    #[serde(default)]
    pub calendar_type: String,
    #[serde(default)]
    pub calculation_date: Option<String>,
    /// `None` means every asset; an empty list is rejected.
    #[serde(default)]
    pub include_assets: Option<Vec<Uuid>>,
    #[serde(default)]
    pub custom_rules: Option<CustomRules>,
}

impl CalculationRequest {
    pub fn new(methodology: impl Into<String>, calculation_date: impl Into<String>) -> Self {
        Self {
            methodology: methodology.into(),
            calendar_type: CalendarType::Lunar.to_string(),
            calculation_date: Some(calculation_date.into()),
            include_assets: None,
            custom_rules: None,
        }
    }

    pub fn calendar(mut self, calendar_type: impl Into<String>) -> Self {
        self.calendar_type = calendar_type.into();
        self
    }

    pub fn include(mut self, ids: impl IntoIterator<Item = Uuid>) -> Self {
        self.include_assets = Some(ids.into_iter().collect());
        self
    }

    pub fn custom(mut self, rules: CustomRules) -> Self {
        self.custom_rules = Some(rules);
        self
    }
}

/// A request whose fields have all been parsed and checked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedRequest {
    pub rules: MethodologyRules,
    pub calendar_type: CalendarType,
    pub calculation_date: NaiveDate,
    pub include_assets: Option<Vec<Uuid>>,
}

impl ValidatedRequest {
    /// Request over every asset, used by the lifecycle.
    pub fn for_rules(rules: MethodologyRules, calculation_date: NaiveDate) -> Self {
        Self {
            rules,
            calendar_type: CalendarType::Lunar,
            calculation_date,
            include_assets: None,
        }
    }

    pub fn methodology(&self) -> MethodologyId {
        self.rules.id
    }
}

fn parse_calculation_date<C: HijriCalendar + ?Sized>(
    raw: &str,
    calendar_type: CalendarType,
    calendar: &C,
) -> Result<NaiveDate, ZakatError> {
    let raw = raw.trim();
    let invalid = |reason: String| ZakatError::validation("calculationDate", reason);

    if calendar_type == CalendarType::Lunar
        && let Ok(hijri) = raw.parse::<HijriDate>()
        && hijri.year < HIJRI_YEAR_CUTOFF
    {
        return calendar.from_hijri(hijri);
    }

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date);
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.date_naive())
        .map_err(|_| invalid(format!("'{}' is not a valid date", raw)))
}

/// Checks a raw request, failing with `ValidationError` on the first problem.
pub fn validate_calculation_request<C: HijriCalendar + ?Sized>(
    request: &CalculationRequest,
    calendar: &C,
) -> Result<ValidatedRequest, ZakatError> {
    let methodology = MethodologyId::parse(&request.methodology).map_err(|_| {
        ZakatError::validation(
            "methodology",
            format!("unrecognised methodology '{}'", request.methodology),
        )
    })?;

    let calendar_type: CalendarType = request.calendar_type.trim().parse().map_err(|_| {
        ZakatError::validation(
            "calendarType",
            format!("unrecognised calendar type '{}'", request.calendar_type),
        )
    })?;

    let raw_date = request
        .calculation_date
        .as_deref()
        .filter(|d| !d.trim().is_empty())
        .ok_or_else(|| ZakatError::validation("calculationDate", "calculation date is required"))?;
    let calculation_date = parse_calculation_date(raw_date, calendar_type, calendar)?;

    if let Some(ids) = &request.include_assets
        && ids.is_empty()
    {
        return Err(ZakatError::validation("includeAssets", "at least one asset must be included"));
    }

    if let Some(custom) = &request.custom_rules {
        custom.validate()?;
    }
    let rules = methodology::resolve(methodology, request.custom_rules.as_ref())?;

    Ok(ValidatedRequest {
        rules,
        calendar_type,
        calculation_date,
        include_assets: request.include_assets.clone(),
    })
}

/// One asset's line in a calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssetZakat {
    pub asset_id: Uuid,
    pub name: String,
    pub category: AssetCategory,
    pub value: Decimal,
    pub modifier: ModifierKind,
    pub modifier_label: String,
    pub zakatable_amount: Decimal,
    pub zakat_due: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CalculationTotals {
    pub total_wealth: Decimal,
    pub gross_zakatable: Decimal,
    pub deductions: Decimal,
    pub net_zakatable: Decimal,
    pub zakat_due: Decimal,
}

/// Result of a calculation. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ZakatCalculation {
    pub id: Uuid,
    pub calculation_date: NaiveDate,
    pub calculation_date_hijri: HijriDate,
    pub calendar_type: CalendarType,
    pub methodology: MethodologyId,
    /// Rate in percent.
    pub rate: Decimal,
    pub nisab: NisabInfo,
    pub breakdown: Vec<AssetZakat>,
    pub totals: CalculationTotals,
    pub meets_nisab: bool,
    pub explanation: Vec<CalculationStep>,
}

impl ZakatCalculation {
    pub fn zakat_due(&self) -> Decimal {
        self.totals.zakat_due
    }

    /// Zakat due with exactly two decimal places.
    pub fn format_amount(&self) -> String {
        format!("{:.2}", round_money(self.totals.zakat_due))
    }

    /// Format: "{methodology}: {Payable/Exempt} - Due: {amount}"
    pub fn summary(&self) -> String {
        let status = if self.meets_nisab { "Payable" } else { "Exempt" };
        format!("{}: {} - Due: {}", self.methodology, status, self.format_amount())
    }

    /// Renders the explanation steps as aligned plain text.
    pub fn explain(&self) -> String {
        use std::fmt::Write;
        let mut output = String::new();

        let _ = writeln!(output, "Zakat calculation ({} methodology, {}):", self.methodology, self.calculation_date);
        let _ = writeln!(output, "{:-<60}", "");

        let width = self
            .explanation
            .iter()
            .map(|step| step.description.len())
            .max()
            .unwrap_or(20)
            .max(20);

        for step in &self.explanation {
            match step.amount {
                None => {
                    let _ = writeln!(output, "  INFO: {}", step.description);
                }
                Some(amount) => {
                    let _ = writeln!(
                        output,
                        "  {:<width$} : {} {:>12.2}",
                        step.description,
                        step.symbol(),
                        amount,
                        width = width
                    );
                }
            }
        }

        let _ = writeln!(output, "{:-<60}", "");
        let _ = writeln!(output, "Status: {}", if self.meets_nisab { "PAYABLE" } else { "EXEMPT" });
        let _ = writeln!(output, "Amount Due: {}", self.format_amount());
        output
    }
}

impl std::fmt::Display for ZakatCalculation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.summary())
    }
}

#[derive(Serialize)]
struct FingerprintInput<'a> {
    request: &'a ValidatedRequest,
    assets: &'a [Asset],
    nisab: &'a NisabInfo,
}

/// Stateless calculation engine.
#[derive(Clone)]
pub struct ZakatEngine {
    resolver: Arc<dyn ModifierResolver>,
    calendar: Arc<dyn HijriCalendar>,
}

impl Default for ZakatEngine {
    fn default() -> Self {
        Self::new(Arc::new(StandardModifierResolver), Arc::new(IslamicCivilCalendar::new()))
    }
}

impl std::fmt::Debug for ZakatEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZakatEngine").finish_non_exhaustive()
    }
}

impl ZakatEngine {
    pub fn new(resolver: Arc<dyn ModifierResolver>, calendar: Arc<dyn HijriCalendar>) -> Self {
        Self { resolver, calendar }
    }

    pub fn calendar(&self) -> &Arc<dyn HijriCalendar> {
        &self.calendar
    }

    pub fn validate(&self, request: &CalculationRequest) -> Result<ValidatedRequest, ZakatError> {
        validate_calculation_request(request, self.calendar.as_ref())
    }

    /// Validates `request` and calculates over `assets` at current `prices`.
    ///
    /// Every id in `includeAssets` must be present in `assets`.
    pub fn calculate(
        &self,
        request: &CalculationRequest,
        assets: &[Asset],
        prices: &Prices,
    ) -> Result<ZakatCalculation, ZakatError> {
        let validated = self.validate(request)?;
        let nisab = nisab::compute_nisab(prices.gold_per_gram, prices.silver_per_gram, &validated.rules)?;
        self.calculate_with_nisab(&validated, assets, nisab)
    }

    /// Runs the calculation against a caller-supplied Nisab.
    pub fn calculate_with_nisab(
        &self,
        request: &ValidatedRequest,
        assets: &[Asset],
        nisab: NisabInfo,
    ) -> Result<ZakatCalculation, ZakatError> {
        let selected = select_assets(assets, request.include_assets.as_deref())?;
        let rules = &request.rules;
        let summary = wealth::aggregate(&selected, self.resolver.as_ref(), rules);

        let meets_nisab = summary.zakatable_wealth >= nisab.effective_nisab
            && summary.zakatable_wealth > Decimal::ZERO;

        let breakdown = allocate_due(&summary, rules, meets_nisab);
        let zakat_due: Decimal = breakdown.iter().map(|line| line.zakat_due).sum();

        let totals = CalculationTotals {
            total_wealth: summary.total_wealth,
            gross_zakatable: summary.zakatable_gross,
            deductions: summary.deductions,
            net_zakatable: summary.zakatable_wealth,
            zakat_due,
        };

        let explanation = explain_steps(rules, &nisab, &totals, meets_nisab);

        let fingerprint = serde_json::to_vec(&FingerprintInput {
            request,
            assets: &selected,
            nisab: &nisab,
        })
        .unwrap_or_default();

        let calculation = ZakatCalculation {
            id: Uuid::new_v5(&CALCULATION_NAMESPACE, &fingerprint),
            calculation_date: request.calculation_date,
            calculation_date_hijri: self.calendar.to_hijri(request.calculation_date)?,
            calendar_type: request.calendar_type,
            methodology: rules.id,
            rate: rules.rate,
            nisab,
            breakdown,
            totals,
            meets_nisab,
            explanation,
        };

        tracing::debug!(
            calculation_id = %calculation.id,
            methodology = %calculation.methodology,
            net_zakatable = %calculation.totals.net_zakatable,
            effective_nisab = %calculation.nisab.effective_nisab,
            zakat_due = %calculation.totals.zakat_due,
            "calculated zakat"
        );

        Ok(calculation)
    }
}

fn select_assets(assets: &[Asset], include: Option<&[Uuid]>) -> Result<Vec<Asset>, ZakatError> {
    let Some(ids) = include else {
        return Ok(assets.to_vec());
    };

    let wanted: HashSet<Uuid> = ids.iter().copied().collect();
    let selected: Vec<Asset> = assets.iter().filter(|a| wanted.contains(&a.id)).cloned().collect();

    if selected.len() < wanted.len() {
        let found: HashSet<Uuid> = selected.iter().map(|a| a.id).collect();
        if let Some(missing) = ids.iter().find(|id| !found.contains(id)) {
            return Err(ZakatError::not_found("asset", missing));
        }
    }
    Ok(selected)
}

/// Deductions are spread over the zakatable base pro rata, so each line is
/// charged `zakatable * (net / gross) * rate`.
fn allocate_due(summary: &WealthSummary, rules: &MethodologyRules, meets_nisab: bool) -> Vec<AssetZakat> {
    let share = if summary.zakatable_gross > Decimal::ZERO {
        summary.zakatable_wealth / summary.zakatable_gross
    } else {
        Decimal::ZERO
    };
    let rate = rules.rate_fraction();

    summary
        .lines
        .iter()
        .map(|line| {
            let zakat_due = if meets_nisab && line.rule.due == DueTreatment::Full {
                round_money(line.zakatable_amount * share * rate)
            } else {
                Decimal::ZERO
            };
            AssetZakat {
                asset_id: line.asset_id,
                name: line.name.clone(),
                category: line.category,
                value: line.value,
                modifier: line.modifier.kind,
                modifier_label: line.modifier.kind.label().to_string(),
                zakatable_amount: line.zakatable_amount,
                zakat_due,
            }
        })
        .collect()
}

fn explain_steps(
    rules: &MethodologyRules,
    nisab: &NisabInfo,
    totals: &CalculationTotals,
    meets_nisab: bool,
) -> Vec<CalculationStep> {
    let mut steps = vec![
        CalculationStep::info(format!(
            "Methodology '{}' uses the {} nisab basis; effective nisab is the {} threshold",
            rules.id,
            rules.nisab_basis,
            nisab.nisab_basis
        )),
        CalculationStep::initial("Gross asset value", totals.total_wealth),
        CalculationStep::result("Zakatable value after modifiers", totals.gross_zakatable),
    ];
    if totals.deductions > Decimal::ZERO {
        steps.push(CalculationStep::subtract("Deductions", totals.deductions));
    }
    steps.push(CalculationStep::result("Net zakatable wealth", totals.net_zakatable));
    steps.push(CalculationStep::compare(
        format!("Nisab threshold ({})", nisab.nisab_basis),
        nisab.effective_nisab,
    ));

    if meets_nisab {
        steps.push(CalculationStep::info("Net zakatable wealth meets the nisab"));
        steps.push(CalculationStep::rate("Zakat rate (%)", rules.rate));
    } else {
        steps.push(CalculationStep::info("Net zakatable wealth is below the nisab; no zakat due"));
    }
    steps.push(CalculationStep::result("Zakat due", totals.zakat_due));
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::methodology::CustomNisabBasis;
    use crate::types::Operation;
    use rust_decimal_macros::dec;

    fn engine() -> ZakatEngine {
        ZakatEngine::default()
    }

    fn prices() -> Prices {
        Prices::new(dec!(65), dec!(0.80)).unwrap()
    }

    #[test]
    fn test_validation_failures() {
        let cal = IslamicCivilCalendar::new();
        let base = CalculationRequest::new("standard", "2024-06-01");
        assert!(validate_calculation_request(&base, &cal).is_ok());

        let cases = [
            CalculationRequest { calculation_date: None, ..base.clone() },
            CalculationRequest { calculation_date: Some("June first".into()), ..base.clone() },
            base.clone().calendar("julian"),
            CalculationRequest { methodology: "jafari".into(), ..base.clone() },
            base.clone().include(Vec::new()),
            base.clone().custom(CustomRules::new(CustomNisabBasis::CustomValue, dec!(2.5)).with_nisab_value(-5.0)),
        ];
        for request in cases {
            let err = validate_calculation_request(&request, &cal).unwrap_err();
            assert_eq!(err.code(), "VALIDATION_ERROR", "{request:?}");
        }
    }

    #[test]
    fn test_calendar_aliases_and_hijri_dates() {
        let cal = IslamicCivilCalendar::new();
        let solar = CalculationRequest::new("hanafi", "2024-03-11").calendar("Gregorian");
        let validated = validate_calculation_request(&solar, &cal).unwrap();
        assert_eq!(validated.calendar_type, CalendarType::Solar);

        let lunar = CalculationRequest::new("hanafi", "1445-09-01").calendar("hijri");
        let validated = validate_calculation_request(&lunar, &cal).unwrap();
        assert_eq!(validated.calendar_type, CalendarType::Lunar);
        assert_eq!(cal.to_hijri(validated.calculation_date).unwrap(), HijriDate::new(1445, 9, 1));

        let rfc = CalculationRequest::new("standard", "2024-06-01T10:00:00Z");
        assert_eq!(
            validate_calculation_request(&rfc, &cal).unwrap().calculation_date,
            NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
        );
    }

    #[test]
    fn test_explanation_order() {
        let user = Uuid::new_v4();
        let assets = vec![
            Asset::cash(user, 10_000).unwrap(),
            Asset::new(user, AssetCategory::Expense, 1_000).unwrap(),
        ];
        let calc = engine()
            .calculate(&CalculationRequest::new("standard", "2024-06-01"), &assets, &prices())
            .unwrap();
        let ops: Vec<Operation> = calc.explanation.iter().map(|s| s.operation).collect();
        assert_eq!(
            ops,
            vec![
                Operation::Info,
                Operation::Initial,
                Operation::Result,
                Operation::Subtract,
                Operation::Result,
                Operation::Compare,
                Operation::Info,
                Operation::Rate,
                Operation::Result,
            ]
        );
        assert_eq!(calc.totals.net_zakatable, dec!(9000));
        assert_eq!(calc.zakat_due(), dec!(225.00));
        assert!(calc.explain().contains("Amount Due: 225.00"));
        assert_eq!(calc.summary(), "standard: Payable - Due: 225.00");
    }

    #[test]
    fn test_explanation_names_basis() {
        let assets = vec![Asset::cash(Uuid::new_v4(), 10_000).unwrap()];
        let calc = engine()
            .calculate(&CalculationRequest::new("standard", "2024-06-01"), &assets, &prices())
            .unwrap();
        assert_eq!(
            calc.explanation[0].description,
            "Methodology 'standard' uses the dual-minimum nisab basis; effective nisab is the silver threshold"
        );
    }

    #[test]
    fn test_receivable_counts_toward_nisab_but_carries_no_due() {
        let user = Uuid::new_v4();
        let cash = Asset::cash(user, 4_000).unwrap();
        let receivable = Asset::new(user, AssetCategory::DebtReceivable, 2_000).unwrap();
        let calc = engine()
            .calculate(
                &CalculationRequest::new("hanbali", "2024-06-01"),
                &[cash.clone(), receivable.clone()],
                &prices(),
            )
            .unwrap();
        // 6000 >= 5686.20 only because the receivable is in the base.
        assert!(calc.meets_nisab);
        let due_of = |id| calc.breakdown.iter().find(|l| l.asset_id == id).unwrap().zakat_due;
        assert_eq!(due_of(cash.id), dec!(100.00));
        assert_eq!(due_of(receivable.id), Decimal::ZERO);
        assert_eq!(calc.zakat_due(), dec!(100.00));
    }

    #[test]
    fn test_missing_included_asset_is_not_found() {
        let user = Uuid::new_v4();
        let assets = vec![Asset::cash(user, 100).unwrap()];
        let request = CalculationRequest::new("standard", "2024-06-01").include([Uuid::new_v4()]);
        let err = engine().calculate(&request, &assets, &prices()).unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn test_include_filter_limits_assets() {
        let user = Uuid::new_v4();
        let a = Asset::cash(user, 10_000).unwrap();
        let b = Asset::cash(user, 5_000).unwrap();
        let request = CalculationRequest::new("standard", "2024-06-01").include([a.id]);
        let calc = engine().calculate(&request, &[a, b], &prices()).unwrap();
        assert_eq!(calc.breakdown.len(), 1);
        assert_eq!(calc.totals.total_wealth, dec!(10000));
    }

    #[test]
    fn test_identical_inputs_share_an_id() {
        let user = Uuid::new_v4();
        let assets = vec![Asset::cash(user, 10_000).unwrap()];
        let request = CalculationRequest::new("maliki", "2024-06-01");
        let first = engine().calculate(&request, &assets, &prices()).unwrap();
        let second = engine().calculate(&request, &assets, &prices()).unwrap();
        assert_eq!(first, second);
    }
}
