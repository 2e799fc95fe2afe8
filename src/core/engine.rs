use chrono::NaiveDate;
use log::debug;

use super::error::{ProjectionError, ensure_finite, ensure_rate};
use super::tax::{FlatRatePolicy, TaxPolicy};
use super::types::{
    CashflowStream, Horizon, Period, ProjectionInputs, ProjectionMode, RateConfig, Series,
    ValueBasis, month_label,
};

/// Per-month update rule carrying the balance from one month to the next.
///
/// `date` is the boundary closing the month being advanced, i.e. the first
/// day of the following month.
pub trait ProjectionPolicy {
    fn advance_balance(
        &self,
        balance: f64,
        incomes: &[CashflowStream],
        expenses: &[CashflowStream],
        rates: &RateConfig,
        date: NaiveDate,
    ) -> f64;
}

/// Plain accumulation: every income is read as annual, every expense as
/// monthly, with no dates, tax or growth involved.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleAdditive;

impl ProjectionPolicy for SimpleAdditive {
    fn advance_balance(
        &self,
        balance: f64,
        incomes: &[CashflowStream],
        expenses: &[CashflowStream],
        _rates: &RateConfig,
        _date: NaiveDate,
    ) -> f64 {
        let income: f64 = incomes.iter().map(|s| s.amount / 12.0).sum();
        let expense: f64 = expenses.iter().map(|s| s.amount).sum();
        balance + income - expense
    }
}

/// Monthly compounding of the balance plus period-aware, windowed streams,
/// with income passed through a tax policy.
#[derive(Debug, Clone, Default)]
pub struct TaxedCompounding<T = FlatRatePolicy> {
    pub tax: T,
}

impl<T: TaxPolicy> ProjectionPolicy for TaxedCompounding<T> {
    fn advance_balance(
        &self,
        balance: f64,
        incomes: &[CashflowStream],
        expenses: &[CashflowStream],
        rates: &RateConfig,
        date: NaiveDate,
    ) -> f64 {
        let gross_income = aggregate_cashflow(incomes, date);
        let net_income = self.tax.net_income(gross_income);
        let total_expense = aggregate_cashflow(expenses, date);
        balance * (1.0 + rates.capital / 12.0) + net_income - total_expense
    }
}

pub fn monthly_contribution(stream: &CashflowStream, date: NaiveDate) -> f64 {
    if !stream.is_active_on(date) {
        return 0.0;
    }
    match stream.period {
        Period::Monthly => stream.amount,
        Period::Annually => stream.amount / 12.0,
    }
}

pub fn aggregate_cashflow(streams: &[CashflowStream], date: NaiveDate) -> f64 {
    streams
        .iter()
        .fold(0.0, |total, stream| total + monthly_contribution(stream, date))
}

/// Flat 30% withholding on a month's gross income.
pub fn apply_tax(gross_income: f64) -> f64 {
    FlatRatePolicy::default().net_income(gross_income)
}

pub fn advance_balance<P: ProjectionPolicy + ?Sized>(
    policy: &P,
    balance: f64,
    incomes: &[CashflowStream],
    expenses: &[CashflowStream],
    rates: &RateConfig,
    date: NaiveDate,
) -> f64 {
    policy.advance_balance(balance, incomes, expenses, rates, date)
}

/// Folds the balance across every month of the horizon.
///
/// Each month records its label and the balance *before* that month's
/// update. No validation happens here; non-finite inputs flow straight into
/// the series.
pub fn run_projection<P: ProjectionPolicy + ?Sized>(
    starting_balance: f64,
    incomes: &[CashflowStream],
    expenses: &[CashflowStream],
    rates: &RateConfig,
    horizon: &Horizon,
    policy: &P,
) -> Series {
    let months = horizon.months();
    let mut series = Series::with_capacity(months);
    let mut balance = starting_balance;
    for index in 0..months {
        series.push(month_label(horizon.month_start(index)), balance);
        balance = policy.advance_balance(
            balance,
            incomes,
            expenses,
            rates,
            horizon.month_start(index + 1),
        );
    }
    series
}

/// Validated entry point: rejects non-finite numbers and malformed tax
/// configuration, runs the selected mode and restates the result in the
/// requested value basis.
pub fn run_model(inputs: &ProjectionInputs) -> Result<Series, ProjectionError> {
    validate_inputs(inputs)?;

    debug!(
        "projecting {:?} over {} months from {} ({} incomes, {} expenses)",
        inputs.mode,
        inputs.horizon.months(),
        inputs.horizon.start_year(),
        inputs.incomes.len(),
        inputs.expenses.len()
    );

    let series = match inputs.mode {
        ProjectionMode::SimpleAdditive => run_projection(
            inputs.starting_balance,
            &inputs.incomes,
            &inputs.expenses,
            &inputs.rates,
            &inputs.horizon,
            &SimpleAdditive,
        ),
        ProjectionMode::TaxedCompounding => run_projection(
            inputs.starting_balance,
            &inputs.incomes,
            &inputs.expenses,
            &inputs.rates,
            &inputs.horizon,
            &TaxedCompounding { tax: &inputs.tax },
        ),
    };

    Ok(match inputs.value_basis {
        ValueBasis::Nominal => series,
        ValueBasis::Real => series.deflated(inputs.rates.inflation),
    })
}

fn validate_inputs(inputs: &ProjectionInputs) -> Result<(), ProjectionError> {
    ensure_finite("starting_balance", inputs.starting_balance)?;
    ensure_rate("rates.capital", inputs.rates.capital)?;
    ensure_rate("rates.inflation", inputs.rates.inflation)?;
    for (i, stream) in inputs.incomes.iter().enumerate() {
        ensure_finite(format!("incomes[{i}].amount"), stream.amount)?;
    }
    for (i, stream) in inputs.expenses.iter().enumerate() {
        ensure_finite(format!("expenses[{i}].amount"), stream.amount)?;
    }
    inputs.tax.validate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tax::{MarginalBracketPolicy, TaxBracket, TaxRule};
    use proptest::prelude::{any, prop_assert, prop_assert_eq, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn assert_approx_tol(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
    }

    fn forever_monthly(amount: f64) -> CashflowStream {
        CashflowStream::monthly(amount, date(2000, 1, 1), date(2200, 1, 1))
    }

    fn forever_annually(amount: f64) -> CashflowStream {
        CashflowStream::annually(amount, date(2000, 1, 1), date(2200, 1, 1))
    }

    fn no_growth() -> RateConfig {
        RateConfig {
            inflation: 0.0,
            capital: 0.0,
        }
    }

    fn sample_inputs() -> ProjectionInputs {
        ProjectionInputs {
            starting_balance: 10_000.0,
            incomes: vec![forever_annually(70_000.0)],
            expenses: vec![forever_monthly(1_100.0)],
            rates: RateConfig {
                inflation: 0.02,
                capital: 0.06,
            },
            horizon: Horizon::default(),
            mode: ProjectionMode::TaxedCompounding,
            tax: TaxRule::default(),
            value_basis: ValueBasis::Nominal,
        }
    }

    #[test]
    fn series_covers_default_horizon_month_by_month() {
        let series = run_projection(
            0.0,
            &[],
            &[],
            &no_growth(),
            &Horizon::default(),
            &TaxedCompounding::<FlatRatePolicy>::default(),
        );
        assert_eq!(series.labels.len(), 12 * 116);
        assert_eq!(series.values.len(), 12 * 116);
        assert_eq!(series.labels[0], "2022-1");
        assert_eq!(series.labels[11], "2022-12");
        assert_eq!(series.labels[12], "2023-1");
        assert_eq!(series.labels.last().map(String::as_str), Some("2137-12"));
    }

    #[test]
    fn zero_inputs_keep_balance_constant_in_both_modes() {
        let horizon = Horizon::default();
        let taxed = run_projection(
            2_500.0,
            &[],
            &[],
            &no_growth(),
            &horizon,
            &TaxedCompounding::<FlatRatePolicy>::default(),
        );
        let simple = run_projection(2_500.0, &[], &[], &no_growth(), &horizon, &SimpleAdditive);
        assert!(taxed.values.iter().all(|v| *v == 2_500.0));
        assert!(simple.values.iter().all(|v| *v == 2_500.0));
    }

    #[test]
    fn stream_contributes_nothing_on_its_end_date() {
        let income = CashflowStream::monthly(100.0, date(2021, 1, 1), date(2022, 3, 1));
        assert_approx(monthly_contribution(&income, date(2022, 2, 1)), 100.0);
        assert_approx(monthly_contribution(&income, date(2022, 3, 1)), 0.0);

        let series = run_projection(
            0.0,
            &[income],
            &[],
            &no_growth(),
            &Horizon::default(),
            &TaxedCompounding::<FlatRatePolicy>::default(),
        );
        assert_approx(series.values[0], 0.0);
        assert_approx(series.values[1], 70.0);
        // The update closing 2022-2 is evaluated on 2022-03-01, the end date itself.
        assert_approx(series.values[2], 70.0);
        assert_approx(series.values[3], 70.0);
    }

    #[test]
    fn stream_contributes_nothing_on_its_start_date() {
        let expense = CashflowStream::monthly(50.0, date(2022, 2, 1), date(2200, 1, 1));
        assert_approx(monthly_contribution(&expense, date(2022, 2, 1)), 0.0);

        let series = run_projection(
            1_000.0,
            &[],
            &[expense],
            &no_growth(),
            &Horizon::default(),
            &TaxedCompounding::<FlatRatePolicy>::default(),
        );
        assert_approx(series.values[1], 1_000.0);
        assert_approx(series.values[2], 950.0);
    }

    #[test]
    fn annual_amounts_are_spread_over_twelve_months() {
        let when = date(2030, 6, 1);
        assert_approx(monthly_contribution(&forever_annually(1_200.0), when), 100.0);
        assert_approx(monthly_contribution(&forever_monthly(1_200.0), when), 1_200.0);

        let series = run_projection(
            0.0,
            &[],
            &[forever_annually(1_200.0)],
            &no_growth(),
            &Horizon::default(),
            &TaxedCompounding::<FlatRatePolicy>::default(),
        );
        assert_approx(series.values[1], -100.0);
        assert_approx(series.values[12], -1_200.0);
    }

    #[test]
    fn aggregate_of_no_streams_is_zero() {
        assert_eq!(aggregate_cashflow(&[], date(2022, 1, 1)), 0.0);
        let streams = [forever_monthly(10.0), forever_annually(120.0)];
        assert_approx(aggregate_cashflow(&streams, date(2050, 1, 1)), 20.0);
    }

    #[test]
    fn apply_tax_withholds_thirty_percent() {
        assert_approx(apply_tax(5_000.0), 3_500.0);
        assert_approx(apply_tax(0.0), 0.0);
    }

    #[test]
    fn tax_touches_income_but_not_expenses() {
        let series = run_projection(
            0.0,
            &[forever_monthly(1_000.0)],
            &[forever_monthly(400.0)],
            &no_growth(),
            &Horizon::default(),
            &TaxedCompounding::<FlatRatePolicy>::default(),
        );
        assert_approx(series.values[1], 700.0 - 400.0);
    }

    #[test]
    fn capital_compounds_monthly() {
        let rates = RateConfig {
            inflation: 0.0,
            capital: 0.12,
        };
        let series = run_projection(
            1_000.0,
            &[],
            &[],
            &rates,
            &Horizon::default(),
            &TaxedCompounding::<FlatRatePolicy>::default(),
        );
        assert_approx(series.values[12], 1_000.0 * 1.01_f64.powi(12));
        assert_approx_tol(series.values[12], 1_126.83, 0.005);
    }

    #[test]
    fn end_to_end_salary_and_rent() {
        let inputs = sample_inputs();
        let series = run_projection(
            inputs.starting_balance,
            &inputs.incomes,
            &inputs.expenses,
            &inputs.rates,
            &inputs.horizon,
            &TaxedCompounding::<FlatRatePolicy>::default(),
        );
        assert_approx(series.values[0], 10_000.0);
        assert_approx(
            series.values[1],
            10_000.0 * 1.005 + 0.7 * (70_000.0 / 12.0) - 1_100.0,
        );
        assert_approx_tol(series.values[1], 13_033.33, 0.005);
    }

    #[test]
    fn simple_additive_ignores_windows_periods_tax_and_growth() {
        let expired = date(2000, 1, 1);
        let incomes = [CashflowStream::monthly(12_000.0, expired, expired)];
        let expenses = [CashflowStream::annually(500.0, expired, expired)];
        let rates = RateConfig {
            inflation: 0.05,
            capital: 0.12,
        };
        let series = run_projection(
            1_000.0,
            &incomes,
            &expenses,
            &rates,
            &Horizon::default(),
            &SimpleAdditive,
        );
        assert_approx(series.values[0], 1_000.0);
        assert_approx(series.values[1], 1_500.0);
        assert_approx(series.values[3], 2_500.0);
    }

    #[test]
    fn advance_balance_dispatches_through_any_policy() {
        let policies: [&dyn ProjectionPolicy; 2] =
            [&SimpleAdditive, &TaxedCompounding::<FlatRatePolicy>::default()];
        let incomes = [forever_annually(12_000.0)];
        let results: Vec<f64> = policies
            .iter()
            .map(|p| advance_balance(*p, 0.0, &incomes, &[], &no_growth(), date(2030, 1, 1)))
            .collect();
        assert_approx(results[0], 1_000.0);
        assert_approx(results[1], 700.0);
    }

    #[test]
    fn marginal_policy_plugs_into_taxed_compounding() {
        let tax = MarginalBracketPolicy::new(vec![
            TaxBracket {
                rate: 0.0,
                ceiling: 12_000.0,
            },
            TaxBracket {
                rate: 0.5,
                ceiling: f64::INFINITY,
            },
        ])
        .expect("valid brackets");
        let policy = TaxedCompounding { tax };
        let next = policy.advance_balance(
            0.0,
            &[forever_annually(24_000.0)],
            &[],
            &no_growth(),
            date(2030, 1, 1),
        );
        // 24_000 / year pays 6_000 tax: 1_500 net of 2_000 gross per month.
        assert_approx(next, 1_500.0);
    }

    #[test]
    fn run_projection_propagates_nan_without_validation() {
        let series = run_projection(
            f64::NAN,
            &[],
            &[],
            &no_growth(),
            &Horizon::default(),
            &SimpleAdditive,
        );
        assert_eq!(series.len(), 12 * 116);
        assert!(series.values.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn run_model_matches_projection_in_nominal_basis() {
        let inputs = sample_inputs();
        let expected = run_projection(
            inputs.starting_balance,
            &inputs.incomes,
            &inputs.expenses,
            &inputs.rates,
            &inputs.horizon,
            &TaxedCompounding::<FlatRatePolicy>::default(),
        );
        let series = run_model(&inputs).expect("valid inputs");
        assert_eq!(series, expected);
    }

    #[test]
    fn run_model_selects_simple_mode() {
        let mut inputs = sample_inputs();
        inputs.mode = ProjectionMode::SimpleAdditive;
        let series = run_model(&inputs).expect("valid inputs");
        assert_approx(series.values[1], 10_000.0 + 70_000.0 / 12.0 - 1_100.0);
    }

    #[test]
    fn run_model_rejects_non_finite_inputs() {
        let mut inputs = sample_inputs();
        inputs.starting_balance = f64::NAN;
        let err = run_model(&inputs).expect_err("must reject NaN balance");
        assert!(err.to_string().contains("starting_balance"));

        let mut inputs = sample_inputs();
        inputs.expenses.push(forever_monthly(f64::INFINITY));
        let err = run_model(&inputs).expect_err("must reject infinite expense");
        assert!(err.to_string().contains("expenses[1].amount"));

        let mut inputs = sample_inputs();
        inputs.rates.capital = f64::NEG_INFINITY;
        let err = run_model(&inputs).expect_err("must reject infinite rate");
        assert!(err.to_string().contains("rates.capital"));
    }

    #[test]
    fn run_model_rejects_rates_at_or_below_minus_one_hundred_percent() {
        let mut inputs = sample_inputs();
        inputs.value_basis = ValueBasis::Real;
        inputs.rates.inflation = -12.0;
        assert_eq!(
            run_model(&inputs),
            Err(ProjectionError::RateOutOfRange {
                field: "rates.inflation".to_string(),
                value: -12.0
            })
        );

        let mut inputs = sample_inputs();
        inputs.rates.capital = -1.0;
        let err = run_model(&inputs).expect_err("must reject capital rate");
        assert!(err.to_string().contains("rates.capital"));

        let mut inputs = sample_inputs();
        inputs.rates.capital = -0.5;
        inputs.rates.inflation = -0.5;
        inputs.value_basis = ValueBasis::Real;
        let series = run_model(&inputs).expect("steep but valid rates");
        assert!(series.values.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn run_model_rejects_invalid_tax_rule() {
        let mut inputs = sample_inputs();
        inputs.tax = TaxRule::Flat(FlatRatePolicy { net_fraction: -0.1 });
        assert_eq!(
            run_model(&inputs),
            Err(ProjectionError::InvalidNetFraction(-0.1))
        );
    }

    #[test]
    fn real_basis_discounts_by_monthly_inflation() {
        let mut inputs = sample_inputs();
        inputs.incomes.clear();
        inputs.expenses.clear();
        inputs.rates = RateConfig {
            inflation: 0.06,
            capital: 0.06,
        };
        inputs.value_basis = ValueBasis::Real;
        let series = run_model(&inputs).expect("valid inputs");
        for value in series.values.iter().take(120) {
            assert_approx_tol(*value, 10_000.0, 1e-6);
        }
    }

    #[test]
    fn shorter_horizon_changes_length_only() {
        let horizon = Horizon::new(2030, 2).expect("valid horizon");
        let series = run_projection(5.0, &[], &[], &no_growth(), &horizon, &SimpleAdditive);
        assert_eq!(series.len(), 24);
        assert_eq!(series.labels[0], "2030-1");
        assert_eq!(series.labels[23], "2031-12");
    }

    #[test]
    fn points_pair_labels_with_balances() {
        let horizon = Horizon::new(2022, 1).expect("valid horizon");
        let series = run_projection(
            100.0,
            &[],
            &[forever_monthly(10.0)],
            &no_growth(),
            &horizon,
            &SimpleAdditive,
        );
        let points: Vec<_> = series.points().collect();
        assert_eq!(points.len(), 12);
        assert_eq!(points[2].label, "2022-3");
        assert_approx(points[2].balance, 80.0);
        assert_eq!(series.last_value(), Some(points[11].balance));
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(32))]

        #[test]
        fn prop_series_length_is_fixed_by_horizon(
            start_year in 1990i32..2100,
            years in 0u32..40,
            balance in -1_000_000i64..1_000_000,
            income in 0u32..500_000,
            expense in 0u32..50_000,
            capital_bp in -500i32..1500,
            simple in any::<bool>()
        ) {
            let horizon = Horizon::new(start_year, years).expect("valid horizon");
            let incomes = [forever_annually(income as f64)];
            let expenses = [forever_monthly(expense as f64)];
            let rates = RateConfig { inflation: 0.0, capital: capital_bp as f64 / 10_000.0 };
            let series = if simple {
                run_projection(balance as f64, &incomes, &expenses, &rates, &horizon, &SimpleAdditive)
            } else {
                run_projection(
                    balance as f64,
                    &incomes,
                    &expenses,
                    &rates,
                    &horizon,
                    &TaxedCompounding::<FlatRatePolicy>::default(),
                )
            };
            prop_assert_eq!(series.labels.len(), 12 * years as usize);
            prop_assert_eq!(series.values.len(), 12 * years as usize);
            prop_assert!(series.values.first().is_none_or(|v| *v == balance as f64));
        }

        #[test]
        fn prop_flat_tax_nets_seventy_percent_of_gross(
            monthly in 1u32..1_000_000,
            annual in 0u32..1_000_000
        ) {
            let incomes = [forever_monthly(monthly as f64), forever_annually(annual as f64)];
            let when = date(2040, 7, 1);
            let gross = aggregate_cashflow(&incomes, when);
            let next = TaxedCompounding::<FlatRatePolicy>::default()
                .advance_balance(0.0, &incomes, &[], &no_growth(), when);
            prop_assert!((next - 0.7 * gross).abs() <= 1e-6 * gross.max(1.0));
        }
    }
}
