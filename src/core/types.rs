use chrono::{Datelike, Months, NaiveDate};
use serde::Serialize;

use super::error::ProjectionError;
use super::tax::TaxRule;

pub const DEFAULT_HORIZON_START_YEAR: i32 = 2022;
pub const DEFAULT_HORIZON_YEARS: u32 = 116;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Period {
    Monthly,
    Annually,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ProjectionMode {
    SimpleAdditive,
    TaxedCompounding,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ValueBasis {
    Nominal,
    Real,
}

/// A recurring money movement, active strictly between its two dates.
#[derive(Debug, Clone, PartialEq)]
pub struct CashflowStream {
    pub amount: f64,
    pub period: Period,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl CashflowStream {
    pub fn monthly(amount: f64, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            amount,
            period: Period::Monthly,
            start_date,
            end_date,
        }
    }

    pub fn annually(amount: f64, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            amount,
            period: Period::Annually,
            start_date,
            end_date,
        }
    }

    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        self.start_date < date && date < self.end_date
    }
}

/// Annual rates as fractions (0.06 is 6%).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateConfig {
    pub inflation: f64,
    pub capital: f64,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            inflation: 0.02,
            capital: 0.06,
        }
    }
}

/// Simulated span of one run, always starting in January of `start_year`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Horizon {
    start: NaiveDate,
    years: u32,
}

impl Horizon {
    pub fn new(start_year: i32, years: u32) -> Result<Self, ProjectionError> {
        let out_of_range = ProjectionError::HorizonOutOfRange { start_year, years };
        let start = NaiveDate::from_ymd_opt(start_year, 1, 1).ok_or(out_of_range.clone())?;
        // One boundary date past the last month has to exist as well.
        years
            .checked_mul(12)
            .and_then(|months| start.checked_add_months(Months::new(months)))
            .ok_or(out_of_range)?;
        Ok(Self { start, years })
    }

    pub fn start_year(&self) -> i32 {
        self.start.year()
    }

    pub fn years(&self) -> u32 {
        self.years
    }

    pub fn months(&self) -> usize {
        self.years as usize * 12
    }

    /// First day of the `index`-th simulated month.
    pub(crate) fn month_start(&self, index: usize) -> NaiveDate {
        self.start + Months::new(index as u32)
    }
}

impl Default for Horizon {
    fn default() -> Self {
        Self {
            start: NaiveDate::from_ymd_opt(DEFAULT_HORIZON_START_YEAR, 1, 1)
                .unwrap_or(NaiveDate::MIN),
            years: DEFAULT_HORIZON_YEARS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectionPoint {
    pub label: String,
    pub balance: f64,
}

/// Monthly balance samples as parallel label/value columns, ready for plotting.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Series {
    pub labels: Vec<String>,
    pub values: Vec<f64>,
}

impl Series {
    pub(crate) fn with_capacity(months: usize) -> Self {
        Self {
            labels: Vec::with_capacity(months),
            values: Vec::with_capacity(months),
        }
    }

    pub(crate) fn push(&mut self, label: String, balance: f64) {
        self.labels.push(label);
        self.values.push(balance);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn last_value(&self) -> Option<f64> {
        self.values.last().copied()
    }

    pub fn points(&self) -> impl Iterator<Item = ProjectionPoint> + '_ {
        self.labels
            .iter()
            .zip(&self.values)
            .map(|(label, &balance)| ProjectionPoint {
                label: label.clone(),
                balance,
            })
    }

    /// Restates every sample in start-of-horizon money, discounting
    /// `annual_inflation / 12` per elapsed month.
    pub fn deflated(&self, annual_inflation: f64) -> Series {
        let monthly = 1.0 + annual_inflation / 12.0;
        let values = self
            .values
            .iter()
            .enumerate()
            .map(|(i, v)| v / monthly.powi(i as i32))
            .collect();
        Series {
            labels: self.labels.clone(),
            values,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProjectionInputs {
    pub starting_balance: f64,
    pub incomes: Vec<CashflowStream>,
    pub expenses: Vec<CashflowStream>,
    pub rates: RateConfig,
    pub horizon: Horizon,
    pub mode: ProjectionMode,
    pub tax: TaxRule,
    pub value_basis: ValueBasis,
}

pub(crate) fn month_label(date: NaiveDate) -> String {
    format!("{}-{}", date.year(), date.month())
}
