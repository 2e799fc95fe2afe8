use super::error::ProjectionError;

/// Share of gross income kept under the placeholder flat tax (30% withheld).
pub const DEFAULT_NET_FRACTION: f64 = 0.7;

/// Turns one month's aggregated gross income into what reaches the balance.
pub trait TaxPolicy {
    fn net_income(&self, gross_monthly: f64) -> f64;
}

impl<T: TaxPolicy + ?Sized> TaxPolicy for &T {
    fn net_income(&self, gross_monthly: f64) -> f64 {
        (**self).net_income(gross_monthly)
    }
}

/// Flat deduction applied to income only. A placeholder, not a model of
/// any real tax code.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlatRatePolicy {
    pub net_fraction: f64,
}

impl FlatRatePolicy {
    pub fn from_tax_rate(rate: f64) -> Self {
        Self {
            net_fraction: 1.0 - rate,
        }
    }
}

impl Default for FlatRatePolicy {
    fn default() -> Self {
        Self {
            net_fraction: DEFAULT_NET_FRACTION,
        }
    }
}

impl TaxPolicy for FlatRatePolicy {
    fn net_income(&self, gross_monthly: f64) -> f64 {
        gross_monthly * self.net_fraction
    }
}

/// One marginal band; `ceiling` is annual income and may be infinite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaxBracket {
    pub rate: f64,
    pub ceiling: f64,
}

/// Progressive tax over annual brackets.
///
/// Monthly income is annualized, taxed band by band, and the tax is spread
/// back over twelve months. Income past the last ceiling pays the last rate.
#[derive(Debug, Clone, PartialEq)]
pub struct MarginalBracketPolicy {
    brackets: Vec<TaxBracket>,
}

impl MarginalBracketPolicy {
    pub fn new(brackets: Vec<TaxBracket>) -> Result<Self, ProjectionError> {
        let policy = Self { brackets };
        policy.validate()?;
        Ok(policy)
    }

    pub fn brackets(&self) -> &[TaxBracket] {
        &self.brackets
    }

    pub fn annual_tax(&self, annual_income: f64) -> f64 {
        let income = annual_income.max(0.0);
        let mut tax = 0.0;
        let mut floor = 0.0;
        for bracket in &self.brackets {
            if income <= floor {
                return tax;
            }
            tax += (income.min(bracket.ceiling) - floor) * bracket.rate;
            floor = bracket.ceiling;
        }
        if let Some(last) = self.brackets.last() {
            if income > floor {
                tax += (income - floor) * last.rate;
            }
        }
        tax
    }

    fn validate(&self) -> Result<(), ProjectionError> {
        if self.brackets.is_empty() {
            return Err(ProjectionError::NoBrackets);
        }
        let mut previous = 0.0;
        for (index, bracket) in self.brackets.iter().enumerate() {
            if !(0.0..=1.0).contains(&bracket.rate) {
                return Err(ProjectionError::BracketRate {
                    index,
                    rate: bracket.rate,
                });
            }
            if bracket.ceiling.is_nan() || bracket.ceiling <= previous {
                return Err(ProjectionError::BracketOrder { index });
            }
            previous = bracket.ceiling;
        }
        Ok(())
    }
}

impl TaxPolicy for MarginalBracketPolicy {
    fn net_income(&self, gross_monthly: f64) -> f64 {
        if gross_monthly <= 0.0 {
            return gross_monthly;
        }
        gross_monthly - self.annual_tax(gross_monthly * 12.0) / 12.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaxRule {
    Flat(FlatRatePolicy),
    Marginal(MarginalBracketPolicy),
}

impl TaxRule {
    pub fn validate(&self) -> Result<(), ProjectionError> {
        match self {
            TaxRule::Flat(flat) => {
                if (0.0..=1.0).contains(&flat.net_fraction) {
                    Ok(())
                } else {
                    Err(ProjectionError::InvalidNetFraction(flat.net_fraction))
                }
            }
            TaxRule::Marginal(marginal) => marginal.validate(),
        }
    }
}

impl Default for TaxRule {
    fn default() -> Self {
        TaxRule::Flat(FlatRatePolicy::default())
    }
}

impl TaxPolicy for TaxRule {
    fn net_income(&self, gross_monthly: f64) -> f64 {
        match self {
            TaxRule::Flat(flat) => flat.net_income(gross_monthly),
            TaxRule::Marginal(marginal) => marginal.net_income(gross_monthly),
        }
    }
}
