mod engine;
mod error;
mod tax;
mod types;

pub use engine::{
    ProjectionPolicy, SimpleAdditive, TaxedCompounding, advance_balance, aggregate_cashflow,
    apply_tax, monthly_contribution, run_model, run_projection,
};
pub use error::ProjectionError;
pub use tax::{
    DEFAULT_NET_FRACTION, FlatRatePolicy, MarginalBracketPolicy, TaxBracket, TaxPolicy, TaxRule,
};
pub use types::{
    CashflowStream, DEFAULT_HORIZON_START_YEAR, DEFAULT_HORIZON_YEARS, Horizon, Period,
    ProjectionInputs, ProjectionMode, ProjectionPoint, RateConfig, Series, ValueBasis,
};
