use thiserror::Error;

/// Rejections raised at the validated boundary of the engine.
///
/// `run_projection` itself never fails; these only come out of
/// [`super::run_model`] and [`super::Horizon::new`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProjectionError {
    #[error("{field} must be a finite number, got {value}")]
    NonFinite { field: String, value: f64 },

    #[error("horizon of {years} years starting in {start_year} is outside the supported calendar")]
    HorizonOutOfRange { start_year: i32, years: u32 },

    #[error("flat tax net fraction must be between 0 and 1, got {0}")]
    InvalidNetFraction(f64),

    #[error("tax bracket {index} has rate {rate}; rates must be between 0 and 1")]
    BracketRate { index: usize, rate: f64 },

    #[error("tax bracket {index} ceiling must be greater than the previous ceiling")]
    BracketOrder { index: usize },

    #[error("marginal tax requires at least one bracket")]
    NoBrackets,

    #[error("{field} must be greater than -1 (-100% a year), got {value}")]
    RateOutOfRange { field: String, value: f64 },
}

pub(crate) fn ensure_finite(field: impl Into<String>, value: f64) -> Result<(), ProjectionError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ProjectionError::NonFinite {
            field: field.into(),
            value,
        })
    }
}

/// Annual rates at or below -100% zero out or flip the monthly factors.
pub(crate) fn ensure_rate(field: impl Into<String>, value: f64) -> Result<(), ProjectionError> {
    let field = field.into();
    ensure_finite(field.clone(), value)?;
    if value > -1.0 {
        Ok(())
    } else {
        Err(ProjectionError::RateOutOfRange { field, value })
    }
}
