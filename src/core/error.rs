use thiserror::Error;

use super::TaxYear;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no repayment parameters for tax year {0}")]
    UnsupportedTaxYear(TaxYear),

    #[error("projection cannot terminate: {0}")]
    ProjectionDivergence(String),
}

impl EngineError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        EngineError::InvalidInput(msg.into())
    }
}

/// Failure while loading or validating a parameter table.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("failed to read parameter table: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse parameter table: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid parameter table: {0}")]
    Invalid(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
