use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaxLotError {
    #[error("Invalid input: {field} ({reason})")]
    InvalidInput { field: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TaxLotError {
    pub fn invalid(field: &str, reason: &str) -> Self {
        TaxLotError::InvalidInput {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<toml::de::Error> for TaxLotError {
    fn from(e: toml::de::Error) -> Self {
        TaxLotError::Config(e.to_string())
    }
}

pub type TaxLotResult<T> = Result<T, TaxLotError>;
