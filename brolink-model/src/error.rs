use std::fmt::{self, Display};

/// Errors produced by model constructors and parsers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    InvalidIdentifier(String),
    UnknownCode { vocabulary: &'static str, value: String },
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::InvalidIdentifier(msg) => {
                write!(f, "invalid identifier: {msg}")
            }
            ModelError::UnknownCode { vocabulary, value } => {
                write!(f, "unknown {vocabulary} code '{value}'")
            }
        }
    }
}

impl std::error::Error for ModelError {}

impl ModelError {
    pub(crate) fn unknown(vocabulary: &'static str, value: &str) -> Self {
        ModelError::UnknownCode {
            vocabulary,
            value: value.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;
