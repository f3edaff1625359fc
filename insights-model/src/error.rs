use std::fmt::{self, Display};

/// Errors produced by model constructors and parsing routines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    InvalidVersion(String),
    UnknownDriverType(String),
    UnknownState(String),
    StateRegression { from: String, to: String },
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::InvalidVersion(raw) => {
                write!(f, "invalid package version: {raw}")
            }
            ModelError::UnknownDriverType(raw) => {
                write!(f, "unknown catalog scan driver type: {raw}")
            }
            ModelError::UnknownState(raw) => {
                write!(f, "unknown catalog scan state: {raw}")
            }
            ModelError::StateRegression { from, to } => {
                write!(f, "scan state cannot move from {from} back to {to}")
            }
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;
