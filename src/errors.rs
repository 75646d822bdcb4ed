// /src/errors.rs
//! Error type shared by the annotator, the JS reference parser and the bindings
#[cfg(feature = "python")]
use pyo3::{
    exceptions::{PyIndexError, PyKeyError, PyTypeError, PyValueError},
    PyErr,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TreeError {
    #[error("Record {index} has no field '{field}'")]
    MissingField { field: String, index: usize },

    #[error("Record {index} sits at depth {depth} but only {levels} grouping field(s) exist to join from")]
    JoinLevelOutOfRange {
        index: usize,
        depth: usize,
        levels: usize,
    },

    #[error("Record {index} reopens group {field}={value} after it was closed; input is not sorted by the grouping fields")]
    OutOfOrder {
        index: usize,
        field: String,
        value: String,
    },

    #[error("Invalid JS reference '{reference}': expected js$<module>.<member>")]
    InvalidJsRef { reference: String },

    #[error("Type conversion error: expected {expected}, got {actual}")]
    TypeConversionError { expected: String, actual: String },

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[cfg(feature = "python")]
    #[error("Python call failed: {0}")]
    PythonError(String),
}

/// Looks a field up on a record, turning an absent key into `TreeError::MissingField`.
#[macro_export]
macro_rules! require_field {
    ($record:expr, $field:expr, $index:expr) => {{
        $record
            .get($field)
            .ok_or_else(|| $crate::errors::TreeError::MissingField {
                field: $field.to_string(),
                index: $index,
            })?
    }};
}

#[cfg(feature = "python")]
impl From<TreeError> for PyErr {
    fn from(err: TreeError) -> Self {
        match err {
            TreeError::MissingField { .. } => PyKeyError::new_err(err.to_string()),
            TreeError::JoinLevelOutOfRange { .. } => PyIndexError::new_err(err.to_string()),
            TreeError::TypeConversionError { .. } => PyTypeError::new_err(err.to_string()),
            _ => PyValueError::new_err(err.to_string()),
        }
    }
}

#[cfg(feature = "python")]
impl From<PyErr> for TreeError {
    fn from(err: PyErr) -> Self {
        TreeError::PythonError(err.to_string())
    }
}
