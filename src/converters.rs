//! Record conversion for JSON arrays, plus Python -> JSON for scanning option documents
use crate::errors::TreeError;
use crate::types::Record;
use serde_json::Value;

#[cfg(feature = "python")]
use pyo3::prelude::*;
#[cfg(feature = "python")]
use pyo3::types::{PyBool, PyDict, PyFloat, PyInt, PyList, PyModule, PyString, PyTuple};

/// Splits a JSON array of objects into records, keeping key order.
pub fn records_from_json(value: &Value) -> Result<Vec<Record>, TreeError> {
    let items = value.as_array().ok_or_else(|| TreeError::TypeConversionError {
        expected: "array of objects".into(),
        actual: kind_of(value).into(),
    })?;

    items
        .iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::Object(map) => Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
            other => Err(TreeError::TypeConversionError {
                expected: "object".into(),
                actual: format!("{} at index {}", kind_of(other), index),
            }),
        })
        .collect()
}

pub fn records_to_json(records: Vec<Record>) -> Value {
    Value::Array(
        records
            .into_iter()
            .map(|record| Value::Object(record.into_iter().collect()))
            .collect(),
    )
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Convert a Python dict to a record, preserving insertion order
#[cfg(feature = "python")]
pub fn py_dict_to_record<'py>(
    py: Python<'py>,
    dict: &Bound<'py, PyDict>,
) -> Result<Record, TreeError> {
    let mut record = Record::with_capacity(dict.len());
    for (key, value) in dict.iter() {
        let key = key.extract::<String>().map_err(|e| TreeError::TypeConversionError {
            expected: "str key".into(),
            actual: e.to_string(),
        })?;
        record.insert(key, python_to_json(py, &value)?);
    }
    Ok(record)
}

/// Convert a Python object to JSON, handling the common scalar and container types natively.
/// Used for column/option documents; row data never goes through here.
#[cfg(feature = "python")]
pub fn python_to_json<'py>(
    py: Python<'py>,
    obj: &Bound<'py, PyAny>,
) -> Result<Value, TreeError> {
    if obj.is_none() {
        return Ok(Value::Null);
    }
    // bool is a subclass of int, so it goes first
    if obj.is_instance_of::<PyBool>() {
        return Ok(Value::Bool(obj.extract::<bool>()?));
    }
    if obj.is_instance_of::<PyInt>() {
        if let Ok(i) = obj.extract::<i64>() {
            return Ok(Value::from(i));
        }
        if let Ok(u) = obj.extract::<u64>() {
            return Ok(Value::from(u));
        }
        return Err(TreeError::TypeConversionError {
            expected: "int within 64 bits".into(),
            actual: obj.to_string(),
        });
    }
    if obj.is_instance_of::<PyFloat>() {
        let f = obj.extract::<f64>()?;
        return Ok(serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null));
    }
    if obj.is_instance_of::<PyString>() {
        return Ok(Value::String(obj.extract::<String>()?));
    }
    if let Ok(dict) = obj.cast::<PyDict>() {
        let record = py_dict_to_record(py, dict)?;
        return Ok(Value::Object(record.into_iter().collect()));
    }
    if obj.is_instance_of::<PyList>() || obj.is_instance_of::<PyTuple>() {
        let items = obj
            .try_iter()?
            .map(|item| python_to_json(py, &item?))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Value::Array(items));
    }

    // Anything else (Decimal, numpy scalars, ...) goes through json.dumps
    let json_mod = PyModule::import(py, "json")?;
    let dumped = json_mod.getattr("dumps")?.call1((obj,))?;
    let s = dumped.extract::<String>()?;
    serde_json::from_str(&s).map_err(|e| TreeError::TypeConversionError {
        expected: "JSON-serializable type".into(),
        actual: e.to_string(),
    })
}
