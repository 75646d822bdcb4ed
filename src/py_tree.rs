//! Tree annotation over Python dicts: values stay Python objects and compare with Python `==`
use crate::errors::TreeError;
use crate::tree::{Placement, TreeAnnotator, TreeRows};
use crate::types::{MissingFieldPolicy, TreeOptions};
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList, PyTuple};
use std::hash::{Hash, Hasher};

/// Annotates a Python iterable of dicts. Each output is `dict.copy()` of its input
/// with the depth, parent and join keys set, so untouched values are the same objects.
pub fn annotate_py<'py>(
    py: Python<'py>,
    data: &Bound<'py, PyAny>,
    options: &TreeOptions,
) -> Result<Bound<'py, PyList>, TreeError> {
    let rows = PyRows::collect(py, data, options.missing_fields)?;
    let out = PyList::empty(py);
    TreeAnnotator::new(&rows, options).run(|placed| {
        out.append(rows.annotated(placed, options)?)?;
        Ok(())
    })?;
    Ok(out)
}

pub struct PyRows<'py> {
    py: Python<'py>,
    rows: Vec<Bound<'py, PyDict>>,
    missing: MissingFieldPolicy,
}

impl<'py> PyRows<'py> {
    pub fn collect(
        py: Python<'py>,
        data: &Bound<'py, PyAny>,
        missing: MissingFieldPolicy,
    ) -> Result<Self, TreeError> {
        let mut rows = Vec::new();
        for (index, item) in data.try_iter()?.enumerate() {
            let item = item?;
            let dict = item.cast_into::<PyDict>().map_err(|e| TreeError::TypeConversionError {
                expected: "dict".into(),
                actual: format!("{} at index {}", e, index),
            })?;
            rows.push(dict);
        }
        Ok(PyRows { py, rows, missing })
    }

    fn lookup(
        &self,
        dict: &Bound<'py, PyDict>,
        field: &str,
        index: usize,
    ) -> Result<Bound<'py, PyAny>, TreeError> {
        match (dict.get_item(field)?, self.missing) {
            (Some(value), _) => Ok(value),
            (None, MissingFieldPolicy::Null) => Ok(self.py.None().into_bound(self.py)),
            (None, MissingFieldPolicy::Error) => Err(TreeError::MissingField {
                field: field.to_string(),
                index,
            }),
        }
    }

    fn annotated(&self, placed: Placement, options: &TreeOptions) -> Result<Bound<'py, PyDict>, TreeError> {
        let Placement { index, depth, parent } = placed;

        let parent = match parent {
            Some(ancestor) => self.lookup(&self.rows[ancestor], &options.id_field, ancestor)?,
            None => self.py.None().into_bound(self.py),
        };

        let annotated = self.rows[index].copy()?;
        annotated.set_item(&options.depth_field, depth)?;
        annotated.set_item(&options.parent_field, parent)?;

        if let Some(join_field) = &options.join_field_as {
            let source = options.grouping_fields.get(depth).ok_or(
                TreeError::JoinLevelOutOfRange {
                    index,
                    depth,
                    levels: options.grouping_fields.len(),
                },
            )?;
            let label = self.lookup(&annotated, source, index)?;
            annotated.set_item(join_field, label)?;
        }

        Ok(annotated)
    }
}

/// A grouping prefix as a Python tuple, hashed and compared by Python rules.
pub struct PyGroupKey {
    hash: isize,
    prefix: Py<PyTuple>,
}

impl PartialEq for PyGroupKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
            && Python::attach(|py| {
                self.prefix
                    .bind(py)
                    .eq(other.prefix.bind(py))
                    .unwrap_or(false)
            })
    }
}

impl Eq for PyGroupKey {}

impl Hash for PyGroupKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_isize(self.hash);
    }
}

impl TreeRows for PyRows<'_> {
    type GroupKey = PyGroupKey;

    fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn same_value(&self, current: usize, prev: usize, field: &str) -> Result<bool, TreeError> {
        let a = self.lookup(&self.rows[current], field, current)?;
        let b = self.lookup(&self.rows[prev], field, prev)?;
        Ok(a.eq(b)?)
    }

    fn prefix_keys(&self, index: usize, fields: &[String]) -> Result<Vec<PyGroupKey>, TreeError> {
        let mut values = Vec::with_capacity(fields.len());
        let mut keys = Vec::with_capacity(fields.len());
        for field in fields {
            values.push(self.lookup(&self.rows[index], field, index)?);
            // unhashable grouping values (lists, dicts) surface as TypeError here
            let prefix = PyTuple::new(self.py, &values)?;
            keys.push(PyGroupKey {
                hash: prefix.hash()?,
                prefix: prefix.unbind(),
            });
        }
        Ok(keys)
    }

    fn describe(&self, index: usize, field: &str) -> Result<String, TreeError> {
        Ok(self.lookup(&self.rows[index], field, index)?.repr()?.to_string())
    }
}
