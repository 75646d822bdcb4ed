//! Python-facing functions and the JS module proxy class
use crate::converters::python_to_json;
use crate::js_ref::{find_js_refs as scan_js_refs, JsRef};
use crate::py_tree::annotate_py;
use crate::types::{MissingFieldPolicy, OrderPolicy, TreeOptions, DEPTH_FIELD, PARENT_FIELD};
use pyo3::exceptions::PyAttributeError;
use pyo3::prelude::*;
use pyo3::types::PyList;

/// Returns a copy of `data` with `__depth`/`__parent` (and optionally a joined label) added.
#[pyfunction]
#[pyo3(signature = (
    data,
    tree_fields,
    join_fields_as=None,
    id_field="id",
    depth_field="__depth",
    parent_field="__parent",
    missing_fields="error",
    on_out_of_order="ignore",
))]
#[allow(clippy::too_many_arguments)]
pub fn add_tree_info<'py>(
    py: Python<'py>,
    data: &Bound<'py, PyAny>,
    tree_fields: Vec<String>,
    join_fields_as: Option<String>,
    id_field: &str,
    depth_field: &str,
    parent_field: &str,
    missing_fields: &str,
    on_out_of_order: &str,
) -> PyResult<Bound<'py, PyList>> {
    let mut options = TreeOptions::new(tree_fields)
        .id_field(id_field)
        .depth_field(depth_field)
        .parent_field(parent_field)
        .missing_fields(missing_fields.parse::<MissingFieldPolicy>()?)
        .out_of_order(on_out_of_order.parse::<OrderPolicy>()?);
    if let Some(join) = join_fields_as {
        options = options.join_field_as(join);
    }

    Ok(annotate_py(py, data, &options)?)
}

/// `js_ref("Formatters", "tree") == "js$Formatters.tree"`
#[pyfunction]
pub fn js_ref(module: &str, member: &str) -> String {
    JsRef::new(module, member).to_string()
}

/// Lists `(json_pointer, reference, module_is_known)` for every JS reference in `obj`.
#[pyfunction]
pub fn find_js_refs<'py>(
    py: Python<'py>,
    obj: &Bound<'py, PyAny>,
) -> PyResult<Vec<(String, String, bool)>> {
    let value = python_to_json(py, obj)?;
    Ok(scan_js_refs(&value)
        .into_iter()
        .map(|(pointer, r)| {
            let known = r.is_known();
            (pointer, r.to_string(), known)
        })
        .collect())
}

/// Stand-in for a JS module: any attribute turns into a `js$<module>.<attr>` string.
#[pyclass(frozen, module = "rust_slickgrid")]
pub struct JsModuleProxy {
    #[pyo3(get)]
    name: String,
}

#[pymethods]
impl JsModuleProxy {
    #[new]
    fn new(name: String) -> Self {
        JsModuleProxy { name }
    }

    fn __getattr__(&self, key: &str) -> PyResult<String> {
        reject_dunder(key)?;
        Ok(JsRef::new(self.name.as_str(), key).to_string())
    }

    fn __repr__(&self) -> String {
        format!("JsModuleProxy({:?})", self.name)
    }
}

/// Module-level `__getattr__`, so `from rust_slickgrid import Formatters` yields a proxy.
#[pyfunction]
#[pyo3(name = "__getattr__")]
pub fn module_getattr(name: &str) -> PyResult<JsModuleProxy> {
    reject_dunder(name)?;
    Ok(JsModuleProxy::new(name.to_string()))
}

// Introspection probes (__wrapped__, __path__, ...) must keep seeing AttributeError
fn reject_dunder(name: &str) -> PyResult<()> {
    if name.starts_with("__") && name.ends_with("__") {
        return Err(PyAttributeError::new_err(name.to_string()));
    }
    Ok(())
}

/// Adds every function, class and constant to `m`.
pub fn register(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(add_tree_info, m)?)?;
    m.add_function(wrap_pyfunction!(js_ref, m)?)?;
    m.add_function(wrap_pyfunction!(find_js_refs, m)?)?;
    m.add_function(wrap_pyfunction!(module_getattr, m)?)?;
    m.add_class::<JsModuleProxy>()?;

    m.add("DEPTH_FIELD", DEPTH_FIELD)?;
    m.add("PARENT_FIELD", PARENT_FIELD)?;
    Ok(())
}
