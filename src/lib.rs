//! Native core for the SlickGrid bridge: tree annotation of flat rows and JS function references
#[cfg(feature = "python")]
mod bindings;
#[cfg(feature = "python")]
mod py_tree;
pub mod converters;
pub mod errors;
pub mod js_ref;
pub mod tree;
pub mod types;

pub use errors::TreeError;
pub use js_ref::{find_js_refs, JsRef, KNOWN_JS_MODULES};
pub use tree::{annotate, annotate_value, Placement, RecordRows, TreeAnnotator, TreeRows};
pub use types::{
    values_equal, MissingFieldPolicy, OrderPolicy, Record, TreeOptions, DEPTH_FIELD, PARENT_FIELD,
};

#[cfg(feature = "python")]
use pyo3::prelude::*;

#[cfg(feature = "python")]
#[pymodule]
fn rust_slickgrid(m: &Bound<'_, PyModule>) -> PyResult<()> {
    bindings::register(m)
}
