//! Symbolic references to JS functions (`js$Module.member`), passed by name instead of by value
use crate::errors::TreeError;
use phf::phf_set;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

pub const JS_REF_PREFIX: &str = "js$";

// Modules the grid component resolves on its side
pub static KNOWN_JS_MODULES: phf::Set<&'static str> = phf_set! {
    "Formatters",
    "FieldType",
    "Filters",
    "OperatorType",
    "ExportServices",
    "StreamlitSlickGridFormatters",
    "StreamlitSlickGridSorters",
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JsRef {
    pub module: String,
    pub member: String,
}

impl JsRef {
    pub fn new(module: impl Into<String>, member: impl Into<String>) -> Self {
        JsRef {
            module: module.into(),
            member: member.into(),
        }
    }

    pub fn is_known(&self) -> bool {
        KNOWN_JS_MODULES.contains(self.module.as_str())
    }
}

impl fmt::Display for JsRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}.{}", JS_REF_PREFIX, self.module, self.member)
    }
}

impl FromStr for JsRef {
    type Err = TreeError;

    /// Only the first two dot-separated segments count; the rest is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TreeError::InvalidJsRef {
            reference: s.to_string(),
        };
        let body = s.strip_prefix(JS_REF_PREFIX).ok_or_else(invalid)?;
        let mut parts = body.split('.');
        let module = parts.next().filter(|m| !m.is_empty()).ok_or_else(invalid)?;
        let member = parts.next().filter(|m| !m.is_empty()).ok_or_else(invalid)?;
        Ok(JsRef::new(module, member))
    }
}

/// Every JS reference inside a column/options document, as (JSON pointer, reference).
/// Malformed `js$` strings are skipped.
pub fn find_js_refs(value: &Value) -> Vec<(String, JsRef)> {
    let mut found = Vec::new();
    let mut stack = vec![(String::new(), value)];

    while let Some((pointer, node)) = stack.pop() {
        match node {
            Value::String(s) if s.starts_with(JS_REF_PREFIX) => match s.parse::<JsRef>() {
                Ok(js_ref) => found.push((pointer, js_ref)),
                Err(e) => log::debug!("find_js_refs: skipping {} at '{}'", e, pointer),
            },
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate().rev() {
                    stack.push((format!("{}/{}", pointer, i), item));
                }
            }
            Value::Object(map) => {
                for (key, item) in map.iter().rev() {
                    stack.push((format!("{}/{}", pointer, escape_pointer(key)), item));
                }
            }
            _ => {}
        }
    }

    found
}

fn escape_pointer(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}
