//! Record model and annotation options
use crate::errors::TreeError;
use crate::tree::integral;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A flat row as handed over by the host: ordered field name -> value.
pub type Record = IndexMap<String, Value>;

pub const DEPTH_FIELD: &str = "__depth";
pub const PARENT_FIELD: &str = "__parent";
pub const DEFAULT_ID_FIELD: &str = "id";

/// What to do when a record lacks an id or grouping field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingFieldPolicy {
    /// Fail with `TreeError::MissingField` on first access.
    #[default]
    Error,
    /// Read absent keys as `null`.
    Null,
}

/// What to do when equal-prefix records are not contiguous.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderPolicy {
    /// Annotate whatever comes in; no bookkeeping.
    #[default]
    Ignore,
    /// Log a warning per reopened group and keep going.
    Warn,
    /// Fail with `TreeError::OutOfOrder`.
    Reject,
}

impl std::str::FromStr for MissingFieldPolicy {
    type Err = TreeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "error" => Ok(MissingFieldPolicy::Error),
            "null" => Ok(MissingFieldPolicy::Null),
            other => Err(TreeError::TypeConversionError {
                expected: "'error' or 'null'".into(),
                actual: format!("'{}'", other),
            }),
        }
    }
}

impl std::str::FromStr for OrderPolicy {
    type Err = TreeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ignore" => Ok(OrderPolicy::Ignore),
            "warn" => Ok(OrderPolicy::Warn),
            "reject" => Ok(OrderPolicy::Reject),
            other => Err(TreeError::TypeConversionError {
                expected: "'ignore', 'warn' or 'reject'".into(),
                actual: format!("'{}'", other),
            }),
        }
    }
}

/// Everything `annotate` needs besides the records themselves.
///
/// Deserializable so hosts can keep it in a config document:
///
/// ```json
/// { "grouping_fields": ["milestone", "epic", "task"], "join_field_as": "title" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TreeOptions {
    /// Coarsest first.
    pub grouping_fields: Vec<String>,
    pub join_field_as: Option<String>,
    pub id_field: String,
    pub depth_field: String,
    pub parent_field: String,
    pub missing_fields: MissingFieldPolicy,
    pub out_of_order: OrderPolicy,
}

impl Default for TreeOptions {
    fn default() -> Self {
        TreeOptions {
            grouping_fields: Vec::new(),
            join_field_as: None,
            id_field: DEFAULT_ID_FIELD.to_string(),
            depth_field: DEPTH_FIELD.to_string(),
            parent_field: PARENT_FIELD.to_string(),
            missing_fields: MissingFieldPolicy::default(),
            out_of_order: OrderPolicy::default(),
        }
    }
}

impl TreeOptions {
    pub fn new<I, S>(grouping_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TreeOptions {
            grouping_fields: grouping_fields.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn from_json(source: &str) -> Result<Self, TreeError> {
        Ok(serde_json::from_str(source)?)
    }

    pub fn join_field_as(mut self, name: impl Into<String>) -> Self {
        self.join_field_as = Some(name.into());
        self
    }

    pub fn id_field(mut self, name: impl Into<String>) -> Self {
        self.id_field = name.into();
        self
    }

    pub fn depth_field(mut self, name: impl Into<String>) -> Self {
        self.depth_field = name.into();
        self
    }

    pub fn parent_field(mut self, name: impl Into<String>) -> Self {
        self.parent_field = name.into();
        self
    }

    pub fn missing_fields(mut self, policy: MissingFieldPolicy) -> Self {
        self.missing_fields = policy;
        self
    }

    pub fn out_of_order(mut self, policy: OrderPolicy) -> Self {
        self.out_of_order = policy;
        self
    }

    /// Depth written by a previous `annotate` call, if any.
    pub fn depth_of(&self, record: &Record) -> Option<usize> {
        record
            .get(&self.depth_field)
            .and_then(Value::as_u64)
            .map(|d| d as usize)
    }

    /// Parent id written by a previous `annotate` call. `None` for roots.
    pub fn parent_of<'r>(&self, record: &'r Record) -> Option<&'r Value> {
        record.get(&self.parent_field).filter(|v| !v.is_null())
    }
}

/// Loose equality for JSON values: `1 == 1.0` holds exactly (no rounding through f64),
/// containers compare deep, and bools never equal numbers.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if x == y {
                return true;
            }
            match (integral(x), integral(y)) {
                (Some(i), Some(j)) => i == j,
                (None, None) => match (x.as_f64(), y.as_f64()) {
                    (Some(fx), Some(fy)) => fx == fy,
                    _ => false,
                },
                _ => false,
            }
        }
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}
