//! Tree annotation: infer depth/parent from repeated grouping prefixes in sorted rows
use crate::errors::TreeError;
use crate::require_field;
use crate::types::{values_equal, MissingFieldPolicy, OrderPolicy, Record, TreeOptions};
use serde_json::{Number, Value};
use std::collections::HashSet;
use std::hash::Hash;

/// Where one row lands: its depth and the index of its nearest ancestor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub index: usize,
    pub depth: usize,
    pub parent: Option<usize>,
}

/// A sequence of rows the annotator can walk. Equality and group keys are
/// left to the implementation so each host keeps its own notion of `==`.
pub trait TreeRows {
    /// Hashable form of a grouping prefix; equal prefixes must give equal keys.
    type GroupKey: Eq + Hash;

    fn row_count(&self) -> usize;

    /// Whether `field` holds equal values on `current` and `prev`. Reads `current` first.
    fn same_value(&self, current: usize, prev: usize, field: &str) -> Result<bool, TreeError>;

    /// One key per prefix of `fields`, shortest first.
    fn prefix_keys(&self, index: usize, fields: &[String]) -> Result<Vec<Self::GroupKey>, TreeError>;

    /// Printable form of a field value, for diagnostics.
    fn describe(&self, index: usize, field: &str) -> Result<String, TreeError>;
}

/// Annotates `records` in one pass. Input rows are left untouched; the result holds copies.
pub fn annotate(records: &[Record], options: &TreeOptions) -> Result<Vec<Record>, TreeError> {
    let rows = RecordRows::new(records, options.missing_fields);
    let mut out = Vec::with_capacity(records.len());
    TreeAnnotator::new(&rows, options).run(|placed| {
        out.push(rows.annotated(placed, options)?);
        Ok(())
    })?;
    Ok(out)
}

/// Same as [`annotate`] but over a JSON array of objects.
pub fn annotate_value(records: &Value, options: &TreeOptions) -> Result<Value, TreeError> {
    let rows = crate::converters::records_from_json(records)?;
    let annotated = annotate(&rows, options)?;
    Ok(crate::converters::records_to_json(annotated))
}

/// Single-pass engine. The ancestor stack holds row indices;
/// its length is always the depth of the row being placed.
pub struct TreeAnnotator<'a, R: TreeRows + ?Sized> {
    rows: &'a R,
    options: &'a TreeOptions,
    ancestors: Vec<usize>,
    groups: Option<GroupLedger<R::GroupKey>>,
}

impl<'a, R: TreeRows + ?Sized> TreeAnnotator<'a, R> {
    pub fn new(rows: &'a R, options: &'a TreeOptions) -> Self {
        let groups = match options.out_of_order {
            OrderPolicy::Ignore => None,
            OrderPolicy::Warn | OrderPolicy::Reject => {
                Some(GroupLedger::new(options.grouping_fields.len()))
            }
        };
        TreeAnnotator {
            rows,
            options,
            ancestors: Vec::new(),
            groups,
        }
    }

    /// Places every row in order, handing each placement to `emit` before moving on,
    /// so the first failing row (in placement or in `emit`) stops the pass.
    pub fn run<F>(mut self, mut emit: F) -> Result<(), TreeError>
    where
        F: FnMut(Placement) -> Result<(), TreeError>,
    {
        let count = self.rows.row_count();
        log::debug!(
            "TreeAnnotator: annotating {} row(s) over grouping fields {:?}",
            count,
            self.options.grouping_fields
        );

        let mut deepest = 0;
        for index in 0..count {
            if index > 0 {
                let shared = self.shared_prefix(index)?;
                if let Some(groups) = self.groups.as_mut() {
                    groups.close(self.rows, index - 1, shared, &self.options.grouping_fields)?;
                    groups.check_reopened(self.rows, index, shared, self.options)?;
                }
                self.adjust_ancestors(index, shared);
            }
            let depth = self.ancestors.len();
            deepest = deepest.max(depth);
            emit(Placement {
                index,
                depth,
                parent: self.ancestors.last().copied(),
            })?;
        }

        log::debug!("TreeAnnotator: done, {} row(s), deepest level {}", count, deepest);
        Ok(())
    }

    /// Number of leading grouping fields equal between `index` and its predecessor.
    fn shared_prefix(&self, index: usize) -> Result<usize, TreeError> {
        let mut shared = 0;
        for field in &self.options.grouping_fields {
            if !self.rows.same_value(index, index - 1, field)? {
                break;
            }
            shared += 1;
        }
        Ok(shared)
    }

    fn adjust_ancestors(&mut self, index: usize, shared: usize) {
        let depth = self.ancestors.len();
        if shared > depth {
            // one level per step, however many fields still match
            self.ancestors.push(index - 1);
            log::trace!("TreeAnnotator: row {} opens level {}", index - 1, depth + 1);
        } else if shared < depth {
            self.ancestors.truncate(shared);
            log::trace!("TreeAnnotator: row {} pops back to level {}", index, shared);
        }
    }
}

/// Remembers every grouping prefix that has been closed, one set per prefix length.
/// A prefix seen again after closing means the rows were not clustered.
struct GroupLedger<K> {
    closed: Vec<HashSet<K>>,
}

impl<K: Eq + Hash> GroupLedger<K> {
    fn new(levels: usize) -> Self {
        GroupLedger {
            closed: (0..levels).map(|_| HashSet::new()).collect(),
        }
    }

    /// `prev` stops sharing everything past `shared` fields with its successor.
    fn close<R>(&mut self, rows: &R, prev: usize, shared: usize, fields: &[String]) -> Result<(), TreeError>
    where
        R: TreeRows<GroupKey = K> + ?Sized,
    {
        let keys = rows.prefix_keys(prev, fields)?;
        for (level, key) in keys.into_iter().enumerate().skip(shared) {
            self.closed[level].insert(key);
        }
        Ok(())
    }

    fn check_reopened<R>(
        &self,
        rows: &R,
        index: usize,
        shared: usize,
        options: &TreeOptions,
    ) -> Result<(), TreeError>
    where
        R: TreeRows<GroupKey = K> + ?Sized,
    {
        let keys = rows.prefix_keys(index, &options.grouping_fields)?;
        let reopened = keys
            .iter()
            .enumerate()
            .skip(shared)
            .find(|(level, key)| self.closed[*level].contains(*key));

        if let Some((level, _)) = reopened {
            let field = &options.grouping_fields[level];
            let value = rows.describe(index, field)?;
            match options.out_of_order {
                OrderPolicy::Reject => {
                    return Err(TreeError::OutOfOrder {
                        index,
                        field: field.clone(),
                        value,
                    });
                }
                _ => log::warn!(
                    "TreeAnnotator: row {} reopens group {}={} after it was closed; tree will be inconsistent",
                    index,
                    field,
                    value
                ),
            }
        }
        Ok(())
    }
}

static NULL: Value = Value::Null;

/// JSON-valued rows, compared with [`values_equal`].
pub struct RecordRows<'a> {
    records: &'a [Record],
    missing: MissingFieldPolicy,
}

impl<'a> RecordRows<'a> {
    pub fn new(records: &'a [Record], missing: MissingFieldPolicy) -> Self {
        RecordRows { records, missing }
    }

    fn lookup<'r>(&self, record: &'r Record, field: &str, index: usize) -> Result<&'r Value, TreeError> {
        match self.missing {
            MissingFieldPolicy::Null => Ok(record.get(field).unwrap_or(&NULL)),
            MissingFieldPolicy::Error => Ok(require_field!(record, field, index)),
        }
    }

    /// Copy of the placed row with depth, parent and (optionally) join fields set.
    pub fn annotated(&self, placed: Placement, options: &TreeOptions) -> Result<Record, TreeError> {
        let Placement { index, depth, parent } = placed;

        let parent = match parent {
            Some(ancestor) => self
                .lookup(&self.records[ancestor], &options.id_field, ancestor)?
                .clone(),
            None => Value::Null,
        };

        let mut annotated = self.records[index].clone();
        annotated.insert(options.depth_field.clone(), Value::from(depth));
        annotated.insert(options.parent_field.clone(), parent);

        if let Some(join_field) = &options.join_field_as {
            let source = options.grouping_fields.get(depth).ok_or(
                TreeError::JoinLevelOutOfRange {
                    index,
                    depth,
                    levels: options.grouping_fields.len(),
                },
            )?;
            let label = self.lookup(&annotated, source, index)?.clone();
            annotated.insert(join_field.clone(), label);
        }

        Ok(annotated)
    }
}

impl TreeRows for RecordRows<'_> {
    type GroupKey = String;

    fn row_count(&self) -> usize {
        self.records.len()
    }

    fn same_value(&self, current: usize, prev: usize, field: &str) -> Result<bool, TreeError> {
        let a = self.lookup(&self.records[current], field, current)?;
        let b = self.lookup(&self.records[prev], field, prev)?;
        Ok(values_equal(a, b))
    }

    fn prefix_keys(&self, index: usize, fields: &[String]) -> Result<Vec<String>, TreeError> {
        let mut keys = Vec::with_capacity(fields.len());
        let mut key = String::new();
        for field in fields {
            key.push_str(&canonical(self.lookup(&self.records[index], field, index)?));
            key.push('\u{1f}');
            keys.push(key.clone());
        }
        Ok(keys)
    }

    fn describe(&self, index: usize, field: &str) -> Result<String, TreeError> {
        Ok(self.lookup(&self.records[index], field, index)?.to_string())
    }
}

/// Text form under which `values_equal` values collide.
fn canonical(value: &Value) -> String {
    match value {
        Value::Number(n) => match integral(n) {
            Some(i) => i.to_string(),
            None => n.to_string(),
        },
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(canonical).collect();
            format!("[{}]", inner.join(","))
        }
        Value::Object(map) => {
            let mut inner: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{:?}:{}", k, canonical(v)))
                .collect();
            inner.sort();
            format!("{{{}}}", inner.join(","))
        }
        other => other.to_string(),
    }
}

/// The exact integer a number stands for, floats included when they are whole.
pub(crate) fn integral(n: &Number) -> Option<i128> {
    if let Some(i) = n.as_i64() {
        return Some(i128::from(i));
    }
    if let Some(u) = n.as_u64() {
        return Some(i128::from(u));
    }
    // 2^127: every whole f64 below it converts to i128 without loss
    const LIMIT: f64 = 1.701_411_834_604_692_3e38;
    n.as_f64()
        .filter(|f| f.is_finite() && f.fract() == 0.0 && f.abs() < LIMIT)
        .map(|f| f as i128)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(value: Value) -> Vec<Record> {
        crate::converters::records_from_json(&value).unwrap()
    }

    fn depths(out: &[Record]) -> Vec<u64> {
        out.iter().map(|r| r["__depth"].as_u64().unwrap()).collect()
    }

    fn parents(out: &[Record]) -> Vec<Value> {
        out.iter().map(|r| r["__parent"].clone()).collect()
    }

    fn geography() -> Vec<Record> {
        rows(json!([
            {"id": 0, "continent": "A0", "country": null, "city": null, "population": "P1"},
            {"id": 1, "continent": "A0", "country": "B1", "city": "C1", "population": "P2"},
            {"id": 2, "continent": "A2", "country": null, "city": null, "population": "P3"},
            {"id": 3, "continent": "A2", "country": "B3", "city": null, "population": "P4"},
            {"id": 4, "continent": "A2", "country": "B3", "city": "C4", "population": "P5"},
            {"id": 5, "continent": "A2", "country": "B3", "city": "C5", "population": "P6"},
        ]))
    }

    #[test]
    fn placements_name_ancestor_rows() {
        let records = geography();
        let opts = TreeOptions::new(["continent", "country", "city"]);
        let source = RecordRows::new(&records, opts.missing_fields);
        let mut placed = Vec::new();
        TreeAnnotator::new(&source, &opts)
            .run(|p| {
                placed.push((p.depth, p.parent));
                Ok(())
            })
            .unwrap();
        assert_eq!(
            placed,
            vec![(0, None), (1, Some(0)), (0, None), (1, Some(2)), (2, Some(3)), (2, Some(3))]
        );
    }

    #[test]
    fn emit_failure_stops_the_pass() {
        let records = geography();
        let opts = TreeOptions::new(["continent"]);
        let source = RecordRows::new(&records, opts.missing_fields);
        let mut seen = 0;
        let err = TreeAnnotator::new(&source, &opts)
            .run(|p| {
                seen += 1;
                if p.index == 2 {
                    return Err(TreeError::MissingField { field: "id".into(), index: 2 });
                }
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, TreeError::MissingField { index: 2, .. }));
        assert_eq!(seen, 3);
    }

    #[test]
    fn two_level_grouping() {
        let input = rows(json!([
            {"id": 0, "a": "X", "b": "P"},
            {"id": 1, "a": "X", "b": "Q"},
            {"id": 2, "a": "Y", "b": "P"},
        ]));
        let out = annotate(&input, &TreeOptions::new(["a", "b"])).unwrap();
        assert_eq!(depths(&out), vec![0, 1, 0]);
        assert_eq!(parents(&out), vec![json!(null), json!(0), json!(null)]);
    }

    #[test]
    fn three_level_geography() {
        let out = annotate(&geography(), &TreeOptions::new(["continent", "country", "city"])).unwrap();
        assert_eq!(depths(&out), vec![0, 1, 0, 1, 2, 2]);
        assert_eq!(
            parents(&out),
            vec![json!(null), json!(0), json!(null), json!(2), json!(3), json!(3)]
        );
    }

    #[test]
    fn join_field_takes_value_at_own_depth() {
        let opts = TreeOptions::new(["continent", "country", "city"]).join_field_as("label");
        let out = annotate(&geography(), &opts).unwrap();
        let labels: Vec<Value> = out.iter().map(|r| r["label"].clone()).collect();
        assert_eq!(
            labels,
            vec![json!("A0"), json!("B1"), json!("A2"), json!("B3"), json!("C4"), json!("C5")]
        );
    }

    #[test]
    fn output_keeps_original_fields_first() {
        let opts = TreeOptions::new(["continent", "country", "city"]).join_field_as("label");
        let out = annotate(&geography(), &opts).unwrap();
        let keys: Vec<&str> = out[0].keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec!["id", "continent", "country", "city", "population", "__depth", "__parent", "label"]
        );
    }

    #[test]
    fn input_is_not_mutated() {
        let input = geography();
        let before = input.clone();
        annotate(&input, &TreeOptions::new(["continent", "country"])).unwrap();
        assert_eq!(input, before);
    }

    #[test]
    fn depth_grows_one_level_per_step() {
        // every field matches, yet each step only goes one deeper
        let input = rows(json!([
            {"id": "a", "x": 1, "y": 1, "z": 1},
            {"id": "b", "x": 1, "y": 1, "z": 1},
            {"id": "c", "x": 1, "y": 1, "z": 1},
        ]));
        let out = annotate(&input, &TreeOptions::new(["x", "y", "z"])).unwrap();
        assert_eq!(depths(&out), vec![0, 1, 2]);
        assert_eq!(parents(&out), vec![json!(null), json!("a"), json!("b")]);
    }

    #[test]
    fn compares_against_predecessor_not_ancestor() {
        let input = rows(json!([
            {"id": 0, "a": "X", "b": "P"},
            {"id": 1, "a": "X", "b": "Q"},
            {"id": 2, "a": "X", "b": "R"},
        ]));
        let out = annotate(&input, &TreeOptions::new(["a", "b"])).unwrap();
        assert_eq!(depths(&out), vec![0, 1, 1]);
        assert_eq!(parents(&out), vec![json!(null), json!(0), json!(0)]);
    }

    #[test]
    fn empty_grouping_keeps_everything_at_root() {
        let input = rows(json!([{"id": 0}, {"id": 1}]));
        let out = annotate(&input, &TreeOptions::default()).unwrap();
        assert_eq!(depths(&out), vec![0, 0]);
    }

    #[test]
    fn join_past_last_grouping_field_is_an_error() {
        let input = rows(json!([
            {"id": 0, "a": "X"},
            {"id": 1, "a": "X"},
        ]));
        let err = annotate(&input, &TreeOptions::new(["a"]).join_field_as("label")).unwrap_err();
        assert!(matches!(
            err,
            TreeError::JoinLevelOutOfRange { index: 1, depth: 1, levels: 1 }
        ));
    }

    #[test]
    fn missing_grouping_field_fails_on_first_access() {
        let input = rows(json!([
            {"id": 0, "a": "X", "b": "P"},
            {"id": 1, "b": "P"},
        ]));
        let err = annotate(&input, &TreeOptions::new(["a", "b"])).unwrap_err();
        assert!(matches!(err, TreeError::MissingField { ref field, index: 1 } if field == "a"));
    }

    #[test]
    fn fields_past_first_mismatch_are_never_read() {
        let input = rows(json!([
            {"id": 0, "a": "X"},
            {"id": 1, "a": "Y"},
        ]));
        let out = annotate(&input, &TreeOptions::new(["a", "b"])).unwrap();
        assert_eq!(depths(&out), vec![0, 0]);
    }

    #[test]
    fn missing_id_only_matters_for_parents() {
        let input = rows(json!([
            {"a": "X", "b": "P"},
            {"id": 1, "a": "X", "b": "Q"},
        ]));
        let err = annotate(&input, &TreeOptions::new(["a", "b"])).unwrap_err();
        assert!(matches!(err, TreeError::MissingField { ref field, index: 0 } if field == "id"));

        let leaf_without_id = rows(json!([
            {"id": 0, "a": "X", "b": "P"},
            {"a": "X", "b": "Q"},
        ]));
        assert!(annotate(&leaf_without_id, &TreeOptions::new(["a", "b"])).is_ok());
    }

    #[test]
    fn null_policy_reads_absent_fields_as_null() {
        let input = rows(json!([
            {"id": 0, "a": "X"},
            {"id": 1, "a": "X", "b": null},
        ]));
        let opts = TreeOptions::new(["a", "b"]).missing_fields(MissingFieldPolicy::Null);
        let out = annotate(&input, &opts).unwrap();
        assert_eq!(depths(&out), vec![0, 1]);
    }

    #[test]
    fn custom_field_names() {
        let input = rows(json!([
            {"key": "r", "a": "X", "b": "P"},
            {"key": "s", "a": "X", "b": "Q"},
        ]));
        let opts = TreeOptions::new(["a", "b"])
            .id_field("key")
            .depth_field("__indent")
            .parent_field("parentId");
        let out = annotate(&input, &opts).unwrap();
        assert_eq!(out[1]["__indent"], json!(1));
        assert_eq!(out[1]["parentId"], json!("r"));
        assert!(!out[1].contains_key("__depth"));
    }

    fn scrambled() -> Vec<Record> {
        rows(json!([
            {"id": 0, "a": "X", "b": "P"},
            {"id": 1, "a": "Y", "b": "P"},
            {"id": 2, "a": "X", "b": "Q"},
        ]))
    }

    #[test]
    fn out_of_order_input_is_tolerated_by_default() {
        let out = annotate(&scrambled(), &TreeOptions::new(["a", "b"])).unwrap();
        assert_eq!(depths(&out), vec![0, 0, 0]);
    }

    #[test]
    fn out_of_order_input_can_be_rejected() {
        let opts = TreeOptions::new(["a", "b"]).out_of_order(OrderPolicy::Reject);
        let err = annotate(&scrambled(), &opts).unwrap_err();
        match err {
            TreeError::OutOfOrder { index, field, value } => {
                assert_eq!(index, 2);
                assert_eq!(field, "a");
                assert_eq!(value, "\"X\"");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn warn_policy_still_annotates() {
        let opts = TreeOptions::new(["a", "b"]).out_of_order(OrderPolicy::Warn);
        let out = annotate(&scrambled(), &opts).unwrap();
        assert_eq!(depths(&out), vec![0, 0, 0]);
    }

    #[test]
    fn sorted_input_passes_reject_policy() {
        let opts = TreeOptions::new(["continent", "country", "city"]).out_of_order(OrderPolicy::Reject);
        assert!(annotate(&geography(), &opts).is_ok());
    }

    #[test]
    fn reopened_inner_group_is_detected() {
        let input = rows(json!([
            {"id": 0, "a": "X", "b": "P"},
            {"id": 1, "a": "X", "b": "Q"},
            {"id": 2, "a": "X", "b": "P"},
        ]));
        let opts = TreeOptions::new(["a", "b"]).out_of_order(OrderPolicy::Reject);
        let err = annotate(&input, &opts).unwrap_err();
        assert!(matches!(err, TreeError::OutOfOrder { index: 2, ref field, .. } if field == "b"));
    }

    #[test]
    fn canonical_keys_collapse_loose_numbers() {
        assert_eq!(canonical(&json!(1)), canonical(&json!(1.0)));
        assert_ne!(canonical(&json!(1)), canonical(&json!("1")));
        assert_eq!(canonical(&json!(1e16)), canonical(&json!(10000000000000000u64)));
        assert_ne!(canonical(&json!(9007199254740993u64)), canonical(&json!(9007199254740992.0)));
    }

    #[test]
    fn reopened_group_found_across_int_and_float_spellings() {
        let input = rows(json!([
            {"id": 0, "a": 10000000000000000u64},
            {"id": 1, "a": 2},
            {"id": 2, "a": 1e16},
        ]));
        let opts = TreeOptions::new(["a"]).out_of_order(OrderPolicy::Reject);
        let err = annotate(&input, &opts).unwrap_err();
        assert!(matches!(err, TreeError::OutOfOrder { index: 2, .. }));
    }

    #[test]
    fn annotate_value_round_trips_json() {
        let out = annotate_value(
            &json!([{"id": 0, "a": "X"}, {"id": 1, "a": "X"}]),
            &TreeOptions::new(["a"]),
        )
        .unwrap();
        assert_eq!(
            out,
            json!([
                {"id": 0, "a": "X", "__depth": 0, "__parent": null},
                {"id": 1, "a": "X", "__depth": 1, "__parent": 0},
            ])
        );
    }
}
