//! Search-expression compilation (§4.G): ordered key conditions compiled
//! into a sort-key range (the "sort-key phase") plus a residual predicate
//! (the "filter phase") evaluated by the persistence layer.

use crate::wire::Value;

use super::{FilterExpr, KeyPath, MatchMode, QueryRequest};

/// A search operator, per the §4.G condition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Prefix,
    Gte,
    Lte,
    Between,
    Contains,
    ContainsNi,
}

/// One ordered condition: `{field op value [value2]}`. `field` names
/// either a positional index-key segment (`"keys.0"`, `"keys.1"`, …) when
/// it can drive the sort-key phase, or a data field otherwise.
#[derive(Debug, Clone)]
pub struct Condition {
    pub field: String,
    pub op: Op,
    pub value: Value,
    pub value2: Option<Value>,
}

impl Condition {
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self { field: field.into(), op: Op::Eq, value, value2: None }
    }

    pub fn prefix(field: impl Into<String>, value: Value) -> Self {
        Self { field: field.into(), op: Op::Prefix, value, value2: None }
    }

    pub fn gte(field: impl Into<String>, value: Value) -> Self {
        Self { field: field.into(), op: Op::Gte, value, value2: None }
    }

    pub fn lte(field: impl Into<String>, value: Value) -> Self {
        Self { field: field.into(), op: Op::Lte, value, value2: None }
    }

    pub fn between(field: impl Into<String>, lo: Value, hi: Value) -> Self {
        Self { field: field.into(), op: Op::Between, value: lo, value2: Some(hi) }
    }

    pub fn contains(field: impl Into<String>, needle: impl Into<String>, case_insensitive: bool) -> Self {
        let op = if case_insensitive { Op::ContainsNi } else { Op::Contains };
        Self { field: field.into(), op, value: Value::Str(needle.into()), value2: None }
    }

    /// Whether this condition names the index-key segment at position
    /// `position` (`"keys.<position>"`), the shape the sort-key phase
    /// compiles in order.
    fn is_key_segment(&self, position: usize) -> bool {
        self.field.strip_prefix("keys.").and_then(|n| n.parse::<usize>().ok()) == Some(position)
    }
}

/// Sorts greater than any real key segment (JSON row-ids, SHA-1 hex
/// hashes, user key values are all plain ASCII). Appended to a strict
/// upper bound so it stays inclusive of the trailing segments every
/// stored sort key carries beyond the conditions a search names —
/// `rowIdJSON` + `contentHash` for index entries, or any id segments
/// past the ones a base search constrains.
const KEY_SEGMENT_SENTINEL: &str = "\u{10FFFF}";

fn value_to_segment(value: &Value) -> String {
    match value {
        Value::Str(s) => s.clone(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

/// A compiled search: an optional target index (`None` means the base
/// namespace), plus the ordered conditions driving the sort-key and
/// filter phases.
#[derive(Debug, Clone)]
pub struct SearchSpec {
    pub index: Option<String>,
    pub conditions: Vec<Condition>,
}

impl SearchSpec {
    pub fn on_base(conditions: Vec<Condition>) -> Self {
        Self { index: None, conditions }
    }

    pub fn on_index(name: impl Into<String>, conditions: Vec<Condition>) -> Self {
        Self { index: Some(name.into()), conditions }
    }

    /// Compile into a `QueryRequest` against partition `pk`: a sort-key
    /// range from the leading run of key-segment conditions, and a
    /// residual `filterExpression` from everything else.
    pub fn compile(&self, pk: &KeyPath) -> QueryRequest {
        let namespace_prefix: KeyPath = match &self.index {
            Some(name) => vec!["index".to_string(), name.clone()],
            None => vec!["base".to_string()],
        };

        let mut from = namespace_prefix.clone();
        let mut to = namespace_prefix.clone();
        let mut match_mode = MatchMode::Strict;
        let mut filter_conditions = Vec::new();
        let mut in_sort_phase = true;
        let mut position = 0usize;

        for cond in &self.conditions {
            let sort_key_op = matches!(cond.op, Op::Eq | Op::Between | Op::Gte | Op::Lte | Op::Prefix);
            if in_sort_phase && sort_key_op && cond.is_key_segment(position) {
                match cond.op {
                    Op::Eq => {
                        let seg = value_to_segment(&cond.value);
                        from.push(seg.clone());
                        to.push(seg);
                    }
                    Op::Between => {
                        from.push(value_to_segment(&cond.value));
                        to.push(value_to_segment(cond.value2.as_ref().unwrap_or(&cond.value)));
                    }
                    Op::Gte => {
                        // `to` stays at the current (pre-segment) prefix —
                        // equivalent to truncating the full key by one
                        // segment — so the upper bound matches any value
                        // in the outer range, per §4.G's open-bound rule.
                        from.push(value_to_segment(&cond.value));
                    }
                    Op::Lte => {
                        // Symmetric: `from` stays at the pre-segment
                        // prefix, `to` gets the segment value.
                        to.push(value_to_segment(&cond.value));
                    }
                    Op::Prefix => {
                        let seg = value_to_segment(&cond.value);
                        from.push(seg.clone());
                        to.push(seg);
                        match_mode = MatchMode::Loose;
                    }
                    _ => unreachable!(),
                }
                position += 1;
                continue;
            }
            in_sort_phase = false;
            filter_conditions.push(cond.clone());
        }

        // A strict upper bound names only the segments a condition
        // constrained; every stored key under this prefix carries further
        // trailing segments, so without a sentinel `sk <= to` would wrongly
        // exclude them.
        if match_mode == MatchMode::Strict {
            to.push(KEY_SEGMENT_SENTINEL.to_string());
        }

        let filter_field_base = "data".to_string();
        let filter_sort_key_offset = if self.index.is_some() { 2 } else { 1 };
        let filter_expression = if filter_conditions.is_empty() {
            None
        } else {
            Some(FilterExpr::And(
                filter_conditions
                    .iter()
                    .map(|c| match c.op {
                        Op::Contains => FilterExpr::Contains { field: c.field.clone(), needle: value_to_segment(&c.value), case_insensitive: false },
                        Op::ContainsNi => FilterExpr::Contains { field: c.field.clone(), needle: value_to_segment(&c.value), case_insensitive: true },
                        _ => FilterExpr::Eq { field: c.field.clone(), value: c.value.clone() },
                    })
                    .collect(),
            ))
        };

        QueryRequest {
            partition_key: pk.clone(),
            sort_key_from: from,
            sort_key_to: to,
            sort_key_to_match: match_mode,
            filter_expression,
            filter_field_base,
            filter_sort_key_offset,
            projection_filter: Vec::new(),
            continuation_token: None,
            max_items: None,
        }
    }
}
