use regex::Regex;
use serde_json::{Map, Number, Value};
use std::cmp::Ordering;

use super::types::{CmpOp, Direction, FieldPath, Predicate, QueryPlan, Stage};

/// A [`QueryPlan`] with its regular expressions compiled, ready to run against records.
#[derive(Debug, Clone)]
pub struct CompiledPlan {
    pub table: String,
    filters: Vec<CompiledPredicate>,
    order: Option<(FieldPath, Direction)>,
    primary_key: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Clone)]
enum CompiledPredicate {
    Compare { path: FieldPath, op: CmpOp, value: Value },
    Match { path: FieldPath, regex: Regex },
    Contains { path: FieldPath, values: Vec<Value> },
}

impl CompiledPlan {
    /// # Errors
    /// Returns the regex error of the first `match` stage whose pattern does not compile.
    pub fn new(plan: &QueryPlan) -> Result<Self, regex::Error> {
        let mut filters = Vec::new();
        let mut order = None;
        let mut primary_key = None;
        let mut limit = None;
        for stage in &plan.stages {
            match stage {
                Stage::OrderBy { path, direction } => order = Some((path.clone(), *direction)),
                Stage::Filter(p) => filters.push(match p {
                    Predicate::Compare { path, op, value } => {
                        CompiledPredicate::Compare { path: path.clone(), op: *op, value: value.clone() }
                    }
                    Predicate::Match { path, pattern } => {
                        CompiledPredicate::Match { path: path.clone(), regex: Regex::new(pattern)? }
                    }
                    Predicate::Contains { path, values } => {
                        CompiledPredicate::Contains { path: path.clone(), values: values.clone() }
                    }
                }),
                Stage::Pluck(field) => primary_key = Some(field.clone()),
                Stage::Limit(n) => limit = Some(*n),
            }
        }
        Ok(Self { table: plan.table.clone(), filters, order, primary_key, limit })
    }

    /// True when every filter stage accepts `record`.
    pub fn matches(&self, record: &Value) -> bool {
        self.filters.iter().all(|f| eval_compiled(record, f))
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn is_windowed(&self) -> bool {
        self.limit.is_some()
    }

    /// Runs the plan over `rows`: filter, sort, project, limit.
    pub fn run<'a>(&self, rows: impl IntoIterator<Item = &'a Value>) -> Vec<Value> {
        let mut hits: Vec<&Value> = rows.into_iter().filter(|r| self.matches(r)).collect();
        if let Some((path, direction)) = &self.order {
            let pk = self.primary_key.as_deref();
            hits.sort_by(|a, b| compare_records(a, b, path, *direction, pk));
        }
        let take = self.limit.unwrap_or(usize::MAX);
        hits.into_iter().take(take).map(|r| self.project(r)).collect()
    }

    /// Applies the final projection; records without a projection stage pass through whole.
    pub fn project(&self, record: &Value) -> Value {
        match &self.primary_key {
            Some(field) => project_fields(record, std::slice::from_ref(field)),
            None => record.clone(),
        }
    }
}

fn eval_compiled(record: &Value, predicate: &CompiledPredicate) -> bool {
    match predicate {
        CompiledPredicate::Compare { path, op, value } => {
            get_path(record, path).is_some_and(|v| compare_op(v, *op, value))
        }
        CompiledPredicate::Match { path, regex } => match get_path(record, path) {
            Some(Value::String(s)) => regex.is_match(s),
            _ => false,
        },
        CompiledPredicate::Contains { path, values } => {
            get_path(record, path).is_some_and(|v| values.iter().any(|x| values_equal(x, v)))
        }
    }
}

/// Evaluates a single predicate. A missing field never matches.
pub fn eval_predicate(record: &Value, predicate: &Predicate) -> bool {
    match predicate {
        Predicate::Compare { path, op, value } => {
            get_path(record, path).is_some_and(|v| compare_op(v, *op, value))
        }
        Predicate::Match { path, pattern } => match get_path(record, path) {
            Some(Value::String(s)) => Regex::new(pattern).is_ok_and(|r| r.is_match(s)),
            _ => false,
        },
        Predicate::Contains { path, values } => {
            get_path(record, path).is_some_and(|v| values.iter().any(|x| values_equal(x, v)))
        }
    }
}

fn compare_op(field: &Value, op: CmpOp, value: &Value) -> bool {
    match op {
        CmpOp::Eq => values_equal(field, value),
        CmpOp::Ne => !values_equal(field, value),
        CmpOp::Gt => compare_values(field, value) == Ordering::Greater,
        CmpOp::Ge => compare_values(field, value) != Ordering::Less,
        CmpOp::Lt => compare_values(field, value) == Ordering::Less,
        CmpOp::Le => compare_values(field, value) != Ordering::Greater,
    }
}

/// Resolves a nested path. Numeric segments index into arrays.
pub fn get_path<'a>(record: &'a Value, path: &FieldPath) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    let mut cur = record;
    for seg in path.segments() {
        cur = match cur {
            Value::Object(map) => map.get(seg)?,
            Value::Array(items) => items.get(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(cur)
}

pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare_values(a, b) == Ordering::Equal,
        _ => a == b,
    }
}

/// Integers widened so that every `i64` and `u64` compares exactly.
fn exact_int(n: &Number) -> Option<i128> {
    n.as_i64().map(i128::from).or_else(|| n.as_u64().map(i128::from))
}

pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (exact_int(x), exact_int(y)) {
            (Some(i), Some(j)) => i.cmp(&j),
            _ => {
                let fx = x.as_f64().unwrap_or(f64::NAN);
                let fy = y.as_f64().unwrap_or(f64::NAN);
                fx.total_cmp(&fy)
            }
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y) {
                let ord = compare_values(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

const fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Orders two records by `path`. Rows missing the field come first in ascending order;
/// ties fall back to the primary key.
pub fn compare_records(
    a: &Value,
    b: &Value,
    path: &FieldPath,
    direction: Direction,
    primary_key: Option<&str>,
) -> Ordering {
    let ord = match (get_path(a, path), get_path(b, path)) {
        (Some(x), Some(y)) => compare_values(x, y),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    };
    let ord = match direction {
        Direction::Asc => ord,
        Direction::Desc => ord.reverse(),
    };
    ord.then_with(|| match primary_key {
        Some(pk) => compare_values(
            a.get(pk).unwrap_or(&Value::Null),
            b.get(pk).unwrap_or(&Value::Null),
        ),
        None => Ordering::Equal,
    })
}

pub fn project_fields(record: &Value, fields: &[String]) -> Value {
    let mut out = Map::new();
    for f in fields {
        if let Some(v) = record.get(f) {
            out.insert(f.clone(), v.clone());
        }
    }
    Value::Object(out)
}
