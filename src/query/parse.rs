use crate::errors::{ParseError, ParseErrorKind};
use serde::Deserialize;
use serde_json::Value;

use super::types::{
    Condition, FieldPath, MAX_CONDITIONS, MAX_IN_SET, MAX_PATH_DEPTH, Operator, QueryDescriptor,
};

// Serde-facing shape of the encoded query. Every field is kept loose so that each
// validation rule can report its own error kind.
#[derive(Debug, Default, Deserialize)]
struct QuerySerde {
    #[serde(default)]
    table: Option<Value>,
    #[serde(default)]
    query: Option<Value>,
    #[serde(default)]
    order: Option<Value>,
    #[serde(default)]
    desc: Option<Value>,
    #[serde(default)]
    limit: Option<Value>,
}

/// Parses a subscription name of the form `<prefix>?<json>`.
///
/// ```text
/// search?{ "table": "people", "query": [[ "name", "match", "Wolf" ], [ "age", "gt", 25 ]] }
/// ```
///
/// Only the first `?` separates the prefix; later ones belong to the query.
///
/// # Errors
/// Returns a [`ParseError`] naming the first rule the input violates.
pub fn parse(input: &str) -> Result<QueryDescriptor, ParseError> {
    let fail = |kind| ParseError::new(input, kind);

    let (_prefix, encoded) =
        input.split_once('?').ok_or_else(|| fail(ParseErrorKind::MissingSeparator))?;

    let raw: Value =
        serde_json::from_str(encoded).map_err(|_| fail(ParseErrorKind::InvalidEncoding))?;
    if !raw.is_object() {
        return Err(fail(ParseErrorKind::InvalidEncoding));
    }
    let qs: QuerySerde =
        serde_json::from_value(raw).map_err(|_| fail(ParseErrorKind::InvalidEncoding))?;

    let table = match qs.table {
        Some(Value::String(t)) if !t.is_empty() => t,
        _ => return Err(fail(ParseErrorKind::MissingTable)),
    };

    let Some(Value::Array(raw_conditions)) = qs.query else {
        return Err(fail(ParseErrorKind::MissingQuery));
    };

    if qs.order.is_some() != qs.limit.is_some() {
        return Err(fail(ParseErrorKind::OrderLimitMismatch));
    }

    let order = match qs.order {
        None => None,
        Some(Value::String(o)) if !FieldPath::parse(&o).is_empty() => Some(o),
        Some(_) => return Err(fail(ParseErrorKind::InvalidParameter("order"))),
    };
    let limit = match qs.limit {
        None => None,
        Some(v) => match v.as_u64().and_then(|n| usize::try_from(n).ok()) {
            Some(n) if n > 0 => Some(n),
            _ => return Err(fail(ParseErrorKind::InvalidParameter("limit"))),
        },
    };
    let desc = match qs.desc {
        None => false,
        Some(Value::Bool(b)) => b,
        Some(_) => return Err(fail(ParseErrorKind::InvalidParameter("desc"))),
    };

    if raw_conditions.len() > MAX_CONDITIONS {
        return Err(fail(ParseErrorKind::InvalidParameter("query")));
    }
    let conditions = raw_conditions
        .into_iter()
        .enumerate()
        .map(|(index, c)| parse_condition(index, c).map_err(fail))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(QueryDescriptor { table, conditions, order, desc, limit })
}

fn parse_condition(index: usize, raw: Value) -> Result<Condition, ParseErrorKind> {
    let Value::Array(parts) = raw else {
        return Err(ParseErrorKind::MalformedCondition(index));
    };
    let Ok([field, operator, value]) = <[Value; 3]>::try_from(parts) else {
        return Err(ParseErrorKind::MalformedCondition(index));
    };

    let Value::String(field) = field else {
        return Err(ParseErrorKind::MalformedCondition(index));
    };
    let path = FieldPath::parse(&field);
    if path.is_empty() || path.depth() > MAX_PATH_DEPTH {
        return Err(ParseErrorKind::MalformedCondition(index));
    }

    let operator = match &operator {
        Value::String(name) => Operator::from_name(name),
        _ => None,
    }
    .ok_or_else(|| match operator {
        Value::String(name) => ParseErrorKind::UnknownOperator(name),
        other => ParseErrorKind::UnknownOperator(other.to_string()),
    })?;

    match (operator, &value) {
        (Operator::In, Value::Array(values)) if values.len() > MAX_IN_SET => {
            return Err(ParseErrorKind::MalformedCondition(index));
        }
        (Operator::In, Value::Array(_)) => {}
        (Operator::In, _) => return Err(ParseErrorKind::InOperatorRequiresArray),
        (Operator::Match, Value::String(pattern)) => {
            if regex::Regex::new(pattern).is_err() {
                return Err(ParseErrorKind::InvalidPattern(pattern.clone()));
            }
        }
        (Operator::Match, other) => return Err(ParseErrorKind::InvalidPattern(other.to_string())),
        _ => {}
    }

    Ok(Condition { field, operator, value })
}
