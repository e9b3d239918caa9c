use serde_json::Value;

use super::types::{
    CmpOp, Condition, Direction, FieldPath, Operator, Predicate, QueryDescriptor, QueryPlan, Stage,
};

/// Compiles a descriptor into a backend plan that yields only `primary_key` per row.
pub fn translate(descriptor: &QueryDescriptor, primary_key: &str) -> QueryPlan {
    let mut stages = Vec::with_capacity(descriptor.conditions.len() + 3);

    if let Some(order) = &descriptor.order {
        let direction = if descriptor.desc { Direction::Desc } else { Direction::Asc };
        stages.push(Stage::OrderBy { path: FieldPath::parse(order), direction });
    }

    stages.extend(descriptor.conditions.iter().map(|c| Stage::Filter(predicate_for(c))));
    stages.push(Stage::Pluck(primary_key.to_string()));

    if let Some(limit) = descriptor.limit {
        stages.push(Stage::Limit(limit));
    }

    QueryPlan { table: descriptor.table.clone(), stages }
}

fn predicate_for(condition: &Condition) -> Predicate {
    let path = FieldPath::parse(&condition.field);
    let compare = |op| Predicate::Compare { path: path.clone(), op, value: condition.value.clone() };
    match condition.operator {
        Operator::Eq => compare(CmpOp::Eq),
        Operator::Ne => compare(CmpOp::Ne),
        Operator::Gt => compare(CmpOp::Gt),
        Operator::Ge => compare(CmpOp::Ge),
        Operator::Lt => compare(CmpOp::Lt),
        Operator::Le => compare(CmpOp::Le),
        Operator::Match => Predicate::Match {
            path: path.clone(),
            pattern: match &condition.value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
        },
        Operator::In => Predicate::Contains {
            path: path.clone(),
            values: match &condition.value {
                Value::Array(values) => values.clone(),
                other => vec![other.clone()],
            },
        },
    }
}
