use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

// Safety limits to prevent resource abuse
pub const MAX_PATH_DEPTH: usize = 32;
pub const MAX_CONDITIONS: usize = 64;
pub const MAX_IN_SET: usize = 1000;

pub const DEFAULT_PRIMARY_KEY: &str = "ds_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Eq,
    Match,
    Gt,
    Ge,
    Lt,
    Le,
    Ne,
    In,
}

impl Operator {
    pub const ALL: [Self; 8] =
        [Self::Eq, Self::Match, Self::Gt, Self::Ge, Self::Lt, Self::Le, Self::Ne, Self::In];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Match => "match",
            Self::Gt => "gt",
            Self::Ge => "ge",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Ne => "ne",
            Self::In => "in",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A nested field address such as `a.c[2].e`, stored as its segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    /// Splits on `.`, `[` and `]`, dropping empty pieces.
    pub fn parse(raw: &str) -> Self {
        Self(
            raw.split(['.', '[', ']'])
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("row")?;
        for seg in &self.0 {
            write!(f, "({})", Value::String(seg.clone()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    pub value: Value,
}

/// A validated subscription query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDescriptor {
    pub table: String,
    pub conditions: Vec<Condition>,
    pub order: Option<String>,
    pub desc: bool,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CmpOp {
    const fn name(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Ge => "ge",
            Self::Lt => "lt",
            Self::Le => "le",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare { path: FieldPath, op: CmpOp, value: Value },
    Match { path: FieldPath, pattern: String },
    Contains { path: FieldPath, values: Vec<Value> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    OrderBy { path: FieldPath, direction: Direction },
    Filter(Predicate),
    Pluck(String),
    Limit(usize),
}

/// The compiled form of a [`QueryDescriptor`], handed to a [`crate::backend::Database`].
///
/// Stage order: optional `OrderBy`, one `Filter` per condition, `Pluck` of the primary key,
/// optional `Limit`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub table: String,
    pub stages: Vec<Stage>,
}

impl QueryPlan {
    pub fn filters(&self) -> impl Iterator<Item = &Predicate> {
        self.stages.iter().filter_map(|s| match s {
            Stage::Filter(p) => Some(p),
            _ => None,
        })
    }

    pub fn order_by(&self) -> Option<(&FieldPath, Direction)> {
        self.stages.iter().find_map(|s| match s {
            Stage::OrderBy { path, direction } => Some((path, *direction)),
            _ => None,
        })
    }

    pub fn primary_key(&self) -> Option<&str> {
        self.stages.iter().find_map(|s| match s {
            Stage::Pluck(field) => Some(field.as_str()),
            _ => None,
        })
    }

    pub fn limit(&self) -> Option<usize> {
        self.stages.iter().find_map(|s| match s {
            Stage::Limit(n) => Some(*n),
            _ => None,
        })
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compare { path, op, value } => write!(f, "{path}.{}({value})", op.name()),
            Self::Match { path, pattern } => {
                write!(f, "{path}.match({})", Value::String(pattern.clone()))
            }
            Self::Contains { path, values } => {
                write!(f, "expr({}).contains({path})", Value::Array(values.clone()))
            }
        }
    }
}

impl fmt::Display for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table({})", Value::String(self.table.clone()))?;
        for stage in &self.stages {
            match stage {
                Stage::OrderBy { path, direction } => match direction {
                    Direction::Asc => write!(f, ".order_by(asc({path}))")?,
                    Direction::Desc => write!(f, ".order_by(desc({path}))")?,
                },
                Stage::Filter(p) => write!(f, ".filter({p})")?,
                Stage::Pluck(field) => write!(f, ".pluck({})", Value::String(field.clone()))?,
                Stage::Limit(n) => write!(f, ".limit({n})")?,
            }
        }
        Ok(())
    }
}
