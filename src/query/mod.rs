pub mod eval;
pub mod parse;
pub mod translate;
pub mod types;

pub use eval::{CompiledPlan, compare_values, eval_predicate, get_path, values_equal};
pub use parse::parse;
pub use translate::translate;
pub use types::{
    CmpOp, Condition, DEFAULT_PRIMARY_KEY, Direction, FieldPath, Operator, Predicate,
    QueryDescriptor, QueryPlan, Stage,
};
