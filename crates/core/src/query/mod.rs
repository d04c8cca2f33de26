//! Predicate model, immutable query specs and the typed query builder.

mod builder;
mod predicate;
mod spec;

pub use builder::Query;
pub use predicate::{Direction, OPERATOR_SEPARATOR, Operator, OrderBy, Predicate};
pub use spec::{CacheConfig, QuerySpec};
