//! In-memory execution engine for declarative `Query` documents published
//! as computed records: compiles a `Query` into a canonical `Plan`, executes
//! it against pluggable `DataSource`s (including a Change Log routing
//! adapter), and caches results by canonicalised query text and parameters.

pub mod ast;
pub mod cache;
pub mod engine;
pub mod error;
pub mod expr;
pub mod planner;
pub mod routing;

pub use ast::{
    ArithmeticOpKind, CaseBranch, ComparisonOp, Expression, Join, JoinKind, LogicalOpKind,
    NullsOrder, OrderByKey, Query, SelectField, SortDirection, Source,
};
pub use cache::{CacheKey, QueryCache};
pub use engine::{as_bool, execute, execute_with_params, DataSource, Row};
pub use error::QueryError;
pub use planner::{plan, Plan, PlanStep, PlanStepKind};
pub use routing::RoutingDataSource;
