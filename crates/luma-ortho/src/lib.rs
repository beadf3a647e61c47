//! Orthogonal bitmap aggregation for LumaDB.
//!
//! Exact set-algebra aggregates over identifier bitmaps that are spread across
//! "buckets" named by a key column:
//! - `orthogonal_bitmap_intersect` / `orthogonal_bitmap_intersect_count` / `intersect_count`
//! - `orthogonal_bitmap_expr_calculate` / `orthogonal_bitmap_expr_calculate_count`
//! - `orthogonal_bitmap_union_count`
//!
//! Every function follows the two-phase life-cycle: rows are accumulated into a
//! per-unit [`AggregateState`], partial states are merged (in any order, across
//! threads or nodes via [`AggregateFunction::serialize`]), and the merged state is
//! finalized exactly once.

pub mod config;
pub mod expr;
pub mod factory;
pub mod function;
pub mod state;
pub mod types;

pub use config::OrthConfig;
pub use expr::{BucketExpr, ParseError, ParseErrorKind, SetOperator};
pub use factory::{register_orthogonal_bitmap, AggregateFunctionFactory, FunctionArgument};
pub use function::{AggregateFunction, AggregateState, FinalizeResult, Phase};
pub use state::{BucketKey, BucketedState, KeyKind};
pub use types::{ColumnData, DataType, Value};

use thiserror::Error;

/// Error type for orthogonal bitmap aggregation
#[derive(Error, Debug)]
pub enum OrthError {
    #[error("Unknown aggregate function: {0}")]
    UnknownFunction(String),
    #[error("Incorrect number of arguments for aggregate function {function}: expected {expected}, got {actual}")]
    WrongArgumentCount {
        function: String,
        expected: &'static str,
        actual: usize,
    },
    #[error("Incorrect type {data_type} of argument {position} for aggregate function {function}")]
    UnsupportedType {
        function: String,
        position: usize,
        data_type: DataType,
    },
    #[error("Invalid argument {position} for aggregate function {function}: {reason}")]
    InvalidArgument {
        function: String,
        position: usize,
        reason: String,
    },
    #[error("Invalid expression for aggregate function {function}: {source}")]
    Parse {
        function: String,
        #[source]
        source: ParseError,
    },
    #[error("Aggregate function {function} declares {declared} buckets, limit is {limit}")]
    TooManyBuckets {
        function: String,
        declared: usize,
        limit: usize,
    },
    #[error("Column mismatch: {0}")]
    ColumnMismatch(String),
    #[error("Aggregate state does not belong to function {0}")]
    StateMismatch(String),
    #[error("Cannot {op} a state in phase {phase:?}")]
    InvalidTransition { op: &'static str, phase: Phase },
    #[error("Corrupt aggregate state: {0}")]
    Corrupt(String),
    #[error("Configuration Error: {0}")]
    Config(String),
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, OrthError>;
