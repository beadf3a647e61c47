//! Name-based registry that resolves an aggregate call to a concrete
//! specialization.
//!
//! Resolution strips `Nullable` wrappers, checks arity and argument types,
//! picks the monomorphic key specialization from the key column's type and
//! does all literal conversion and expression parsing up front. A function
//! instance only exists if every check passed.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::config::OrthConfig;
use crate::expr::BucketExpr;
use crate::function::{
    AggregateFunction, EmitBitmap, EmitCount, ExprSelector, FinalizePolicy, IntersectSelector,
    OrthBitmapFunction, Selector, UnionSelector,
};
use crate::state::BucketKey;
use crate::types::{DataType, Value};
use crate::{OrthError, Result};

pub const ORTHOGONAL_BITMAP_INTERSECT: &str = "orthogonal_bitmap_intersect";
pub const ORTHOGONAL_BITMAP_INTERSECT_COUNT: &str = "orthogonal_bitmap_intersect_count";
pub const INTERSECT_COUNT: &str = "intersect_count";
pub const ORTHOGONAL_BITMAP_EXPR_CALCULATE: &str = "orthogonal_bitmap_expr_calculate";
pub const ORTHOGONAL_BITMAP_EXPR_CALCULATE_COUNT: &str = "orthogonal_bitmap_expr_calculate_count";
pub const ORTHOGONAL_BITMAP_UNION_COUNT: &str = "orthogonal_bitmap_union_count";

/// Shared handle to a resolved aggregate.
pub type AggregateFunctionRef = Arc<dyn AggregateFunction>;

/// Builds a function from its registered name, the call's arguments and the
/// nullability the planner requested.
pub type FunctionCreator =
    fn(&str, &[FunctionArgument], bool, &OrthConfig) -> Result<AggregateFunctionRef>;

/// One argument of an aggregate call as seen by the planner.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionArgument {
    pub data_type: DataType,
    /// Set when the argument is a constant
    pub literal: Option<Value>,
}

impl FunctionArgument {
    pub fn column(data_type: DataType) -> Self {
        Self {
            data_type,
            literal: None,
        }
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        let value = value.into();
        Self {
            data_type: value.data_type(),
            literal: Some(value),
        }
    }
}

/// Registry of aggregate functions
pub struct AggregateFunctionFactory {
    config: OrthConfig,
    creators: HashMap<&'static str, FunctionCreator>,
}

impl Default for AggregateFunctionFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl AggregateFunctionFactory {
    pub fn new() -> Self {
        Self::with_config(OrthConfig::default())
    }

    /// Factory with every orthogonal bitmap function registered.
    pub fn with_config(config: OrthConfig) -> Self {
        let mut factory = Self::empty(config);
        register_orthogonal_bitmap(&mut factory);
        factory
    }

    pub fn empty(config: OrthConfig) -> Self {
        Self {
            config,
            creators: HashMap::new(),
        }
    }

    pub fn register_function(&mut self, name: &'static str, creator: FunctionCreator) {
        self.creators.insert(name, creator);
    }

    pub fn config(&self) -> &OrthConfig {
        &self.config
    }

    /// Registered names, sorted.
    pub fn function_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.creators.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Resolve a call. Names are matched case-insensitively.
    pub fn try_get(
        &self,
        name: &str,
        arguments: &[FunctionArgument],
        result_is_nullable: bool,
    ) -> Result<AggregateFunctionRef> {
        let (registered, creator) = self
            .lookup(name)
            .ok_or_else(|| OrthError::UnknownFunction(name.to_string()))?;
        creator(registered, arguments, result_is_nullable, &self.config)
    }

    /// Like [`try_get`](Self::try_get), but an unresolvable call is logged and
    /// yields `None`.
    pub fn get(
        &self,
        name: &str,
        arguments: &[FunctionArgument],
        result_is_nullable: bool,
    ) -> Option<AggregateFunctionRef> {
        match self.try_get(name, arguments, result_is_nullable) {
            Ok(function) => Some(function),
            Err(e) => {
                warn!("Cannot resolve aggregate function {}: {}", name, e);
                None
            }
        }
    }

    fn lookup(&self, name: &str) -> Option<(&'static str, FunctionCreator)> {
        let lowered = name.to_ascii_lowercase();
        self.creators
            .get_key_value(lowered.as_str())
            .map(|(registered, creator)| (*registered, *creator))
    }
}

pub fn register_orthogonal_bitmap(factory: &mut AggregateFunctionFactory) {
    factory.register_function(ORTHOGONAL_BITMAP_INTERSECT, create_intersect::<EmitBitmap>);
    factory.register_function(
        ORTHOGONAL_BITMAP_INTERSECT_COUNT,
        create_intersect::<EmitCount>,
    );
    factory.register_function(INTERSECT_COUNT, create_intersect::<EmitCount>);
    factory.register_function(ORTHOGONAL_BITMAP_EXPR_CALCULATE, create_expr::<EmitBitmap>);
    factory.register_function(
        ORTHOGONAL_BITMAP_EXPR_CALCULATE_COUNT,
        create_expr::<EmitCount>,
    );
    factory.register_function(ORTHOGONAL_BITMAP_UNION_COUNT, create_union_count);
}

/// Bind `$key` to the bucket key type matching the key column and evaluate
/// `$body`; any other column type is rejected.
macro_rules! with_key_type {
    ($function:expr, $data_type:expr, |$key:ident| $body:expr) => {
        match $data_type.remove_nullable() {
            DataType::Int8 => {
                type $key = i8;
                $body
            }
            DataType::Int16 => {
                type $key = i16;
                $body
            }
            DataType::Int32 => {
                type $key = i32;
                $body
            }
            DataType::Int64 => {
                type $key = i64;
                $body
            }
            DataType::Utf8 | DataType::Char(_) => {
                type $key = String;
                $body
            }
            other => Err(OrthError::UnsupportedType {
                function: $function.to_string(),
                position: 1,
                data_type: other.clone(),
            }),
        }
    };
}

fn check_bitmap_argument(function: &str, arguments: &[FunctionArgument]) -> Result<()> {
    match arguments.first() {
        Some(arg) if *arg.data_type.remove_nullable() == DataType::Bitmap => Ok(()),
        Some(arg) => Err(OrthError::UnsupportedType {
            function: function.to_string(),
            position: 0,
            data_type: arg.data_type.clone(),
        }),
        None => Err(OrthError::WrongArgumentCount {
            function: function.to_string(),
            expected: "at least 1",
            actual: 0,
        }),
    }
}

fn check_bucket_limit<S: Selector>(function: &str, selector: &S, config: &OrthConfig) -> Result<()> {
    let declared = selector.declared_buckets();
    if declared > config.max_buckets {
        return Err(OrthError::TooManyBuckets {
            function: function.to_string(),
            declared,
            limit: config.max_buckets,
        });
    }
    Ok(())
}

fn create_intersect<P: FinalizePolicy>(
    function: &str,
    arguments: &[FunctionArgument],
    nullable: bool,
    config: &OrthConfig,
) -> Result<AggregateFunctionRef> {
    if arguments.len() < 3 {
        return Err(OrthError::WrongArgumentCount {
            function: function.to_string(),
            expected: "at least 3",
            actual: arguments.len(),
        });
    }
    check_bitmap_argument(function, arguments)?;
    with_key_type!(function, arguments[1].data_type, |K| {
        build_intersect::<K, P>(function, arguments, nullable, config)
    })
}

fn build_intersect<K: BucketKey, P: FinalizePolicy>(
    function: &str,
    arguments: &[FunctionArgument],
    nullable: bool,
    config: &OrthConfig,
) -> Result<AggregateFunctionRef> {
    let mut targets = Vec::with_capacity(arguments.len() - 2);
    for (position, arg) in arguments.iter().enumerate().skip(2) {
        let value = arg.literal.as_ref().ok_or_else(|| OrthError::InvalidArgument {
            function: function.to_string(),
            position,
            reason: "filter values must be constants".to_string(),
        })?;
        let key = K::from_literal(value).ok_or_else(|| OrthError::InvalidArgument {
            function: function.to_string(),
            position,
            reason: format!("{:?} is not a valid {} key", value, K::type_name()),
        })?;
        targets.push(key);
    }

    let selector = IntersectSelector::new(targets);
    check_bucket_limit(function, &selector, config)?;
    Ok(Arc::new(OrthBitmapFunction::<_, P>::new(
        function, selector, nullable, config,
    )))
}

fn create_expr<P: FinalizePolicy>(
    function: &str,
    arguments: &[FunctionArgument],
    nullable: bool,
    config: &OrthConfig,
) -> Result<AggregateFunctionRef> {
    if arguments.len() != 3 {
        return Err(OrthError::WrongArgumentCount {
            function: function.to_string(),
            expected: "3",
            actual: arguments.len(),
        });
    }
    check_bitmap_argument(function, arguments)?;
    with_key_type!(function, arguments[1].data_type, |K| {
        build_expr::<K, P>(function, arguments, nullable, config)
    })
}

fn build_expr<K: BucketKey, P: FinalizePolicy>(
    function: &str,
    arguments: &[FunctionArgument],
    nullable: bool,
    config: &OrthConfig,
) -> Result<AggregateFunctionRef> {
    let source = arguments[2]
        .literal
        .as_ref()
        .and_then(Value::as_text)
        .ok_or_else(|| OrthError::InvalidArgument {
            function: function.to_string(),
            position: 2,
            reason: "expression must be a constant string".to_string(),
        })?;
    let expr = BucketExpr::<K>::parse(source, config).map_err(|source| OrthError::Parse {
        function: function.to_string(),
        source,
    })?;

    let selector = ExprSelector::new(expr);
    check_bucket_limit(function, &selector, config)?;
    Ok(Arc::new(OrthBitmapFunction::<_, P>::new(
        function, selector, nullable, config,
    )))
}

/// Accepts `(bitmap)`, `(bitmap, key)` or `(bitmap, key, literal...)`. The key
/// type is validated but neither the key nor the literals filter rows.
fn create_union_count(
    function: &str,
    arguments: &[FunctionArgument],
    nullable: bool,
    config: &OrthConfig,
) -> Result<AggregateFunctionRef> {
    check_bitmap_argument(function, arguments)?;
    let has_key_column = match arguments.get(1) {
        Some(key) => {
            let key_type = key.data_type.remove_nullable();
            if !key_type.is_integer() && !key_type.is_string_or_fixed_string() {
                return Err(OrthError::UnsupportedType {
                    function: function.to_string(),
                    position: 1,
                    data_type: key_type.clone(),
                });
            }
            true
        }
        None => false,
    };

    Ok(Arc::new(OrthBitmapFunction::<_, EmitCount>::new(
        function,
        UnionSelector::new(has_key_column),
        nullable,
        config,
    )))
}
