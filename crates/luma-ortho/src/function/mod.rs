//! Aggregate function interface and the opaque per-group state.

pub mod orthogonal;

pub use orthogonal::{
    EmitBitmap, EmitCount, ExprCalculate, ExprCalculateCount, ExprSelector, FinalizePolicy,
    Intersect, IntersectCount, IntersectSelector, OrthBitmapFunction, Selector, UnionCount,
    UnionSelector,
};

use roaring::RoaringBitmap;
use std::any::Any;
use std::fmt;

use crate::types::{ColumnData, DataType, Value};
use crate::{OrthError, Result};

/// Life-cycle position of an [`AggregateState`]. Finalization consumes the
/// state, so there is no finalized phase to observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Empty,
    Accumulating,
    Merged,
}

/// Type-erased state owned by one execution unit. Only the function that
/// created it can operate on it.
pub struct AggregateState {
    phase: Phase,
    inner: Box<dyn Any + Send>,
}

impl AggregateState {
    pub(crate) fn new<T: Any + Send>(inner: T) -> Self {
        Self {
            phase: Phase::Empty,
            inner: Box::new(inner),
        }
    }

    pub(crate) fn merged<T: Any + Send>(inner: T) -> Self {
        Self {
            phase: Phase::Merged,
            inner: Box::new(inner),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Rows may only be added before the state takes part in a merge.
    pub(crate) fn begin_add(&mut self) -> Result<()> {
        match self.phase {
            Phase::Empty | Phase::Accumulating => {
                self.phase = Phase::Accumulating;
                Ok(())
            }
            Phase::Merged => Err(OrthError::InvalidTransition {
                op: "add rows to",
                phase: self.phase,
            }),
        }
    }

    pub(crate) fn mark_merged(&mut self) {
        self.phase = Phase::Merged;
    }

    pub(crate) fn downcast_ref<T: Any>(&self, function: &str) -> Result<&T> {
        self.inner
            .downcast_ref::<T>()
            .ok_or_else(|| OrthError::StateMismatch(function.to_string()))
    }

    pub(crate) fn downcast_mut<T: Any>(&mut self, function: &str) -> Result<&mut T> {
        self.inner
            .downcast_mut::<T>()
            .ok_or_else(|| OrthError::StateMismatch(function.to_string()))
    }

    pub(crate) fn into_inner<T: Any>(self, function: &str) -> Result<T> {
        self.inner
            .downcast::<T>()
            .map(|boxed| *boxed)
            .map_err(|_| OrthError::StateMismatch(function.to_string()))
    }
}

impl fmt::Debug for AggregateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateState")
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

/// Result of finalizing a group: the variant decides which at construction.
#[derive(Debug, Clone, PartialEq)]
pub enum FinalizeResult {
    Bitmap(RoaringBitmap),
    Count(u64),
}

impl FinalizeResult {
    pub fn as_count(&self) -> Option<u64> {
        match self {
            FinalizeResult::Count(count) => Some(*count),
            FinalizeResult::Bitmap(_) => None,
        }
    }

    pub fn as_bitmap(&self) -> Option<&RoaringBitmap> {
        match self {
            FinalizeResult::Bitmap(bitmap) => Some(bitmap),
            FinalizeResult::Count(_) => None,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            FinalizeResult::Bitmap(bitmap) => Value::Bitmap(bitmap),
            FinalizeResult::Count(count) => Value::UInt64(count),
        }
    }
}

/// A two-phase aggregate: accumulate, merge partial states, finalize once.
pub trait AggregateFunction: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn return_type(&self) -> DataType;

    /// Whether the planner asked for a nullable result column.
    fn is_nullable(&self) -> bool;

    fn create_state(&self) -> AggregateState;

    /// Accumulate a batch. `columns` holds the non-constant arguments in
    /// order: the bitmap column, then the key column when the call has one.
    fn add_batch(&self, state: &mut AggregateState, columns: &[&ColumnData]) -> Result<()>;

    /// Union `other` into `state`. Commutative and associative.
    fn merge(&self, state: &mut AggregateState, other: &AggregateState) -> Result<()>;

    fn merge_owned(&self, state: &mut AggregateState, other: AggregateState) -> Result<()> {
        self.merge(state, &other)
    }

    fn serialize(&self, state: &AggregateState, writer: &mut Vec<u8>) -> Result<()>;

    fn deserialize(&self, reader: &[u8]) -> Result<AggregateState>;

    /// Produce the result. Consumes the state; call only after every partial
    /// state has been merged in.
    fn finalize(&self, state: AggregateState) -> Result<FinalizeResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_transitions() {
        let mut state = AggregateState::new(0u8);
        assert_eq!(state.phase(), Phase::Empty);
        state.begin_add().unwrap();
        assert_eq!(state.phase(), Phase::Accumulating);
        state.mark_merged();
        assert!(matches!(
            state.begin_add(),
            Err(OrthError::InvalidTransition { phase: Phase::Merged, .. })
        ));
    }

    #[test]
    fn test_downcast_mismatch() {
        let mut state = AggregateState::new(0u8);
        assert!(state.downcast_ref::<u8>("f").is_ok());
        assert!(matches!(
            state.downcast_mut::<u16>("f"),
            Err(OrthError::StateMismatch(_))
        ));
        assert!(state.into_inner::<String>("f").is_err());
    }

    #[test]
    fn test_finalize_result_accessors() {
        let count = FinalizeResult::Count(3);
        assert_eq!(count.as_count(), Some(3));
        assert!(count.as_bitmap().is_none());
        assert_eq!(count.into_value(), Value::UInt64(3));
    }
}
