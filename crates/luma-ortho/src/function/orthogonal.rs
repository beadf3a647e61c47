//! The five orthogonal bitmap aggregates.
//!
//! Each variant is an [`OrthBitmapFunction`] composed from a [`Selector`]
//! (which rows enter the state and how buckets combine at finalize) and a
//! [`FinalizePolicy`] (emit the combined bitmap or its cardinality). Both are
//! fixed by the type, so the per-row path is monomorphic.

use roaring::RoaringBitmap;
use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;
use tracing::{debug, trace, warn};

use super::{AggregateFunction, AggregateState, FinalizeResult};
use crate::config::OrthConfig;
use crate::expr::BucketExpr;
use crate::state::{BucketKey, BucketedState, KeyKind};
use crate::types::{ColumnData, DataType};
use crate::{OrthError, Result};

/// Decides which rows enter the state and how the merged buckets combine.
pub trait Selector: Send + Sync + fmt::Debug + 'static {
    type Key: BucketKey;

    /// Whether a key column follows the bitmap column in every batch.
    fn has_key_column(&self) -> bool;

    /// Whether rows under `key` belong in the state.
    fn accepts(&self, key: &Self::Key) -> bool;

    /// Number of buckets the call declared interest in, 0 when unfiltered.
    fn declared_buckets(&self) -> usize;

    fn combine(&self, state: &BucketedState<Self::Key>) -> RoaringBitmap;
}

/// N-way intersection over literal filter values.
#[derive(Debug, Clone)]
pub struct IntersectSelector<K: BucketKey> {
    targets: Vec<K>,
    filter: HashSet<K>,
}

impl<K: BucketKey> IntersectSelector<K> {
    /// Duplicate targets collapse; intersecting a bucket with itself is a no-op.
    pub fn new(targets: Vec<K>) -> Self {
        let mut filter = HashSet::with_capacity(targets.len());
        let targets: Vec<K> = targets
            .into_iter()
            .filter(|key| filter.insert(key.clone()))
            .collect();
        Self { targets, filter }
    }

    pub fn targets(&self) -> &[K] {
        &self.targets
    }
}

impl<K: BucketKey> Selector for IntersectSelector<K> {
    type Key = K;

    fn has_key_column(&self) -> bool {
        true
    }

    fn accepts(&self, key: &K) -> bool {
        self.filter.contains(key)
    }

    fn declared_buckets(&self) -> usize {
        self.targets.len()
    }

    fn combine(&self, state: &BucketedState<K>) -> RoaringBitmap {
        state.intersect(&self.targets)
    }
}

/// Set-algebra expression over the buckets it references.
#[derive(Debug, Clone)]
pub struct ExprSelector<K: BucketKey> {
    expr: BucketExpr<K>,
    filter: HashSet<K>,
}

impl<K: BucketKey> ExprSelector<K> {
    pub fn new(expr: BucketExpr<K>) -> Self {
        let filter = expr.bucket_names().iter().cloned().collect();
        Self { expr, filter }
    }

    pub fn expr(&self) -> &BucketExpr<K> {
        &self.expr
    }
}

impl<K: BucketKey> Selector for ExprSelector<K> {
    type Key = K;

    fn has_key_column(&self) -> bool {
        true
    }

    fn accepts(&self, key: &K) -> bool {
        self.filter.contains(key)
    }

    fn declared_buckets(&self) -> usize {
        self.filter.len()
    }

    fn combine(&self, state: &BucketedState<K>) -> RoaringBitmap {
        self.expr.evaluate(state)
    }
}

/// Every row lands in the single implicit bucket; the key column, if any, is
/// carried but ignored.
#[derive(Debug, Clone, Copy)]
pub struct UnionSelector {
    has_key_column: bool,
}

impl UnionSelector {
    pub fn new(has_key_column: bool) -> Self {
        Self { has_key_column }
    }
}

impl Selector for UnionSelector {
    type Key = ();

    fn has_key_column(&self) -> bool {
        self.has_key_column
    }

    fn accepts(&self, _key: &()) -> bool {
        true
    }

    fn declared_buckets(&self) -> usize {
        0
    }

    fn combine(&self, state: &BucketedState<()>) -> RoaringBitmap {
        state.union_all()
    }
}

/// What a finalized group emits.
pub trait FinalizePolicy: Send + Sync + 'static {
    fn return_type() -> DataType;

    fn emit(bitmap: RoaringBitmap) -> FinalizeResult;
}

#[derive(Debug)]
pub struct EmitBitmap;

impl FinalizePolicy for EmitBitmap {
    fn return_type() -> DataType {
        DataType::Bitmap
    }

    fn emit(bitmap: RoaringBitmap) -> FinalizeResult {
        FinalizeResult::Bitmap(bitmap)
    }
}

#[derive(Debug)]
pub struct EmitCount;

impl FinalizePolicy for EmitCount {
    fn return_type() -> DataType {
        DataType::UInt64
    }

    fn emit(bitmap: RoaringBitmap) -> FinalizeResult {
        FinalizeResult::Count(bitmap.len())
    }
}

pub type Intersect<K> = OrthBitmapFunction<IntersectSelector<K>, EmitBitmap>;
pub type IntersectCount<K> = OrthBitmapFunction<IntersectSelector<K>, EmitCount>;
pub type ExprCalculate<K> = OrthBitmapFunction<ExprSelector<K>, EmitBitmap>;
pub type ExprCalculateCount<K> = OrthBitmapFunction<ExprSelector<K>, EmitCount>;
pub type UnionCount = OrthBitmapFunction<UnionSelector, EmitCount>;

pub struct OrthBitmapFunction<S: Selector, P: FinalizePolicy> {
    name: String,
    selector: S,
    nullable: bool,
    max_buckets: usize,
    _policy: PhantomData<P>,
}

impl<S: Selector, P: FinalizePolicy> OrthBitmapFunction<S, P> {
    pub fn new(name: impl Into<String>, selector: S, nullable: bool, config: &OrthConfig) -> Self {
        let name = name.into();
        debug!(
            "Created aggregate {} over {} keys with {} declared buckets",
            name,
            S::Key::type_name(),
            selector.declared_buckets()
        );
        Self {
            name,
            selector,
            nullable,
            max_buckets: config.max_buckets,
            _policy: PhantomData,
        }
    }

    pub fn selector(&self) -> &S {
        &self.selector
    }

    fn expected_columns(&self) -> usize {
        if self.selector.has_key_column() {
            2
        } else {
            1
        }
    }

    fn ingest(&self, buckets: &mut BucketedState<S::Key>, columns: &[&ColumnData]) -> Result<()> {
        let bitmaps = columns[0].as_bitmaps().ok_or_else(|| {
            OrthError::ColumnMismatch(format!(
                "{} expects a BITMAP column, got {}",
                self.name,
                columns[0].data_type()
            ))
        })?;

        if let Some(key_column) = columns.get(1) {
            if key_column.len() != bitmaps.len() {
                return Err(OrthError::ColumnMismatch(format!(
                    "{} got {} bitmaps but {} keys",
                    self.name,
                    bitmaps.len(),
                    key_column.len()
                )));
            }
        }
        let key_column = match columns.get(1) {
            Some(column) if S::Key::KIND != KeyKind::Implicit => *column,
            _ => {
                let key = implicit_key::<S::Key>()?;
                for bitmap in bitmaps.iter().flatten() {
                    buckets.add(&key, bitmap);
                }
                return Ok(());
            }
        };

        let keys = S::Key::column_cells(key_column).ok_or_else(|| {
            OrthError::ColumnMismatch(format!(
                "{} expects {} keys, got a {} column",
                self.name,
                S::Key::type_name(),
                key_column.data_type()
            ))
        })?;
        for (bitmap, key) in bitmaps.iter().zip(keys) {
            if let (Some(bitmap), Some(key)) = (bitmap, key) {
                if self.selector.accepts(key) {
                    buckets.add(key, bitmap);
                }
            }
        }
        Ok(())
    }
}

/// The single bucket key used when rows are not split by a key column.
fn implicit_key<K: BucketKey>() -> Result<K> {
    K::parse_name("").ok_or_else(|| {
        OrthError::ColumnMismatch(format!("{} keys have no implicit bucket", K::type_name()))
    })
}

impl<S: Selector, P: FinalizePolicy> fmt::Debug for OrthBitmapFunction<S, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrthBitmapFunction")
            .field("name", &self.name)
            .field("selector", &self.selector)
            .field("return_type", &P::return_type())
            .field("nullable", &self.nullable)
            .finish()
    }
}

impl<S: Selector, P: FinalizePolicy> AggregateFunction for OrthBitmapFunction<S, P> {
    fn name(&self) -> &str {
        &self.name
    }

    fn return_type(&self) -> DataType {
        P::return_type()
    }

    fn is_nullable(&self) -> bool {
        self.nullable
    }

    fn create_state(&self) -> AggregateState {
        AggregateState::new(BucketedState::<S::Key>::new())
    }

    fn add_batch(&self, state: &mut AggregateState, columns: &[&ColumnData]) -> Result<()> {
        if columns.len() != self.expected_columns() {
            return Err(OrthError::ColumnMismatch(format!(
                "{} expects {} columns per batch, got {}",
                self.name,
                self.expected_columns(),
                columns.len()
            )));
        }
        state.begin_add()?;
        let buckets = state.downcast_mut::<BucketedState<S::Key>>(&self.name)?;
        self.ingest(buckets, columns)
    }

    fn merge(&self, state: &mut AggregateState, other: &AggregateState) -> Result<()> {
        let other = other.downcast_ref::<BucketedState<S::Key>>(&self.name)?;
        let buckets = state.downcast_mut::<BucketedState<S::Key>>(&self.name)?;
        trace!(
            "Merging {} buckets into {} for {}",
            other.len(),
            buckets.len(),
            self.name
        );
        buckets.merge(other);
        state.mark_merged();
        Ok(())
    }

    fn merge_owned(&self, state: &mut AggregateState, other: AggregateState) -> Result<()> {
        let other = other.into_inner::<BucketedState<S::Key>>(&self.name)?;
        let buckets = state.downcast_mut::<BucketedState<S::Key>>(&self.name)?;
        trace!(
            "Merging {} owned buckets into {} for {}",
            other.len(),
            buckets.len(),
            self.name
        );
        buckets.merge_owned(other);
        state.mark_merged();
        Ok(())
    }

    fn serialize(&self, state: &AggregateState, writer: &mut Vec<u8>) -> Result<()> {
        state
            .downcast_ref::<BucketedState<S::Key>>(&self.name)?
            .serialize_into(writer)
    }

    fn deserialize(&self, reader: &[u8]) -> Result<AggregateState> {
        let buckets = match BucketedState::<S::Key>::deserialize(reader, self.max_buckets) {
            Ok(buckets) => buckets,
            Err(e) => {
                warn!("Rejected partial state for {}: {}", self.name, e);
                return Err(e);
            }
        };
        if let Some((key, _)) = buckets.iter().find(|(key, _)| !self.selector.accepts(key)) {
            let err = OrthError::Corrupt(format!(
                "bucket {:?} is not declared by {}",
                key, self.name
            ));
            warn!("Rejected partial state for {}: {}", self.name, err);
            return Err(err);
        }
        debug!(
            "Deserialized {} buckets ({} bytes) for {}",
            buckets.len(),
            reader.len(),
            self.name
        );
        Ok(AggregateState::merged(buckets))
    }

    fn finalize(&self, state: AggregateState) -> Result<FinalizeResult> {
        let buckets = state.into_inner::<BucketedState<S::Key>>(&self.name)?;
        Ok(P::emit(self.selector.combine(&buckets)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::Phase;

    fn rows() -> (ColumnData, ColumnData) {
        (
            ColumnData::bitmaps([vec![1, 2, 3], vec![2, 3, 4], vec![9]]),
            ColumnData::utf8(["g1", "g2", "other"]),
        )
    }

    fn intersect(targets: &[&str]) -> IntersectCount<String> {
        let targets = targets.iter().map(|t| t.to_string()).collect();
        OrthBitmapFunction::new(
            "orthogonal_bitmap_intersect_count",
            IntersectSelector::new(targets),
            false,
            &OrthConfig::default(),
        )
    }

    #[test]
    fn test_intersect_skips_undeclared_keys() {
        let f = intersect(&["g1", "g2"]);
        let (bitmaps, keys) = rows();
        let mut state = f.create_state();
        f.add_batch(&mut state, &[&bitmaps, &keys]).unwrap();

        let buckets = state.downcast_ref::<BucketedState<String>>("t").unwrap();
        assert_eq!(buckets.len(), 2);
        assert!(!buckets.contains_key(&"other".to_string()));
        assert_eq!(f.finalize(state).unwrap(), FinalizeResult::Count(2));
    }

    #[test]
    fn test_intersect_dedups_targets() {
        let f = intersect(&["g1", "g1", "g2"]);
        assert_eq!(f.selector().targets().len(), 2);
    }

    #[test]
    fn test_null_cells_are_skipped() {
        let f = intersect(&["g1"]);
        let bitmaps = ColumnData::Bitmap(vec![None, Some([5u32].into_iter().collect())]);
        let keys = ColumnData::Utf8(vec![Some("g1".into()), None]);
        let mut state = f.create_state();
        f.add_batch(&mut state, &[&bitmaps, &keys]).unwrap();
        assert_eq!(f.finalize(state).unwrap(), FinalizeResult::Count(0));
    }

    #[test]
    fn test_add_after_merge_is_rejected() {
        let f = intersect(&["g1"]);
        let (bitmaps, keys) = rows();
        let mut a = f.create_state();
        let b = f.create_state();
        f.merge(&mut a, &b).unwrap();
        assert_eq!(a.phase(), Phase::Merged);
        assert!(matches!(
            f.add_batch(&mut a, &[&bitmaps, &keys]),
            Err(OrthError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_column_mismatch() {
        let f = intersect(&["g1"]);
        let (bitmaps, _) = rows();
        let mut state = f.create_state();

        assert!(matches!(
            f.add_batch(&mut state, &[&bitmaps]),
            Err(OrthError::ColumnMismatch(_))
        ));
        let ints = ColumnData::Int32(vec![Some(1), Some(2), Some(3)]);
        assert!(matches!(
            f.add_batch(&mut state, &[&bitmaps, &ints]),
            Err(OrthError::ColumnMismatch(_))
        ));
        let short = ColumnData::utf8(["g1"]);
        assert!(matches!(
            f.add_batch(&mut state, &[&bitmaps, &short]),
            Err(OrthError::ColumnMismatch(_))
        ));
    }

    #[test]
    fn test_state_from_other_specialization() {
        let f = intersect(&["g1"]);
        let union: UnionCount = OrthBitmapFunction::new(
            "orthogonal_bitmap_union_count",
            UnionSelector::new(true),
            false,
            &OrthConfig::default(),
        );
        let mut state = f.create_state();
        let foreign = union.create_state();
        assert!(matches!(
            f.merge(&mut state, &foreign),
            Err(OrthError::StateMismatch(_))
        ));
    }

    #[test]
    fn test_union_ignores_key_column() {
        let union: UnionCount = OrthBitmapFunction::new(
            "orthogonal_bitmap_union_count",
            UnionSelector::new(true),
            false,
            &OrthConfig::default(),
        );
        let (bitmaps, keys) = rows();
        let mut state = union.create_state();
        union.add_batch(&mut state, &[&bitmaps, &keys]).unwrap();
        assert_eq!(union.finalize(state).unwrap(), FinalizeResult::Count(5));
    }

    #[test]
    fn test_deserialize_rejects_undeclared_bucket() {
        let wide = intersect(&["g1", "other"]);
        let narrow = intersect(&["g1"]);
        let (bitmaps, keys) = rows();
        let mut state = wide.create_state();
        wide.add_batch(&mut state, &[&bitmaps, &keys]).unwrap();

        let mut bytes = Vec::new();
        wide.serialize(&state, &mut bytes).unwrap();
        assert!(matches!(
            narrow.deserialize(&bytes),
            Err(OrthError::Corrupt(_))
        ));
        let restored = wide.deserialize(&bytes).unwrap();
        assert_eq!(restored.phase(), Phase::Merged);
    }

    #[test]
    fn test_expr_filter_and_evaluate() {
        let config = OrthConfig::default();
        let expr = BucketExpr::<String>::parse("g1-g2", &config).unwrap();
        let f: ExprCalculate<String> = OrthBitmapFunction::new(
            "orthogonal_bitmap_expr_calculate",
            ExprSelector::new(expr),
            false,
            &config,
        );
        let (bitmaps, keys) = rows();
        let mut state = f.create_state();
        f.add_batch(&mut state, &[&bitmaps, &keys]).unwrap();
        let result = f.finalize(state).unwrap();
        let expected: RoaringBitmap = [1u32].into_iter().collect();
        assert_eq!(result.as_bitmap(), Some(&expected));
        assert_eq!(f.return_type(), DataType::Bitmap);
    }
}
