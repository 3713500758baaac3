//! Materialized tensor values.
//!
//! This is the value side the functions produce and consume: an immutable
//! [`Tensor`] of `f64` cells addressed by [`Address`], built through either
//! [`CellBuilder`] (by coordinate) or [`IndexedBuilder`] (by flat index, for
//! fully indexed-bound types only).
//!
//! Cells are stored sparsely in address order. Dense layouts are a property of
//! how a tensor was built, not of how it is stored.

use std::collections::BTreeMap;
use std::fmt;

use itertools::Itertools;

use crate::types::{DimensionKind, TensorType};

/// One coordinate of an address.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Label {
    /// Position along an indexed dimension
    Index(usize),
    /// Key along a mapped dimension
    Key(String),
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Index(i) => write!(f, "{i}"),
            Label::Key(k) => write!(f, "{k}"),
        }
    }
}

impl From<usize> for Label {
    fn from(i: usize) -> Self {
        Label::Index(i)
    }
}

impl From<&str> for Label {
    fn from(k: &str) -> Self {
        Label::Key(k.to_string())
    }
}

/// A cell coordinate: one label per dimension, in the type's (name) order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub Vec<Label>);

impl Address {
    pub fn new(labels: impl IntoIterator<Item = Label>) -> Self {
        Self(labels.into_iter().collect())
    }

    /// Address of the single cell of a scalar.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// An all-indexed address.
    pub fn indexed(indices: &[usize]) -> Self {
        Self(indices.iter().map(|&i| Label::Index(i)).collect())
    }

    pub fn labels(&self) -> &[Label] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Render with dimension names, e.g. `{x:0,y:a}`.
    pub fn display_with(&self, ty: &TensorType) -> String {
        let parts = ty
            .dimension_names()
            .zip(&self.0)
            .map(|(name, label)| format!("{name}:{label}"));
        format!("{{{}}}", parts.format(","))
    }

    /// Check this address fits `ty`: one label per dimension, of the right kind and in range.
    pub fn validate(&self, ty: &TensorType) -> Result<(), ValueError> {
        let fits = self.len() == ty.rank()
            && ty.dimensions().iter().zip(&self.0).all(|(dim, label)| {
                match (dim.kind, label) {
                    (DimensionKind::Mapped, Label::Key(_)) => true,
                    (DimensionKind::IndexedUnbound, Label::Index(_)) => true,
                    (DimensionKind::IndexedBound(size), Label::Index(i)) => *i < size,
                    _ => false,
                }
            });
        if fits {
            Ok(())
        } else {
            Err(ValueError::InvalidAddress {
                address: format!("{:?}", self.0),
                ty: ty.to_string(),
            })
        }
    }
}

/// Errors building tensor values.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
    #[error("address {address} does not fit {ty}")]
    InvalidAddress { address: String, ty: String },

    #[error("{ty} is not fully indexed and bound")]
    NotIndexedBound { ty: String },

    #[error("flat index {index} out of range for {ty} with {cells} cells")]
    IndexOutOfRange { index: usize, cells: usize, ty: String },

    #[error("cell {index} of {ty} written twice")]
    CellWrittenTwice { index: usize, ty: String },

    #[error("{ty} has too many cells to lay out by flat index")]
    TooManyCells { ty: String },

    #[error("{missing} of {cells} cells of {ty} were never written")]
    Incomplete {
        missing: usize,
        cells: usize,
        ty: String,
    },
}

/// An immutable tensor value.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    ty: TensorType,
    cells: BTreeMap<Address, f64>,
}

impl Tensor {
    /// A scalar tensor.
    pub fn scalar(value: f64) -> Self {
        let mut cells = BTreeMap::new();
        cells.insert(Address::empty(), value);
        Self {
            ty: TensorType::scalar(),
            cells,
        }
    }

    /// A tensor with no cells.
    pub fn empty(ty: TensorType) -> Self {
        Self {
            ty,
            cells: BTreeMap::new(),
        }
    }

    /// Build an indexed-bound tensor from values in flat (row-major, name-order) layout.
    pub fn from_dense(ty: TensorType, values: &[f64]) -> Result<Self, ValueError> {
        let mut builder = IndexedBuilder::new(ty)?;
        for (i, &v) in values.iter().enumerate() {
            builder.set_by_direct_index(i, v)?;
        }
        builder.build()
    }

    pub fn ty(&self) -> &TensorType {
        &self.ty
    }

    pub fn get(&self, address: &Address) -> Option<f64> {
        self.cells.get(address).copied()
    }

    /// Cell at a flat index of an indexed-bound tensor.
    pub fn get_by_direct_index(&self, index: usize) -> Option<f64> {
        let sizes = bound_sizes(&self.ty)?;
        self.get(&unflatten(index, &sizes)?)
    }

    /// The single value of a scalar tensor.
    pub fn as_scalar(&self) -> Option<f64> {
        if self.ty.is_scalar() {
            self.get(&Address::empty())
        } else {
            None
        }
    }

    /// Number of set cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Cells in address order.
    pub fn cells(&self) -> impl Iterator<Item = (&Address, f64)> {
        self.cells.iter().map(|(a, v)| (a, *v))
    }

    /// Same cells, re-labelled under another type.
    ///
    /// `ty` must have the same dimension kinds in some order; `permute[i]` is
    /// the position in the old address of the label that goes to position `i`.
    pub(crate) fn relabel(&self, ty: TensorType, permute: &[usize]) -> Tensor {
        let cells = self
            .cells
            .iter()
            .map(|(address, v)| {
                let labels = permute.iter().map(|&p| address.0[p].clone()).collect();
                (Address(labels), *v)
            })
            .collect();
        Tensor { ty, cells }
    }

    pub(crate) fn from_cells(ty: TensorType, cells: BTreeMap<Address, f64>) -> Tensor {
        Tensor { ty, cells }
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(v) = self.as_scalar() {
            return write!(f, "{}:{{{}}}", self.ty, v);
        }
        let cells = self
            .cells
            .iter()
            .map(|(a, v)| format!("{}:{}", a.display_with(&self.ty), v));
        write!(f, "{}:{{{}}}", self.ty, cells.format(","))
    }
}

/// Builds a tensor cell by cell, by coordinate.
#[derive(Debug)]
pub struct CellBuilder {
    ty: TensorType,
    cells: BTreeMap<Address, f64>,
}

impl CellBuilder {
    pub fn new(ty: TensorType) -> Self {
        Self {
            ty,
            cells: BTreeMap::new(),
        }
    }

    /// Set one cell; a later write to the same address replaces it.
    pub fn set(&mut self, address: Address, value: f64) -> Result<(), ValueError> {
        address.validate(&self.ty)?;
        self.cells.insert(address, value);
        Ok(())
    }

    pub fn build(self) -> Tensor {
        Tensor {
            ty: self.ty,
            cells: self.cells,
        }
    }
}

/// Builds a fully indexed-bound tensor by flat index.
///
/// Every cell must be written exactly once before [`IndexedBuilder::build`]
/// succeeds.
#[derive(Debug)]
pub struct IndexedBuilder {
    ty: TensorType,
    sizes: Vec<usize>,
    values: Vec<Option<f64>>,
}

impl IndexedBuilder {
    pub fn new(ty: TensorType) -> Result<Self, ValueError> {
        let sizes = bound_sizes(&ty).ok_or_else(|| ValueError::NotIndexedBound {
            ty: ty.to_string(),
        })?;
        let count = checked_product(&sizes).ok_or_else(|| ValueError::TooManyCells {
            ty: ty.to_string(),
        })?;
        Ok(Self {
            ty,
            sizes,
            values: vec![None; count],
        })
    }

    pub fn cell_count(&self) -> usize {
        self.values.len()
    }

    pub fn set_by_direct_index(&mut self, index: usize, value: f64) -> Result<(), ValueError> {
        let cells = self.values.len();
        let slot = self
            .values
            .get_mut(index)
            .ok_or_else(|| ValueError::IndexOutOfRange {
                index,
                cells,
                ty: self.ty.to_string(),
            })?;
        if slot.is_some() {
            return Err(ValueError::CellWrittenTwice {
                index,
                ty: self.ty.to_string(),
            });
        }
        *slot = Some(value);
        Ok(())
    }

    pub fn build(self) -> Result<Tensor, ValueError> {
        let missing = self.values.iter().filter(|v| v.is_none()).count();
        if missing > 0 {
            return Err(ValueError::Incomplete {
                missing,
                cells: self.values.len(),
                ty: self.ty.to_string(),
            });
        }
        let mut cells = BTreeMap::new();
        for (i, value) in self.values.into_iter().enumerate() {
            if let (Some(address), Some(value)) = (unflatten(i, &self.sizes), value) {
                cells.insert(address, value);
            }
        }
        Ok(Tensor { ty: self.ty, cells })
    }
}

fn bound_sizes(ty: &TensorType) -> Option<Vec<usize>> {
    ty.dimensions().iter().map(|d| d.size()).collect()
}

fn checked_product(sizes: &[usize]) -> Option<usize> {
    sizes.iter().try_fold(1usize, |acc, &n| acc.checked_mul(n))
}

/// Flat index to address, row-major with the last dimension fastest.
fn unflatten(mut index: usize, sizes: &[usize]) -> Option<Address> {
    if index >= checked_product(sizes)? {
        return None;
    }
    let mut labels = vec![Label::Index(0); sizes.len()];
    for (slot, &size) in labels.iter_mut().zip(sizes).rev() {
        *slot = Label::Index(index % size);
        index /= size;
    }
    Some(Address(labels))
}
