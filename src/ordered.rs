//! Tensor types that remember positional dimension order.
//!
//! Imported graphs address axes by position only. An [`OrderedTensorType`]
//! pairs a [`TensorType`] with the order its dimensions had in the source, so
//! positional operations (matmul's last axis, numpy-style broadcasting) can
//! still be resolved after names are assigned.

use std::fmt;

use itertools::Itertools;

use crate::types::{Dimension, DimensionKind, TensorType, TypeError};

/// A [`TensorType`] plus the source order of its dimensions.
///
/// Equality takes the order into account: `(x, y)` and `(y, x)` over the same
/// dimensions are different ordered types.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OrderedTensorType {
    ty: TensorType,
    /// Dimension names in source order; a permutation of `ty`'s names
    order: Vec<String>,
}

impl OrderedTensorType {
    /// Build from dimensions listed in source order.
    pub fn new(dims: Vec<Dimension>) -> Result<Self, TypeError> {
        let order = dims.iter().map(|d| d.name.clone()).collect();
        let ty = TensorType::new(dims)?;
        Ok(Self { ty, order })
    }

    /// A standard-named type from a positional shape; `None` is an unbound axis.
    pub fn from_shape(shape: &[Option<usize>]) -> Self {
        let dims = shape
            .iter()
            .enumerate()
            .map(|(i, size)| {
                let kind = match size {
                    Some(n) => DimensionKind::IndexedBound(*n),
                    None => DimensionKind::IndexedUnbound,
                };
                Dimension::new(standard_name(i, shape.len()), kind)
            })
            .collect();
        Self::new(dims).unwrap_or_else(|_| unreachable!("standard names are distinct"))
    }

    /// Canonical positional naming: the dimension at position `i` becomes `d{i}`.
    ///
    /// Same sizes and kinds as `ty`, only the names differ.
    pub fn standard_type(ty: &OrderedTensorType) -> OrderedTensorType {
        let rank = ty.rank();
        let dims = ty
            .dimensions()
            .enumerate()
            .map(|(i, d)| d.with_name(standard_name(i, rank)))
            .collect();
        Self::new(dims).unwrap_or_else(|_| unreachable!("standard names are distinct"))
    }

    pub fn ty(&self) -> &TensorType {
        &self.ty
    }

    pub fn into_type(self) -> TensorType {
        self.ty
    }

    pub fn rank(&self) -> usize {
        self.order.len()
    }

    /// Dimensions in source order.
    pub fn dimensions(&self) -> impl Iterator<Item = &Dimension> + '_ {
        self.order.iter().map(move |name| {
            self.ty
                .dimension(name)
                .unwrap_or_else(|| unreachable!("order is a permutation of the type's names"))
        })
    }

    /// Dimension at source position `i`.
    pub fn dimension_at(&self, i: usize) -> Option<&Dimension> {
        self.order.get(i).and_then(|name| self.ty.dimension(name))
    }

    /// Dimension names in source order.
    pub fn dimension_names(&self) -> &[String] {
        &self.order
    }

    /// Sizes in source order; `None` for unbound or mapped axes.
    pub fn shape(&self) -> Vec<Option<usize>> {
        self.dimensions().map(Dimension::size).collect()
    }

    /// Prefix every dimension name, e.g. to scope it to one graph node.
    pub fn with_prefix(&self, prefix: &str) -> OrderedTensorType {
        let names: Vec<String> = self
            .order
            .iter()
            .map(|name| format!("{prefix}{name}"))
            .collect();
        self.rename_positional(&names)
            .unwrap_or_else(|_| unreachable!("prefixing keeps names distinct"))
    }

    /// Rename positionally: the dimension at position `i` is named `names[i]`.
    pub fn rename_positional(&self, names: &[String]) -> Result<OrderedTensorType, TypeError> {
        if names.len() != self.rank() {
            return Err(TypeError::RenameLength {
                from: self.rank(),
                to: names.len(),
            });
        }
        let dims = self
            .dimensions()
            .zip(names)
            .map(|(d, name)| d.with_name(name.clone()))
            .collect();
        Self::new(dims)
    }

    /// Rename through a lookup, leaving names it doesn't know untouched.
    pub fn rename_with<F>(&self, mut lookup: F) -> Result<OrderedTensorType, TypeError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let names: Vec<String> = self
            .order
            .iter()
            .map(|name| lookup(name).unwrap_or_else(|| name.clone()))
            .collect();
        self.rename_positional(&names)
    }

    /// Row-major strides in source order, for fully indexed-bound types whose
    /// strides fit in a `usize`.
    pub fn positional_strides(&self) -> Option<Vec<usize>> {
        let sizes: Vec<usize> = self.shape().into_iter().collect::<Option<_>>()?;
        let mut strides = vec![1usize; sizes.len()];
        for i in (0..sizes.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1].checked_mul(sizes[i + 1])?;
        }
        Some(strides)
    }
}

impl fmt::Display for OrderedTensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tensor({})", self.dimensions().join(","))
    }
}

/// The standard name of position `i` in a type of the given rank.
///
/// The index is zero-padded to the width of the largest position, so names
/// sort in positional order (`d00` .. `d11` for rank 12).
pub fn standard_name(i: usize, rank: usize) -> String {
    let width = rank.saturating_sub(1).to_string().len();
    format!("d{i:0width$}")
}
