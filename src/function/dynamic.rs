//! Tensors whose cells are computed on evaluation.
//!
//! A [`DynamicTensor`] holds one independent [`ScalarFunction`] per cell. The
//! functions are pure closures over the evaluation context, so one dynamic
//! tensor can be evaluated from any number of threads at once.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use itertools::Itertools;

use crate::context::EvaluationContext;
use crate::types::TensorType;
use crate::value::{Address, CellBuilder, IndexedBuilder, Tensor};

use super::FunctionError;

type CellFn = dyn Fn(&dyn EvaluationContext) -> f64 + Send + Sync;

/// A labelled closure computing one cell.
///
/// The label is what textual renderings show in place of the closure.
#[derive(Clone)]
pub struct ScalarFunction {
    label: String,
    f: Arc<CellFn>,
}

impl ScalarFunction {
    pub fn new<F>(label: impl Into<String>, f: F) -> Self
    where
        F: Fn(&dyn EvaluationContext) -> f64 + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            f: Arc::new(f),
        }
    }

    /// A cell that ignores the context.
    pub fn constant(value: f64) -> Self {
        Self::new(value.to_string(), move |_| value)
    }

    pub fn apply(&self, context: &dyn EvaluationContext) -> f64 {
        (self.f)(context)
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Two scalar functions are equal only if they share the same closure.
impl PartialEq for ScalarFunction {
    fn eq(&self, other: &Self) -> bool {
        self.label == other.label && Arc::ptr_eq(&self.f, &other.f)
    }
}

impl fmt::Debug for ScalarFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ScalarFunction").field(&self.label).finish()
    }
}

impl fmt::Display for ScalarFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// A tensor function whose cells are produced by per-cell functions.
#[derive(Clone, Debug, PartialEq)]
pub enum DynamicTensor {
    /// One function per address; any type
    Mapped {
        ty: TensorType,
        cells: BTreeMap<Address, ScalarFunction>,
    },
    /// One function per flat index; only fully indexed-bound types
    Indexed {
        ty: TensorType,
        cells: Vec<ScalarFunction>,
    },
}

impl DynamicTensor {
    /// A dynamic tensor with cells keyed by address.
    ///
    /// Every address must fit the type. Over a fully indexed-bound type the
    /// addresses must also cover every cell.
    pub fn mapped(
        ty: TensorType,
        cells: BTreeMap<Address, ScalarFunction>,
    ) -> Result<Self, FunctionError> {
        for address in cells.keys() {
            address.validate(&ty)?;
        }
        // Keys are distinct and valid, so a matching count covers the type
        if let Some(expected) = ty.checked_cell_count()? {
            if cells.len() != expected {
                return Err(FunctionError::CellCount {
                    ty: ty.to_string(),
                    expected,
                    got: cells.len(),
                });
            }
        }
        Ok(DynamicTensor::Mapped { ty, cells })
    }

    /// A dynamic tensor with cells in flat (row-major, name-order) layout.
    ///
    /// The type must have only indexed-bound dimensions, and exactly one
    /// function per cell.
    pub fn indexed(ty: TensorType, cells: Vec<ScalarFunction>) -> Result<Self, FunctionError> {
        let Some(expected) = ty.checked_cell_count()? else {
            return Err(FunctionError::IndexedDynamicTensor(ty.to_string()));
        };
        if cells.len() != expected {
            return Err(FunctionError::CellCount {
                ty: ty.to_string(),
                expected,
                got: cells.len(),
            });
        }
        Ok(DynamicTensor::Indexed { ty, cells })
    }

    pub fn ty(&self) -> &TensorType {
        match self {
            DynamicTensor::Mapped { ty, .. } | DynamicTensor::Indexed { ty, .. } => ty,
        }
    }

    /// Number of cell functions.
    pub fn len(&self) -> usize {
        match self {
            DynamicTensor::Mapped { cells, .. } => cells.len(),
            DynamicTensor::Indexed { cells, .. } => cells.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Compute every cell against `context`.
    pub fn evaluate(&self, context: &dyn EvaluationContext) -> Result<Tensor, FunctionError> {
        match self {
            DynamicTensor::Mapped { ty, cells } => {
                let mut builder = CellBuilder::new(ty.clone());
                for (address, cell) in cells {
                    builder.set(address.clone(), cell.apply(context))?;
                }
                Ok(builder.build())
            }
            DynamicTensor::Indexed { ty, cells } => {
                let mut builder = IndexedBuilder::new(ty.clone())?;
                for (i, cell) in cells.iter().enumerate() {
                    builder.set_by_direct_index(i, cell.apply(context))?;
                }
                Ok(builder.build()?)
            }
        }
    }
}

impl fmt::Display for DynamicTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DynamicTensor::Mapped { ty, cells } => {
                if ty.is_scalar() {
                    return match cells.values().next() {
                        Some(cell) => write!(f, "{ty}:{{{cell}}}"),
                        None => write!(f, "{ty}:{{}}"),
                    };
                }
                let content = cells
                    .iter()
                    .map(|(address, cell)| format!("{}:{}", address.display_with(ty), cell));
                write!(f, "{ty}:{{{}}}", content.format(","))
            }
            DynamicTensor::Indexed { ty, cells } => {
                if ty.is_scalar() {
                    return match cells.first() {
                        Some(cell) => write!(f, "{ty}:{{{cell}}}"),
                        None => write!(f, "{ty}:{{}}"),
                    };
                }
                write!(f, "{ty}:[{}]", cells.iter().format(","))
            }
        }
    }
}
