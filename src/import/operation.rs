//! Intermediate operations: one node of an imported graph.
//!
//! Each operation knows its positional shape from the start. It names its own
//! axes `{scope}_d{i}`, tells the renamer how they relate to its operands'
//! axes, and once names are solved builds a [`TensorFunction`] over the final
//! names.

use std::sync::Arc;

use itertools::Itertools;

use crate::function::{Aggregator, JoinFunction, MapFunction, TensorFunction};
use crate::ordered::OrderedTensorType;
use crate::renamer::DimensionRenamer;
use crate::value::{Address, CellBuilder, Label, Tensor};

use super::{ImportError, OpId};

/// What an operation computes, in positional terms.
#[derive(Clone, Debug, PartialEq)]
pub enum OperationKind {
    /// A graph input; `None` is an axis of unknown size
    Argument { shape: Vec<Option<usize>> },
    /// A fixed value, row-major over `shape`
    Constant { shape: Vec<usize>, values: Arc<[f64]> },
    /// Elementwise unary function
    Map(MapFunction),
    /// Elementwise binary function with numpy-style broadcasting
    Join(JoinFunction),
    /// Aggregate away the listed axes; no axes means all of them
    Reduce {
        aggregator: Aggregator,
        axes: Vec<usize>,
    },
    /// `a: [..., m, k]` times `b: [k, n]`
    MatMul,
    /// Softmax along one axis
    Softmax { axis: usize },
    /// `x: [..., k]` times `w: [k, n]` plus `b: [n]`
    Dense,
}

impl OperationKind {
    pub fn operand_count(&self) -> usize {
        match self {
            OperationKind::Argument { .. } | OperationKind::Constant { .. } => 0,
            OperationKind::Map(_) | OperationKind::Reduce { .. } | OperationKind::Softmax { .. } => 1,
            OperationKind::Join(_) | OperationKind::MatMul => 2,
            OperationKind::Dense => 3,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OperationKind::Argument { .. } => "argument",
            OperationKind::Constant { .. } => "constant",
            OperationKind::Map(_) => "map",
            OperationKind::Join(_) => "join",
            OperationKind::Reduce { .. } => "reduce",
            OperationKind::MatMul => "matmul",
            OperationKind::Softmax { .. } => "softmax",
            OperationKind::Dense => "dense",
        }
    }
}

/// One node of an imported graph.
#[derive(Debug)]
pub struct IntermediateOperation {
    model: String,
    name: String,
    /// `name` with every non-alphanumeric character replaced by `_`
    scope: String,
    kind: OperationKind,
    operands: Vec<OpId>,
    /// Type with node-scoped names, fixed at construction
    scoped_type: OrderedTensorType,
    constant: bool,
}

impl IntermediateOperation {
    pub(super) fn new(
        model: &str,
        name: &str,
        kind: OperationKind,
        operands: Vec<(OpId, &IntermediateOperation)>,
    ) -> Result<Self, ImportError> {
        if operands.len() != kind.operand_count() {
            return Err(ImportError::OperandCount {
                node: name.to_string(),
                kind: kind.name(),
                expected: kind.operand_count(),
                got: operands.len(),
            });
        }
        let scope = sanitize(name);
        let shapes: Vec<Vec<Option<usize>>> =
            operands.iter().map(|(_, op)| op.scoped_type.shape()).collect();
        let shape = infer_shape(name, &kind, &shapes)?;
        let scoped_type = OrderedTensorType::from_shape(&shape).with_prefix(&format!("{scope}_"));

        let constant = match kind {
            OperationKind::Argument { .. } => false,
            OperationKind::Constant { .. } => true,
            _ => operands.iter().all(|(_, op)| op.constant),
        };

        Ok(Self {
            model: model.to_string(),
            name: name.to_string(),
            scope,
            kind,
            operands: operands.into_iter().map(|(id, _)| id).collect(),
            scoped_type,
            constant,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    /// The name used for this node's variable and for its axes' scope.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn kind(&self) -> &OperationKind {
        &self.kind
    }

    pub fn operands(&self) -> &[OpId] {
        &self.operands
    }

    /// Type with this node's own scoped dimension names.
    pub fn scoped_type(&self) -> &OrderedTensorType {
        &self.scoped_type
    }

    /// Graph inputs are bound by the caller on every evaluation.
    pub fn is_input(&self) -> bool {
        matches!(self.kind, OperationKind::Argument { .. })
    }

    /// True if the value is fixed at import time.
    pub fn is_constant(&self) -> bool {
        self.constant
    }

    /// Name of the constant this node becomes when stored or folded.
    pub fn constant_name(&self) -> String {
        format!("{}_{}", sanitize(&self.model), self.scope)
    }

    /// Register this node's axes and how they relate to its operands' axes.
    pub(super) fn add_dimension_name_constraints(
        &self,
        renamer: &mut DimensionRenamer,
        operands: &[&IntermediateOperation],
    ) {
        let own = self.scoped_type.dimension_names();
        renamer.add_ordering(own);

        match &self.kind {
            OperationKind::Argument { .. } | OperationKind::Constant { .. } => {}
            OperationKind::Map(_) | OperationKind::Softmax { .. } => {
                for (mine, theirs) in own.iter().zip(operands[0].scoped_type.dimension_names()) {
                    renamer.add_equivalence(mine, theirs);
                }
            }
            OperationKind::Join(_) => {
                let shape = self.scoped_type.shape();
                for operand in operands {
                    let offset = own.len() - operand.scoped_type.rank();
                    let operand_shape = operand.scoped_type.shape();
                    for (i, theirs) in operand.scoped_type.dimension_names().iter().enumerate() {
                        if !is_squeezed(operand_shape[i], shape[offset + i]) {
                            renamer.add_equivalence(&own[offset + i], theirs);
                        }
                    }
                }
            }
            OperationKind::Reduce { axes, .. } => {
                let kept = operands[0]
                    .scoped_type
                    .dimension_names()
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| !reduces(axes, *i))
                    .map(|(_, name)| name);
                for (mine, theirs) in own.iter().zip(kept) {
                    renamer.add_equivalence(mine, theirs);
                }
            }
            OperationKind::MatMul | OperationKind::Dense => {
                let a = operands[0].scoped_type.dimension_names();
                let b = operands[1].scoped_type.dimension_names();
                let last = a.len() - 1;
                for (mine, theirs) in own.iter().zip(&a[..last]) {
                    renamer.add_equivalence(mine, theirs);
                }
                renamer.add_equivalence(&a[last], &b[0]);
                renamer.add_equivalence(&own[last], &b[1]);
                if let Some(bias) = operands.get(2) {
                    renamer.add_equivalence(&own[last], &bias.scoped_type.dimension_names()[0]);
                }
            }
        }
    }

    /// Build this node's function over final names.
    ///
    /// `ty` is this node's final type; `operands` pairs each operand's final
    /// type with its function.
    pub(super) fn build_function(
        &self,
        ty: &OrderedTensorType,
        operands: &[(&OrderedTensorType, &TensorFunction)],
    ) -> Result<TensorFunction, ImportError> {
        let function = match &self.kind {
            OperationKind::Argument { shape } => {
                let standard = OrderedTensorType::from_shape(shape);
                let variable = TensorFunction::typed_variable(&self.scope, standard.ty().clone());
                if standard.dimension_names() == ty.dimension_names() {
                    variable
                } else {
                    TensorFunction::rename(
                        variable,
                        standard.dimension_names().to_vec(),
                        ty.dimension_names().to_vec(),
                    )?
                }
            }
            OperationKind::Constant { values, .. } => {
                TensorFunction::named_constant(self.constant_name(), positional_tensor(ty, values)?)
            }
            OperationKind::Map(function) => TensorFunction::map(operands[0].1.clone(), *function),
            OperationKind::Join(function) => {
                let shape = ty.shape();
                let mut sides = operands.iter().map(|(operand_ty, f)| {
                    let offset = shape.len() - operand_ty.rank();
                    let squeezed: Vec<String> = operand_ty
                        .dimensions()
                        .enumerate()
                        .filter(|(i, d)| is_squeezed(d.size(), shape[offset + i]))
                        .map(|(_, d)| d.name.clone())
                        .collect();
                    if squeezed.is_empty() {
                        (*f).clone()
                    } else {
                        TensorFunction::reduce((*f).clone(), Aggregator::Sum, squeezed)
                    }
                });
                match (sides.next(), sides.next()) {
                    (Some(lhs), Some(rhs)) => TensorFunction::join(lhs, rhs, *function),
                    _ => return Err(self.shape_error("join needs two operands")),
                }
            }
            OperationKind::Reduce { aggregator, axes } => {
                let (operand_ty, f) = operands[0];
                let dimensions = axes
                    .iter()
                    .map(|&axis| operand_ty.dimension_names()[axis].clone())
                    .collect();
                TensorFunction::reduce(f.clone(), *aggregator, dimensions)
            }
            OperationKind::MatMul => {
                let (a_ty, a) = operands[0];
                let (_, b) = operands[1];
                TensorFunction::matmul(a.clone(), b.clone(), inner_dimension(a_ty))
            }
            OperationKind::Softmax { axis } => {
                TensorFunction::softmax(operands[0].1.clone(), ty.dimension_names()[*axis].clone())
            }
            OperationKind::Dense => {
                let (x_ty, x) = operands[0];
                TensorFunction::xw_plus_b(
                    x.clone(),
                    operands[1].1.clone(),
                    operands[2].1.clone(),
                    inner_dimension(x_ty),
                )
            }
        };
        Ok(function)
    }

    fn shape_error(&self, reason: impl Into<String>) -> ImportError {
        ImportError::Shape {
            node: self.name.clone(),
            reason: reason.into(),
        }
    }
}

/// Replace every non-alphanumeric character with `_`.
pub(super) fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn reduces(axes: &[usize], axis: usize) -> bool {
    axes.is_empty() || axes.contains(&axis)
}

/// A size-1 operand axis broadcast against a larger output axis.
fn is_squeezed(operand: Option<usize>, output: Option<usize>) -> bool {
    operand == Some(1) && output != Some(1)
}

fn inner_dimension(ty: &OrderedTensorType) -> String {
    ty.dimension_names()
        .last()
        .cloned()
        .unwrap_or_default()
}

/// The positional shape of an operation's result.
fn infer_shape(
    node: &str,
    kind: &OperationKind,
    operands: &[Vec<Option<usize>>],
) -> Result<Vec<Option<usize>>, ImportError> {
    let error = |reason: String| ImportError::Shape {
        node: node.to_string(),
        reason,
    };

    match kind {
        OperationKind::Argument { shape } => Ok(shape.clone()),
        OperationKind::Constant { shape, values } => {
            let Some(cells) = shape.iter().try_fold(1usize, |acc, &n| acc.checked_mul(n)) else {
                return Err(error(format!("shape {shape:?} has too many cells")));
            };
            if cells != values.len() {
                return Err(error(format!(
                    "shape {shape:?} has {cells} cells but {} values were given",
                    values.len()
                )));
            }
            Ok(shape.iter().map(|&n| Some(n)).collect())
        }
        OperationKind::Map(_) => Ok(operands[0].clone()),
        OperationKind::Softmax { axis } => {
            if *axis >= operands[0].len() {
                return Err(error(format!(
                    "axis {axis} out of range for rank {}",
                    operands[0].len()
                )));
            }
            Ok(operands[0].clone())
        }
        OperationKind::Join(_) => broadcast(&operands[0], &operands[1]).ok_or_else(|| {
            error(format!(
                "cannot broadcast {} with {}",
                render_shape(&operands[0]),
                render_shape(&operands[1])
            ))
        }),
        OperationKind::Reduce { axes, .. } => {
            let rank = operands[0].len();
            if let Some(axis) = axes.iter().find(|&&axis| axis >= rank) {
                return Err(error(format!("axis {axis} out of range for rank {rank}")));
            }
            if !axes.iter().all_unique() {
                return Err(error(format!("axes {axes:?} repeat an axis")));
            }
            Ok(operands[0]
                .iter()
                .enumerate()
                .filter(|(i, _)| !reduces(axes, *i))
                .map(|(_, size)| *size)
                .collect())
        }
        OperationKind::MatMul | OperationKind::Dense => {
            let (a, b) = (&operands[0], &operands[1]);
            if a.is_empty() || b.len() != 2 {
                return Err(error(format!(
                    "cannot multiply {} by {}",
                    render_shape(a),
                    render_shape(b)
                )));
            }
            let last = a.len() - 1;
            if unify(a[last], b[0]).is_none() {
                return Err(error(format!(
                    "inner sizes differ: {} by {}",
                    render_shape(a),
                    render_shape(b)
                )));
            }
            let mut n = b[1];
            if let Some(bias) = operands.get(2) {
                n = match bias.as_slice() {
                    [size] => unify(n, *size),
                    _ => None,
                }
                .ok_or_else(|| {
                    error(format!(
                        "bias {} does not fit {}",
                        render_shape(bias),
                        render_shape(b)
                    ))
                })?;
            }
            let mut shape = a[..last].to_vec();
            shape.push(n);
            Ok(shape)
        }
    }
}

/// Numpy broadcasting: align from the right; size 1 stretches to any size.
fn broadcast(a: &[Option<usize>], b: &[Option<usize>]) -> Option<Vec<Option<usize>>> {
    let rank = a.len().max(b.len());
    let at = |s: &[Option<usize>], i: usize| (i + s.len()).checked_sub(rank).map(|j| s[j]);
    (0..rank)
        .map(|i| match (at(a, i), at(b, i)) {
            (Some(x), Some(y)) => broadcast_size(x, y),
            (Some(x), None) | (None, Some(x)) => Some(x),
            (None, None) => None,
        })
        .collect()
}

fn broadcast_size(x: Option<usize>, y: Option<usize>) -> Option<Option<usize>> {
    match (x, y) {
        (Some(1), other) | (other, Some(1)) => Some(other),
        _ => unify(x, y),
    }
}

/// Two sizes of one axis; a known size wins over an unknown one.
fn unify(x: Option<usize>, y: Option<usize>) -> Option<Option<usize>> {
    match (x, y) {
        (Some(m), Some(n)) if m != n => None,
        (Some(m), _) | (_, Some(m)) => Some(Some(m)),
        (None, None) => Some(None),
    }
}

fn render_shape(shape: &[Option<usize>]) -> String {
    let sizes = shape.iter().map(|size| match size {
        Some(n) => n.to_string(),
        None => "?".to_string(),
    });
    format!("[{}]", sizes.format(", "))
}

/// A tensor from row-major positional values.
fn positional_tensor(ty: &OrderedTensorType, values: &[f64]) -> Result<Tensor, ImportError> {
    let sizes: Vec<usize> = ty.shape().into_iter().collect::<Option<_>>().unwrap_or_default();
    let strides = ty.positional_strides().unwrap_or_default();
    // Position in source order of each dimension, in name order
    let positions: Vec<usize> = ty
        .ty()
        .dimension_names()
        .filter_map(|name| ty.dimension_names().iter().position(|n| n == name))
        .collect();

    let mut builder = CellBuilder::new(ty.ty().clone());
    for (flat, &value) in values.iter().enumerate() {
        let labels = positions
            .iter()
            .map(|&p| Label::Index(flat / strides[p] % sizes[p]));
        builder.set(Address::new(labels), value)?;
    }
    Ok(builder.build())
}
