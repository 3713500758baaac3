//! Importing positional computation graphs.
//!
//! A [`GraphBuilder`] collects the nodes of an external graph into an arena of
//! [`IntermediateOperation`]s. Importing runs in two passes:
//!
//! 1. every node registers its dimension constraints and the
//!    [`DimensionRenamer`] solves them once for the whole graph
//! 2. each requested output builds its final type and [`TensorFunction`],
//!    pulling in its operands' (memoized) results
//!
//! Final types and functions are unreachable until the first pass is done.

mod operation;

use std::sync::Arc;

use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use tracing::{debug, info, trace};

use crate::config::ImportConfig;
use crate::context::{EvaluationContext, MapContext};
use crate::function::{FunctionError, TensorFunction};
use crate::ordered::OrderedTensorType;
use crate::renamer::{DimensionNaming, DimensionRenamer, RenameError};
use crate::types::{TensorType, TypeError};
use crate::value::{Tensor, ValueError};

pub use operation::{IntermediateOperation, OperationKind};

/// Errors importing a graph.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ImportError {
    #[error("operation '{node}': {reason}")]
    Shape { node: String, reason: String },

    #[error("operation '{node}' ({kind}) takes {expected} operand(s), got {got}")]
    OperandCount {
        node: String,
        kind: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("operand {0} does not exist")]
    UnknownOperand(OpId),

    #[error("operation name '{0}' is already used")]
    DuplicateName(String),

    #[error("no output named '{0}'")]
    UnknownOutput(String),

    #[error("the graph declares no outputs")]
    NoOutputs,

    #[error("dimension names have not been solved")]
    NotSolved,

    #[error(transparent)]
    Rename(#[from] RenameError),

    #[error(transparent)]
    Function(#[from] FunctionError),

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error(transparent)]
    Value(#[from] ValueError),
}

/// Handle to an operation in a [`ModelGraph`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(usize);

impl OpId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for OpId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Appends operations to a graph. Operands must be added before their users.
#[derive(Debug)]
pub struct GraphBuilder {
    model: String,
    operations: Vec<IntermediateOperation>,
    /// Scoped (sanitized) names in use
    scopes: IndexMap<String, OpId>,
    outputs: Vec<OpId>,
}

impl GraphBuilder {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            operations: Vec::new(),
            scopes: IndexMap::new(),
            outputs: Vec::new(),
        }
    }

    /// Add an operation over existing operands.
    pub fn add(
        &mut self,
        name: &str,
        kind: OperationKind,
        operands: &[OpId],
    ) -> Result<OpId, ImportError> {
        let scope = operation::sanitize(name);
        if self.scopes.contains_key(&scope) {
            return Err(ImportError::DuplicateName(name.to_string()));
        }
        let operands = operands
            .iter()
            .map(|&id| {
                self.operations
                    .get(id.0)
                    .map(|op| (id, op))
                    .ok_or(ImportError::UnknownOperand(id))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let operation = IntermediateOperation::new(&self.model, name, kind, operands)?;

        let id = OpId(self.operations.len());
        self.operations.push(operation);
        self.scopes.insert(scope, id);
        Ok(id)
    }

    pub fn argument(&mut self, name: &str, shape: &[Option<usize>]) -> Result<OpId, ImportError> {
        self.add(
            name,
            OperationKind::Argument {
                shape: shape.to_vec(),
            },
            &[],
        )
    }

    pub fn constant(
        &mut self,
        name: &str,
        shape: &[usize],
        values: &[f64],
    ) -> Result<OpId, ImportError> {
        self.add(
            name,
            OperationKind::Constant {
                shape: shape.to_vec(),
                values: Arc::from(values),
            },
            &[],
        )
    }

    /// Mark an operation as a model output, named after the operation.
    pub fn output(&mut self, id: OpId) -> Result<(), ImportError> {
        if id.0 >= self.operations.len() {
            return Err(ImportError::UnknownOperand(id));
        }
        if !self.outputs.contains(&id) {
            self.outputs.push(id);
        }
        Ok(())
    }

    /// Look up an operation by name.
    pub fn find(&self, name: &str) -> Option<OpId> {
        self.scopes.get(&operation::sanitize(name)).copied()
    }

    pub fn finish(self) -> ModelGraph {
        let slots = self.operations.len();
        ModelGraph {
            name: self.model,
            operations: self.operations,
            outputs: self.outputs,
            solution: OnceCell::new(),
            types: (0..slots).map(|_| OnceCell::new()).collect(),
            functions: (0..slots).map(|_| OnceCell::new()).collect(),
        }
    }

    /// Finish the graph and import it.
    pub fn import(self, config: &ImportConfig) -> Result<ImportedModel, ImportError> {
        self.finish().import(config)
    }
}

#[derive(Debug)]
struct Solution {
    naming: DimensionNaming,
    fold_constants: bool,
}

/// An arena of intermediate operations with memoized final types and functions.
#[derive(Debug)]
pub struct ModelGraph {
    name: String,
    operations: Vec<IntermediateOperation>,
    outputs: Vec<OpId>,
    solution: OnceCell<Solution>,
    types: Vec<OnceCell<OrderedTensorType>>,
    functions: Vec<OnceCell<TensorFunction>>,
}

impl ModelGraph {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn operation(&self, id: OpId) -> Result<&IntermediateOperation, ImportError> {
        self.operations
            .get(id.0)
            .ok_or(ImportError::UnknownOperand(id))
    }

    pub fn operations(&self) -> impl Iterator<Item = (OpId, &IntermediateOperation)> {
        self.operations.iter().enumerate().map(|(i, op)| (OpId(i), op))
    }

    pub fn outputs(&self) -> &[OpId] {
        &self.outputs
    }

    /// Solved names, if [`ModelGraph::solve`] has run.
    pub fn naming(&self) -> Option<&DimensionNaming> {
        self.solution.get().map(|s| &s.naming)
    }

    /// Collect every node's constraints and solve them.
    ///
    /// Runs once; later calls return the first solution.
    pub fn solve(&self, config: &ImportConfig) -> Result<&DimensionNaming, ImportError> {
        let solution = self.solution.get_or_try_init(|| {
            let mut renamer = DimensionRenamer::with_prefix(config.dimension_prefix.as_str());
            for op in &self.operations {
                let operands = op
                    .operands()
                    .iter()
                    .map(|&id| self.operation(id))
                    .collect::<Result<Vec<_>, _>>()?;
                op.add_dimension_name_constraints(&mut renamer, &operands);
            }
            debug!(
                model = %self.name,
                operations = self.operations.len(),
                dimensions = renamer.dimension_count(),
                "collected dimension constraints"
            );
            Ok::<_, ImportError>(Solution {
                naming: renamer.solve()?,
                fold_constants: config.fold_constants,
            })
        })?;
        Ok(&solution.naming)
    }

    /// The operation's type under its final dimension names.
    pub fn final_type(&self, id: OpId) -> Result<&OrderedTensorType, ImportError> {
        let solution = self.solution.get().ok_or(ImportError::NotSolved)?;
        let op = self.operation(id)?;
        self.types[id.0].get_or_try_init(|| {
            let naming = &solution.naming;
            Ok(op
                .scoped_type()
                .rename_with(|name| naming.get(name).map(str::to_string))?)
        })
    }

    /// The operation's tensor function over final dimension names.
    pub fn function(&self, id: OpId) -> Result<&TensorFunction, ImportError> {
        let solution = self.solution.get().ok_or(ImportError::NotSolved)?;
        let op = self.operation(id)?;
        self.functions[id.0].get_or_try_init(|| {
            let ty = self.final_type(id)?;
            let operands = op
                .operands()
                .iter()
                .map(|&operand| Ok((self.final_type(operand)?, self.function(operand)?)))
                .collect::<Result<Vec<_>, ImportError>>()?;
            let mut function = op.build_function(ty, &operands)?;

            let is_leaf = matches!(op.kind(), OperationKind::Constant { .. });
            if solution.fold_constants && op.is_constant() && !is_leaf {
                let value = function.evaluate(&MapContext::new())?;
                function = TensorFunction::named_constant(op.constant_name(), value);
            }
            trace!(node = op.name(), ty = %ty, function = %function, "finalized operation");
            Ok(function)
        })
    }

    /// Solve names, then finalize every output.
    pub fn import(&self, config: &ImportConfig) -> Result<ImportedModel, ImportError> {
        if self.outputs.is_empty() {
            return Err(ImportError::NoOutputs);
        }
        let naming = self.solve(config)?.clone();

        let mut outputs = IndexMap::new();
        for &id in &self.outputs {
            let op = self.operation(id)?;
            let function = self.function(id)?.to_primitive();
            outputs.insert(
                op.name().to_string(),
                ImportedFunction {
                    expression: function.to_string(),
                    function,
                    ty: self.final_type(id)?.clone(),
                },
            );
        }

        let inputs = self
            .operations
            .iter()
            .filter_map(|op| match op.kind() {
                OperationKind::Argument { shape } => Some((
                    op.scope().to_string(),
                    OrderedTensorType::from_shape(shape).into_type(),
                )),
                _ => None,
            })
            .collect();

        info!(
            model = %self.name,
            outputs = outputs.len(),
            dimensions = naming.class_count(),
            "imported model"
        );
        Ok(ImportedModel {
            name: self.name.clone(),
            inputs,
            outputs,
            naming,
        })
    }
}

/// One finalized output.
#[derive(Clone, Debug, PartialEq)]
pub struct ImportedFunction {
    /// Lowered to primitive operators
    pub function: TensorFunction,
    pub ty: OrderedTensorType,
    /// Textual rendering of `function`
    pub expression: String,
}

/// The result of an import: primitive functions ready for repeated evaluation.
#[derive(Clone, Debug, PartialEq)]
pub struct ImportedModel {
    pub name: String,
    /// Variable name to the standard-named type callers bind. Axis `i` is
    /// named `d{i}`, zero-padded so names sort positionally (`d00` .. `d11`).
    pub inputs: IndexMap<String, TensorType>,
    pub outputs: IndexMap<String, ImportedFunction>,
    pub naming: DimensionNaming,
}

impl ImportedModel {
    pub fn output(&self, name: &str) -> Result<&ImportedFunction, ImportError> {
        self.outputs
            .get(name)
            .ok_or_else(|| ImportError::UnknownOutput(name.to_string()))
    }

    pub fn evaluate(
        &self,
        output: &str,
        context: &dyn EvaluationContext,
    ) -> Result<Tensor, ImportError> {
        Ok(self.output(output)?.function.evaluate(context)?)
    }
}
