//! Axisflow: named, typed tensor functions for imported model graphs
//!
//! Models trained elsewhere address tensor axes by position. Axisflow imports
//! such graphs into an algebra of tensors with *named* dimensions: every
//! imported node gets a type, the names are reconciled across the whole graph
//! by a single constraint solve, and each output becomes an immutable
//! [`TensorFunction`] that can be evaluated any number of times, from any
//! number of threads, against different contexts.
//!
//! ```ignore
//! use axisflow::{GraphBuilder, ImportConfig, MapContext, OperationKind};
//!
//! let mut graph = GraphBuilder::new("model");
//! let x = graph.argument("x", &[None, Some(3)])?;
//! let w = graph.constant("w", &[3, 2], &[1.0, 0.0, 0.0, 1.0, 1.0, 1.0])?;
//! let y = graph.add("y", OperationKind::MatMul, &[x, w])?;
//! graph.output(y)?;
//!
//! let model = graph.import(&ImportConfig::default())?;
//! println!("{}", model.output("y")?.expression);
//! ```

pub mod config;
pub mod context;
pub mod function;
pub mod import;
pub mod ordered;
pub mod renamer;
pub mod types;
pub mod value;

pub use config::ImportConfig;
pub use context::{EvaluationContext, MapContext, TypeContext};
pub use function::{
    Aggregator, DynamicTensor, FunctionError, JoinFunction, MapFunction, ScalarFunction,
    TensorFunction,
};
pub use import::{
    GraphBuilder, ImportError, ImportedFunction, ImportedModel, IntermediateOperation,
    ModelGraph, OpId, OperationKind,
};
pub use ordered::OrderedTensorType;
pub use renamer::{DimensionNaming, DimensionRenamer, RenameError};
pub use types::{Dimension, DimensionKind, TensorType, TypeError};
pub use value::{Address, CellBuilder, IndexedBuilder, Label, Tensor, ValueError};
