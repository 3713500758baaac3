//! Lazy tensor functions.
//!
//! A [`TensorFunction`] is an immutable expression tree. Building one does no
//! numeric work; [`TensorFunction::ty`] infers the result type from a
//! [`TypeContext`], and [`TensorFunction::evaluate`] computes it against an
//! [`EvaluationContext`]. Evaluation only reads the tree, so a finished tree
//! can be shared across threads and evaluated concurrently.
//!
//! The operators split into a primitive vocabulary (variable, constant,
//! dynamic, rename, join, reduce, map) and composites (matmul, softmax,
//! xw_plus_b) that [`TensorFunction::to_primitive`] rewrites into primitives.

pub mod dynamic;
mod eval;
mod scalar;

use std::fmt;
use std::slice;
use std::sync::Arc;

use indexmap::IndexSet;
use itertools::Itertools;

use crate::context::{EvaluationContext, TypeContext};
use crate::types::{TensorType, TypeError};
use crate::value::{Tensor, ValueError};

pub use dynamic::{DynamicTensor, ScalarFunction};
pub use scalar::{Aggregator, JoinFunction, MapFunction};

/// Errors building or evaluating tensor functions.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum FunctionError {
    #[error("{operator} takes {expected} argument(s), got {got}")]
    Arity {
        operator: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("an indexed dynamic tensor needs a fully indexed-bound type, got {0}")]
    IndexedDynamicTensor(String),

    #[error("{ty} has {expected} cells but {got} cell functions were given")]
    CellCount {
        ty: String,
        expected: usize,
        got: usize,
    },

    #[error("variable '{0}' is not bound in the context")]
    UnboundVariable(String),

    #[error("variable '{name}' is declared as {expected} but bound to {got}")]
    VariableTypeMismatch {
        name: String,
        expected: String,
        got: String,
    },

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error(transparent)]
    Value(#[from] ValueError),
}

/// A lazy tensor expression.
#[derive(Clone, Debug, PartialEq)]
pub enum TensorFunction {
    /// A tensor read from the context by name (leaf)
    Variable {
        name: String,
        /// Declared type; without one the context supplies it
        ty: Option<TensorType>,
    },

    /// A fixed value (leaf)
    Constant {
        value: Arc<Tensor>,
        /// Rendered in place of the value when set
        name: Option<String>,
    },

    /// Cells computed by per-cell functions (leaf)
    Dynamic(DynamicTensor),

    /// Rename `from[i]` to `to[i]`
    Rename {
        argument: Box<TensorFunction>,
        from: Vec<String>,
        to: Vec<String>,
    },

    /// Combine cells agreeing on shared dimensions
    Join {
        lhs: Box<TensorFunction>,
        rhs: Box<TensorFunction>,
        function: JoinFunction,
    },

    /// Aggregate away dimensions; an empty list means all of them
    Reduce {
        argument: Box<TensorFunction>,
        aggregator: Aggregator,
        dimensions: Vec<String>,
    },

    /// Apply a function to every cell
    Map {
        argument: Box<TensorFunction>,
        function: MapFunction,
    },

    /// Matrix product summing over `dimension`
    Matmul {
        lhs: Box<TensorFunction>,
        rhs: Box<TensorFunction>,
        dimension: String,
    },

    /// Softmax along `dimension`
    Softmax {
        argument: Box<TensorFunction>,
        dimension: String,
    },

    /// `x * w` summed over `dimension`, plus `b`
    XwPlusB {
        x: Box<TensorFunction>,
        w: Box<TensorFunction>,
        b: Box<TensorFunction>,
        dimension: String,
    },
}

impl TensorFunction {
    /// A variable typed by whatever context it is used with.
    pub fn variable(name: impl Into<String>) -> Self {
        TensorFunction::Variable {
            name: name.into(),
            ty: None,
        }
    }

    /// A variable with a declared type. Evaluation checks the bound value against it.
    pub fn typed_variable(name: impl Into<String>, ty: TensorType) -> Self {
        TensorFunction::Variable {
            name: name.into(),
            ty: Some(ty),
        }
    }

    pub fn constant(value: Tensor) -> Self {
        TensorFunction::Constant {
            value: Arc::new(value),
            name: None,
        }
    }

    pub fn named_constant(name: impl Into<String>, value: Tensor) -> Self {
        TensorFunction::Constant {
            value: Arc::new(value),
            name: Some(name.into()),
        }
    }

    pub fn dynamic(tensor: DynamicTensor) -> Self {
        TensorFunction::Dynamic(tensor)
    }

    /// Rename dimensions pairwise. The two lists must have the same length.
    pub fn rename(
        argument: TensorFunction,
        from: Vec<String>,
        to: Vec<String>,
    ) -> Result<Self, FunctionError> {
        if from.len() != to.len() {
            return Err(TypeError::RenameLength {
                from: from.len(),
                to: to.len(),
            }
            .into());
        }
        Ok(TensorFunction::Rename {
            argument: Box::new(argument),
            from,
            to,
        })
    }

    pub fn join(lhs: TensorFunction, rhs: TensorFunction, function: JoinFunction) -> Self {
        TensorFunction::Join {
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            function,
        }
    }

    pub fn reduce(argument: TensorFunction, aggregator: Aggregator, dimensions: Vec<String>) -> Self {
        TensorFunction::Reduce {
            argument: Box::new(argument),
            aggregator,
            dimensions,
        }
    }

    pub fn map(argument: TensorFunction, function: MapFunction) -> Self {
        TensorFunction::Map {
            argument: Box::new(argument),
            function,
        }
    }

    pub fn matmul(lhs: TensorFunction, rhs: TensorFunction, dimension: impl Into<String>) -> Self {
        TensorFunction::Matmul {
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            dimension: dimension.into(),
        }
    }

    pub fn softmax(argument: TensorFunction, dimension: impl Into<String>) -> Self {
        TensorFunction::Softmax {
            argument: Box::new(argument),
            dimension: dimension.into(),
        }
    }

    pub fn xw_plus_b(
        x: TensorFunction,
        w: TensorFunction,
        b: TensorFunction,
        dimension: impl Into<String>,
    ) -> Self {
        TensorFunction::XwPlusB {
            x: Box::new(x),
            w: Box::new(w),
            b: Box::new(b),
            dimension: dimension.into(),
        }
    }

    pub fn operator_name(&self) -> &'static str {
        match self {
            TensorFunction::Variable { .. } => "variable",
            TensorFunction::Constant { .. } => "constant",
            TensorFunction::Dynamic(_) => "dynamic",
            TensorFunction::Rename { .. } => "rename",
            TensorFunction::Join { .. } => "join",
            TensorFunction::Reduce { .. } => "reduce",
            TensorFunction::Map { .. } => "map",
            TensorFunction::Matmul { .. } => "matmul",
            TensorFunction::Softmax { .. } => "softmax",
            TensorFunction::XwPlusB { .. } => "xw_plus_b",
        }
    }

    /// Number of function arguments this operator takes.
    pub fn arity(&self) -> usize {
        match self {
            TensorFunction::Variable { .. }
            | TensorFunction::Constant { .. }
            | TensorFunction::Dynamic(_) => 0,
            TensorFunction::Rename { .. }
            | TensorFunction::Reduce { .. }
            | TensorFunction::Map { .. }
            | TensorFunction::Softmax { .. } => 1,
            TensorFunction::Join { .. } | TensorFunction::Matmul { .. } => 2,
            TensorFunction::XwPlusB { .. } => 3,
        }
    }

    /// Direct arguments, in order.
    pub fn arguments(&self) -> Vec<&TensorFunction> {
        match self {
            TensorFunction::Variable { .. }
            | TensorFunction::Constant { .. }
            | TensorFunction::Dynamic(_) => Vec::new(),
            TensorFunction::Rename { argument, .. }
            | TensorFunction::Reduce { argument, .. }
            | TensorFunction::Map { argument, .. }
            | TensorFunction::Softmax { argument, .. } => vec![&**argument],
            TensorFunction::Join { lhs, rhs, .. } | TensorFunction::Matmul { lhs, rhs, .. } => {
                vec![&**lhs, &**rhs]
            }
            TensorFunction::XwPlusB { x, w, b, .. } => vec![&**x, &**w, &**b],
        }
    }

    /// The same operator over new arguments.
    ///
    /// Fails unless `arguments` has exactly [`TensorFunction::arity`] entries.
    pub fn with_arguments(
        &self,
        arguments: Vec<TensorFunction>,
    ) -> Result<TensorFunction, FunctionError> {
        Ok(match self {
            TensorFunction::Variable { .. }
            | TensorFunction::Constant { .. }
            | TensorFunction::Dynamic(_) => {
                let [] = self.take::<0>(arguments)?;
                self.clone()
            }
            TensorFunction::Rename { from, to, .. } => {
                let [argument] = self.take::<1>(arguments)?;
                TensorFunction::rename(argument, from.clone(), to.clone())?
            }
            TensorFunction::Join { function, .. } => {
                let [lhs, rhs] = self.take::<2>(arguments)?;
                TensorFunction::join(lhs, rhs, *function)
            }
            TensorFunction::Reduce {
                aggregator,
                dimensions,
                ..
            } => {
                let [argument] = self.take::<1>(arguments)?;
                TensorFunction::reduce(argument, *aggregator, dimensions.clone())
            }
            TensorFunction::Map { function, .. } => {
                let [argument] = self.take::<1>(arguments)?;
                TensorFunction::map(argument, *function)
            }
            TensorFunction::Matmul { dimension, .. } => {
                let [lhs, rhs] = self.take::<2>(arguments)?;
                TensorFunction::matmul(lhs, rhs, dimension.clone())
            }
            TensorFunction::Softmax { dimension, .. } => {
                let [argument] = self.take::<1>(arguments)?;
                TensorFunction::softmax(argument, dimension.clone())
            }
            TensorFunction::XwPlusB { dimension, .. } => {
                let [x, w, b] = self.take::<3>(arguments)?;
                TensorFunction::xw_plus_b(x, w, b, dimension.clone())
            }
        })
    }

    fn take<const N: usize>(
        &self,
        arguments: Vec<TensorFunction>,
    ) -> Result<[TensorFunction; N], FunctionError> {
        let got = arguments.len();
        arguments.try_into().map_err(|_| FunctionError::Arity {
            operator: self.operator_name(),
            expected: N,
            got,
        })
    }

    /// Infer the result type without evaluating anything.
    pub fn ty(&self, context: &dyn TypeContext) -> Result<TensorType, FunctionError> {
        match self {
            TensorFunction::Variable { name, ty } => match ty {
                Some(ty) => Ok(ty.clone()),
                None => context
                    .type_of(name)
                    .ok_or_else(|| FunctionError::UnboundVariable(name.clone())),
            },
            TensorFunction::Constant { value, .. } => Ok(value.ty().clone()),
            TensorFunction::Dynamic(tensor) => Ok(tensor.ty().clone()),
            TensorFunction::Rename { argument, from, to } => {
                Ok(argument.ty(context)?.rename(from, to)?)
            }
            TensorFunction::Join { lhs, rhs, .. } => {
                Ok(lhs.ty(context)?.join(&rhs.ty(context)?)?)
            }
            TensorFunction::Reduce {
                argument,
                dimensions,
                ..
            } => Ok(argument.ty(context)?.reduce(dimensions)?),
            TensorFunction::Map { argument, .. } => argument.ty(context),
            TensorFunction::Matmul {
                lhs,
                rhs,
                dimension,
            } => {
                let product = lhs.ty(context)?.join(&rhs.ty(context)?)?;
                Ok(product.reduce(slice::from_ref(dimension))?)
            }
            TensorFunction::Softmax {
                argument,
                dimension,
            } => {
                let ty = argument.ty(context)?;
                ty.reduce(slice::from_ref(dimension))?;
                Ok(ty)
            }
            TensorFunction::XwPlusB { x, w, b, dimension } => {
                let product = x.ty(context)?.join(&w.ty(context)?)?;
                let summed = product.reduce(slice::from_ref(dimension))?;
                Ok(summed.join(&b.ty(context)?)?)
            }
        }
    }

    /// Compute the value against `context`.
    ///
    /// Composites compute what their lowering computes.
    pub fn evaluate(&self, context: &dyn EvaluationContext) -> Result<Tensor, FunctionError> {
        match self {
            TensorFunction::Variable { name, ty } => {
                let value = context
                    .tensor(name)
                    .ok_or_else(|| FunctionError::UnboundVariable(name.clone()))?;
                if let Some(expected) = ty {
                    if !value.ty().is_assignable_to(expected) {
                        return Err(FunctionError::VariableTypeMismatch {
                            name: name.clone(),
                            expected: expected.to_string(),
                            got: value.ty().to_string(),
                        });
                    }
                }
                Ok(value.clone())
            }
            TensorFunction::Constant { value, .. } => Ok(Tensor::clone(value)),
            TensorFunction::Dynamic(tensor) => tensor.evaluate(context),
            TensorFunction::Rename { argument, from, to } => {
                eval::rename(&argument.evaluate(context)?, from, to)
            }
            TensorFunction::Join { lhs, rhs, function } => {
                eval::join(&lhs.evaluate(context)?, &rhs.evaluate(context)?, *function)
            }
            TensorFunction::Reduce {
                argument,
                aggregator,
                dimensions,
            } => eval::reduce(&argument.evaluate(context)?, *aggregator, dimensions),
            TensorFunction::Map { argument, function } => {
                Ok(eval::map(&argument.evaluate(context)?, *function))
            }
            TensorFunction::Matmul {
                lhs,
                rhs,
                dimension,
            } => {
                let product = eval::join(
                    &lhs.evaluate(context)?,
                    &rhs.evaluate(context)?,
                    JoinFunction::Multiply,
                )?;
                eval::reduce(&product, Aggregator::Sum, slice::from_ref(dimension))
            }
            TensorFunction::Softmax {
                argument,
                dimension,
            } => {
                let exp = eval::map(&argument.evaluate(context)?, MapFunction::Exp);
                let total = eval::reduce(&exp, Aggregator::Sum, slice::from_ref(dimension))?;
                eval::join(&exp, &total, JoinFunction::Divide)
            }
            TensorFunction::XwPlusB { x, w, b, dimension } => {
                let product = eval::join(
                    &x.evaluate(context)?,
                    &w.evaluate(context)?,
                    JoinFunction::Multiply,
                )?;
                let summed = eval::reduce(&product, Aggregator::Sum, slice::from_ref(dimension))?;
                eval::join(&summed, &b.evaluate(context)?, JoinFunction::Add)
            }
        }
    }

    /// An equivalent tree using only primitive operators.
    ///
    /// Arguments are lowered first. Lowering a primitive tree returns an equal tree.
    pub fn to_primitive(&self) -> TensorFunction {
        match self {
            TensorFunction::Variable { .. }
            | TensorFunction::Constant { .. }
            | TensorFunction::Dynamic(_) => self.clone(),
            TensorFunction::Rename { argument, from, to } => TensorFunction::Rename {
                argument: Box::new(argument.to_primitive()),
                from: from.clone(),
                to: to.clone(),
            },
            TensorFunction::Join { lhs, rhs, function } => {
                TensorFunction::join(lhs.to_primitive(), rhs.to_primitive(), *function)
            }
            TensorFunction::Reduce {
                argument,
                aggregator,
                dimensions,
            } => TensorFunction::reduce(argument.to_primitive(), *aggregator, dimensions.clone()),
            TensorFunction::Map { argument, function } => {
                TensorFunction::map(argument.to_primitive(), *function)
            }
            TensorFunction::Matmul {
                lhs,
                rhs,
                dimension,
            } => TensorFunction::reduce(
                TensorFunction::join(
                    lhs.to_primitive(),
                    rhs.to_primitive(),
                    JoinFunction::Multiply,
                ),
                Aggregator::Sum,
                vec![dimension.clone()],
            ),
            TensorFunction::Softmax {
                argument,
                dimension,
            } => {
                let exp = TensorFunction::map(argument.to_primitive(), MapFunction::Exp);
                let total =
                    TensorFunction::reduce(exp.clone(), Aggregator::Sum, vec![dimension.clone()]);
                TensorFunction::join(exp, total, JoinFunction::Divide)
            }
            TensorFunction::XwPlusB { x, w, b, dimension } => {
                let product =
                    TensorFunction::join(x.to_primitive(), w.to_primitive(), JoinFunction::Multiply);
                TensorFunction::join(
                    TensorFunction::reduce(product, Aggregator::Sum, vec![dimension.clone()]),
                    b.to_primitive(),
                    JoinFunction::Add,
                )
            }
        }
    }

    /// Whether this operator belongs to the primitive vocabulary.
    pub fn is_primitive(&self) -> bool {
        !matches!(
            self,
            TensorFunction::Matmul { .. }
                | TensorFunction::Softmax { .. }
                | TensorFunction::XwPlusB { .. }
        )
    }

    /// Whether every node of the tree is primitive.
    pub fn is_primitive_tree(&self) -> bool {
        self.is_primitive() && self.arguments().into_iter().all(Self::is_primitive_tree)
    }

    /// Whether the value depends on nothing but the tree itself.
    pub fn is_constant(&self) -> bool {
        match self {
            TensorFunction::Constant { .. } => true,
            TensorFunction::Variable { .. } | TensorFunction::Dynamic(_) => false,
            _ => self.arguments().into_iter().all(Self::is_constant),
        }
    }

    /// Names of the variables read by the tree, in first-use order.
    pub fn variables(&self) -> Vec<&str> {
        let mut seen = IndexSet::new();
        self.collect_variables(&mut seen);
        seen.into_iter().collect()
    }

    fn collect_variables<'a>(&'a self, seen: &mut IndexSet<&'a str>) {
        if let TensorFunction::Variable { name, .. } = self {
            seen.insert(name.as_str());
        }
        for argument in self.arguments() {
            argument.collect_variables(seen);
        }
    }
}

impl fmt::Display for TensorFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TensorFunction::Variable { name, .. } => f.write_str(name),
            TensorFunction::Constant {
                name: Some(name), ..
            } => write!(f, "constant({name})"),
            TensorFunction::Constant { value, .. } => write!(f, "{value}"),
            TensorFunction::Dynamic(tensor) => write!(f, "{tensor}"),
            TensorFunction::Rename { argument, from, to } => {
                if from.len() == 1 {
                    write!(f, "rename({argument}, {}, {})", from[0], to[0])
                } else {
                    write!(
                        f,
                        "rename({argument}, ({}), ({}))",
                        from.iter().join(", "),
                        to.iter().join(", ")
                    )
                }
            }
            TensorFunction::Join { lhs, rhs, function } => {
                write!(f, "join({lhs}, {rhs}, {function})")
            }
            TensorFunction::Reduce {
                argument,
                aggregator,
                dimensions,
            } => {
                write!(f, "reduce({argument}, {aggregator}")?;
                for dimension in dimensions {
                    write!(f, ", {dimension}")?;
                }
                f.write_str(")")
            }
            TensorFunction::Map { argument, function } => write!(f, "map({argument}, {function})"),
            TensorFunction::Matmul {
                lhs,
                rhs,
                dimension,
            } => write!(f, "matmul({lhs}, {rhs}, {dimension})"),
            TensorFunction::Softmax {
                argument,
                dimension,
            } => write!(f, "softmax({argument}, {dimension})"),
            TensorFunction::XwPlusB { x, w, b, dimension } => {
                write!(f, "xw_plus_b({x}, {w}, {b}, {dimension})")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::MapContext;
    use crate::value::Address;

    fn ty(spec: &str) -> TensorType {
        TensorType::from_spec(spec).unwrap()
    }

    fn dense(spec: &str, values: &[f64]) -> Tensor {
        Tensor::from_dense(ty(spec), values).unwrap()
    }

    fn var(name: &str) -> TensorFunction {
        TensorFunction::variable(name)
    }

    fn every_operator() -> Vec<TensorFunction> {
        vec![
            var("x"),
            TensorFunction::constant(Tensor::scalar(1.0)),
            TensorFunction::dynamic(
                DynamicTensor::indexed(TensorType::scalar(), vec![ScalarFunction::constant(2.0)])
                    .unwrap(),
            ),
            TensorFunction::rename(var("x"), vec!["a".into()], vec!["b".into()]).unwrap(),
            TensorFunction::join(var("x"), var("y"), JoinFunction::Add),
            TensorFunction::reduce(var("x"), Aggregator::Sum, vec![]),
            TensorFunction::map(var("x"), MapFunction::Exp),
            TensorFunction::matmul(var("x"), var("y"), "k"),
            TensorFunction::softmax(var("x"), "k"),
            TensorFunction::xw_plus_b(var("x"), var("w"), var("b"), "k"),
        ]
    }

    #[test]
    fn test_with_arguments_checks_arity() {
        for f in every_operator() {
            let arity = f.arity();
            let args: Vec<_> = f.arguments().into_iter().cloned().collect();
            assert_eq!(args.len(), arity);
            assert_eq!(f.with_arguments(args).unwrap(), f);

            let too_many = vec![var("z"); arity + 1];
            assert_eq!(
                f.with_arguments(too_many),
                Err(FunctionError::Arity {
                    operator: f.operator_name(),
                    expected: arity,
                    got: arity + 1,
                })
            );
            if arity > 0 {
                assert!(matches!(
                    f.with_arguments(Vec::new()),
                    Err(FunctionError::Arity { got: 0, .. })
                ));
            }
        }
    }

    #[test]
    fn test_with_arguments_substitutes() {
        let f = TensorFunction::join(var("x"), var("y"), JoinFunction::Add);
        let g = f.with_arguments(vec![var("p"), var("q")]).unwrap();
        assert_eq!(g.to_string(), "join(p, q, f(a,b)(a + b))");
        // original untouched
        assert_eq!(f.to_string(), "join(x, y, f(a,b)(a + b))");
    }

    #[test]
    fn test_rename_lengths_must_match() {
        let err = TensorFunction::rename(var("x"), vec!["a".into()], vec![]).unwrap_err();
        assert!(matches!(err, FunctionError::Type(TypeError::RenameLength { .. })));
    }

    #[test]
    fn test_matmul_type_and_value() {
        let f = TensorFunction::matmul(var("a"), var("b"), "k");
        let ctx = MapContext::new()
            .with("a", dense("tensor(i[2],k[2])", &[1.0, 2.0, 3.0, 4.0]))
            .with("b", dense("tensor(j[1],k[2])", &[10.0, 100.0]));
        assert_eq!(f.ty(&ctx).unwrap().to_string(), "tensor(i[2],j[1])");

        let value = f.evaluate(&ctx).unwrap();
        assert_eq!(value.get(&Address::indexed(&[0, 0])), Some(210.0));
        assert_eq!(value.get(&Address::indexed(&[1, 0])), Some(430.0));
        assert_eq!(f.to_primitive().evaluate(&ctx).unwrap(), value);
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let f = TensorFunction::softmax(var("a"), "x");
        let ctx = MapContext::new().with("a", dense("tensor(x[3])", &[1.0, 2.0, 3.0]));
        let value = f.evaluate(&ctx).unwrap();
        let total: f64 = value.cells().map(|(_, v)| v).sum();
        assert!((total - 1.0).abs() < 1e-12);
        assert_eq!(f.to_primitive().evaluate(&ctx).unwrap(), value);
    }

    #[test]
    fn test_xw_plus_b() {
        let f = TensorFunction::xw_plus_b(var("x"), var("w"), var("b"), "k");
        let ctx = MapContext::new()
            .with("x", dense("tensor(k[2])", &[1.0, 2.0]))
            .with("w", dense("tensor(k[2],n[2])", &[1.0, 0.0, 0.0, 1.0]))
            .with("b", dense("tensor(n[2])", &[0.5, -0.5]));
        let value = f.evaluate(&ctx).unwrap();
        assert_eq!(value.ty().to_string(), "tensor(n[2])");
        assert_eq!(value.get_by_direct_index(0), Some(1.5));
        assert_eq!(value.get_by_direct_index(1), Some(1.5));
        assert_eq!(
            f.to_primitive().to_string(),
            "join(reduce(join(x, w, f(a,b)(a * b)), sum, k), b, f(a,b)(a + b))"
        );
    }

    #[test]
    fn test_to_primitive_idempotent() {
        for f in every_operator() {
            let once = f.to_primitive();
            assert!(once.is_primitive_tree());
            assert_eq!(once.to_primitive(), once);
        }
    }

    #[test]
    fn test_variable_errors_do_not_poison_tree() {
        let f = TensorFunction::map(
            TensorFunction::typed_variable("x", ty("tensor(d0[2])")),
            MapFunction::Neg,
        );
        assert_eq!(
            f.evaluate(&MapContext::new()),
            Err(FunctionError::UnboundVariable("x".into()))
        );
        let wrong = MapContext::new().with("x", dense("tensor(d0[3])", &[1.0, 2.0, 3.0]));
        assert!(matches!(
            f.evaluate(&wrong),
            Err(FunctionError::VariableTypeMismatch { .. })
        ));
        let right = MapContext::new().with("x", dense("tensor(d0[2])", &[1.0, 2.0]));
        assert_eq!(f.evaluate(&right).unwrap().get_by_direct_index(1), Some(-2.0));
    }

    #[test]
    fn test_type_errors() {
        let ctx = MapContext::new()
            .with("a", dense("tensor(x[2])", &[1.0, 2.0]))
            .with("b", dense("tensor(x[3])", &[1.0, 2.0, 3.0]));
        let join = TensorFunction::join(var("a"), var("b"), JoinFunction::Add);
        assert!(matches!(
            join.ty(&ctx),
            Err(FunctionError::Type(TypeError::IncompatibleDimensions { .. }))
        ));
        let softmax = TensorFunction::softmax(var("a"), "nope");
        assert!(matches!(
            softmax.ty(&ctx),
            Err(FunctionError::Type(TypeError::UnknownDimension { .. }))
        ));
    }

    #[test]
    fn test_rendering() {
        let f = TensorFunction::rename(
            TensorFunction::reduce(var("x"), Aggregator::Max, vec!["d0".into(), "d1".into()]),
            vec!["a".into(), "b".into()],
            vec!["c".into(), "d".into()],
        )
        .unwrap();
        assert_eq!(f.to_string(), "rename(reduce(x, max, d0, d1), (a, b), (c, d))");
        assert_eq!(
            TensorFunction::named_constant("weights", Tensor::scalar(1.0)).to_string(),
            "constant(weights)"
        );
        assert_eq!(
            TensorFunction::constant(Tensor::scalar(1.5)).to_string(),
            "tensor():{1.5}"
        );
    }

    #[test]
    fn test_variables_and_constness() {
        let f = TensorFunction::xw_plus_b(
            var("x"),
            TensorFunction::constant(Tensor::scalar(2.0)),
            var("x"),
            "k",
        );
        assert_eq!(f.variables(), vec!["x"]);
        assert!(!f.is_constant());
        let g = TensorFunction::map(TensorFunction::constant(Tensor::scalar(2.0)), MapFunction::Neg);
        assert!(g.is_constant());
        assert_eq!(g.evaluate(&MapContext::new()).unwrap().as_scalar(), Some(-2.0));
    }
}
