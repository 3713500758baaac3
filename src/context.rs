//! Evaluation and type contexts.
//!
//! A context is supplied fresh for every call and only borrowed for its
//! duration; nothing in a function tree holds on to one.

use indexmap::IndexMap;

use crate::types::TensorType;
use crate::value::Tensor;

/// Resolves variable names to types during static type inference.
pub trait TypeContext {
    fn type_of(&self, name: &str) -> Option<TensorType>;
}

/// Resolves variable names to values during evaluation.
pub trait EvaluationContext: TypeContext {
    fn tensor(&self, name: &str) -> Option<&Tensor>;
}

/// A context backed by an insertion-ordered map of bindings.
#[derive(Clone, Debug, Default)]
pub struct MapContext {
    bindings: IndexMap<String, Tensor>,
    types: IndexMap<String, TensorType>,
}

impl MapContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a value to a name, replacing any earlier binding.
    pub fn bind(&mut self, name: impl Into<String>, value: Tensor) -> &mut Self {
        self.bindings.insert(name.into(), value);
        self
    }

    /// Builder-style [`MapContext::bind`].
    pub fn with(mut self, name: impl Into<String>, value: Tensor) -> Self {
        self.bind(name, value);
        self
    }

    /// Declare a type without a value, for type inference only.
    pub fn declare(&mut self, name: impl Into<String>, ty: TensorType) -> &mut Self {
        self.types.insert(name.into(), ty);
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings
            .keys()
            .chain(self.types.keys().filter(|k| !self.bindings.contains_key(*k)))
            .map(String::as_str)
    }
}

impl TypeContext for MapContext {
    fn type_of(&self, name: &str) -> Option<TensorType> {
        self.bindings
            .get(name)
            .map(|t| t.ty().clone())
            .or_else(|| self.types.get(name).cloned())
    }
}

impl EvaluationContext for MapContext {
    fn tensor(&self, name: &str) -> Option<&Tensor> {
        self.bindings.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bindings_shadow_declarations() {
        let mut ctx = MapContext::new();
        ctx.declare("x", TensorType::from_spec("tensor(d0[])").unwrap());
        assert_eq!(ctx.type_of("x").unwrap().to_string(), "tensor(d0[])");
        assert!(ctx.tensor("x").is_none());

        ctx.bind("x", Tensor::scalar(1.0));
        assert_eq!(ctx.type_of("x"), Some(TensorType::scalar()));
        assert_eq!(ctx.tensor("x").and_then(Tensor::as_scalar), Some(1.0));
        assert_eq!(ctx.names().collect::<Vec<_>>(), vec!["x"]);
        assert!(ctx.type_of("y").is_none());
    }
}
