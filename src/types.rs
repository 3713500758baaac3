//! Tensor types with named dimensions.
//!
//! A [`TensorType`] is a set of named [`Dimension`]s. The set is kept sorted by
//! name, so two types with the same dimensions compare equal no matter the
//! order they were declared in. Positional order, when it matters (imported
//! graphs), lives in [`crate::ordered::OrderedTensorType`].
//!
//! Textual form:
//!
//! ```text
//! tensor()              scalar
//! tensor(x[3])          indexed, bound to size 3
//! tensor(batch[],x[3])  indexed unbound + indexed bound
//! tensor(key{})         mapped
//! ```

use std::fmt;

use chumsky::prelude::*;
use itertools::Itertools;

/// How a dimension is addressed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DimensionKind {
    /// Sparse, addressed by string labels
    Mapped,
    /// Dense with a fixed size
    IndexedBound(usize),
    /// Dense with a size only known from the value
    IndexedUnbound,
}

impl DimensionKind {
    pub fn is_indexed(self) -> bool {
        !matches!(self, DimensionKind::Mapped)
    }

    pub fn size(self) -> Option<usize> {
        match self {
            DimensionKind::IndexedBound(size) => Some(size),
            _ => None,
        }
    }
}

/// One named axis of a tensor.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Dimension {
    pub name: String,
    pub kind: DimensionKind,
}

impl Dimension {
    pub fn new(name: impl Into<String>, kind: DimensionKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn mapped(name: impl Into<String>) -> Self {
        Self::new(name, DimensionKind::Mapped)
    }

    pub fn indexed(name: impl Into<String>, size: usize) -> Self {
        Self::new(name, DimensionKind::IndexedBound(size))
    }

    pub fn indexed_unbound(name: impl Into<String>) -> Self {
        Self::new(name, DimensionKind::IndexedUnbound)
    }

    pub fn size(&self) -> Option<usize> {
        self.kind.size()
    }

    /// The same dimension under another name.
    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self::new(name, self.kind)
    }

    /// Combine two same-named dimensions (join semantics).
    ///
    /// Bound wins over unbound; everything else must agree exactly.
    fn combine(&self, other: &Dimension) -> Result<Dimension, TypeError> {
        use DimensionKind::*;
        let kind = match (self.kind, other.kind) {
            (a, b) if a == b => a,
            (IndexedBound(n), IndexedUnbound) | (IndexedUnbound, IndexedBound(n)) => IndexedBound(n),
            _ => {
                return Err(TypeError::IncompatibleDimensions {
                    left: self.clone(),
                    right: other.clone(),
                })
            }
        };
        Ok(Dimension::new(self.name.clone(), kind))
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DimensionKind::Mapped => write!(f, "{}{{}}", self.name),
            DimensionKind::IndexedBound(size) => write!(f, "{}[{}]", self.name, size),
            DimensionKind::IndexedUnbound => write!(f, "{}[]", self.name),
        }
    }
}

/// Errors building or combining tensor types.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TypeError {
    #[error("dimension '{0}' appears more than once")]
    DuplicateDimension(String),

    #[error("cannot combine dimensions {left} and {right}")]
    IncompatibleDimensions { left: Dimension, right: Dimension },

    #[error("dimension '{name}' is not in {ty}")]
    UnknownDimension { name: String, ty: String },

    #[error("rename lists differ in length: {from} names to {to} names")]
    RenameLength { from: usize, to: usize },

    #[error("invalid tensor type spec: {0}")]
    Parse(String),

    #[error("{0} has more cells than fit in memory addressing")]
    TooManyCells(String),
}

/// A tensor type: a duplicate-free set of named dimensions.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct TensorType {
    /// Sorted by name
    dims: Vec<Dimension>,
}

impl TensorType {
    /// Build a type, sorting dimensions by name.
    pub fn new(dims: impl IntoIterator<Item = Dimension>) -> Result<Self, TypeError> {
        let mut dims: Vec<Dimension> = dims.into_iter().collect();
        dims.sort_by(|a, b| a.name.cmp(&b.name));
        if let Some((a, _)) = dims.iter().tuple_windows().find(|(a, b)| a.name == b.name) {
            return Err(TypeError::DuplicateDimension(a.name.clone()));
        }
        Ok(Self { dims })
    }

    /// The type of a single number.
    pub fn scalar() -> Self {
        Self::default()
    }

    /// Parse the textual form, e.g. `tensor(batch[],x[3],key{})`.
    pub fn from_spec(spec: &str) -> Result<Self, TypeError> {
        let dims = spec_parser().parse(spec).map_err(|errs| {
            TypeError::Parse(
                errs.iter()
                    .map(|e| format!("{} at {:?}", e, e.span()))
                    .join("; "),
            )
        })?;
        Self::new(dims)
    }

    /// Dimensions in name order.
    pub fn dimensions(&self) -> &[Dimension] {
        &self.dims
    }

    pub fn dimension_names(&self) -> impl Iterator<Item = &str> {
        self.dims.iter().map(|d| d.name.as_str())
    }

    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.index_of(name).map(|i| &self.dims[i])
    }

    /// Position of a dimension in name order.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.dims
            .binary_search_by(|d| d.name.as_str().cmp(name))
            .ok()
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }

    /// True when every dimension is indexed with a fixed size.
    pub fn is_indexed_bound(&self) -> bool {
        self.dims
            .iter()
            .all(|d| matches!(d.kind, DimensionKind::IndexedBound(_)))
    }

    /// Number of addressable cells, if the type is fully indexed-bound and
    /// the count fits in a `usize`.
    pub fn cell_count(&self) -> Option<usize> {
        self.checked_cell_count().ok().flatten()
    }

    /// Like [`TensorType::cell_count`], but a count that overflows is an error
    /// rather than `None`.
    pub fn checked_cell_count(&self) -> Result<Option<usize>, TypeError> {
        let Some(sizes) = self.dims.iter().map(Dimension::size).collect::<Option<Vec<_>>>() else {
            return Ok(None);
        };
        sizes
            .into_iter()
            .try_fold(1usize, usize::checked_mul)
            .map(Some)
            .ok_or_else(|| TypeError::TooManyCells(self.to_string()))
    }

    /// Whether a value of this type can be used where `other` is expected.
    ///
    /// Same names and kinds, except a bound dimension may fill an unbound one.
    pub fn is_assignable_to(&self, other: &TensorType) -> bool {
        self.rank() == other.rank()
            && self.dims.iter().zip(&other.dims).all(|(mine, theirs)| {
                mine.name == theirs.name
                    && (mine.kind == theirs.kind
                        || (theirs.kind == DimensionKind::IndexedUnbound && mine.kind.is_indexed()))
            })
    }

    /// The type of joining two tensors: the union of their dimensions.
    pub fn join(&self, other: &TensorType) -> Result<TensorType, TypeError> {
        let mut dims = Vec::with_capacity(self.rank() + other.rank());
        for merged in self
            .dims
            .iter()
            .merge_join_by(other.dims.iter(), |a, b| a.name.cmp(&b.name))
        {
            match merged {
                itertools::EitherOrBoth::Both(a, b) => dims.push(a.combine(b)?),
                itertools::EitherOrBoth::Left(d) | itertools::EitherOrBoth::Right(d) => {
                    dims.push(d.clone())
                }
            }
        }
        Ok(TensorType { dims })
    }

    /// The type after reducing away `names`; an empty list reduces everything.
    pub fn reduce(&self, names: &[String]) -> Result<TensorType, TypeError> {
        if names.is_empty() {
            return Ok(TensorType::scalar());
        }
        for name in names {
            if self.dimension(name).is_none() {
                return Err(self.unknown(name));
            }
        }
        Ok(TensorType {
            dims: self
                .dims
                .iter()
                .filter(|d| !names.contains(&d.name))
                .cloned()
                .collect(),
        })
    }

    /// Rename dimensions pairwise, `from[i]` to `to[i]`.
    pub fn rename(&self, from: &[String], to: &[String]) -> Result<TensorType, TypeError> {
        if from.len() != to.len() {
            return Err(TypeError::RenameLength {
                from: from.len(),
                to: to.len(),
            });
        }
        for name in from {
            if self.dimension(name).is_none() {
                return Err(self.unknown(name));
            }
        }
        TensorType::new(self.dims.iter().map(|d| {
            match from.iter().position(|f| *f == d.name) {
                Some(i) => d.with_name(to[i].clone()),
                None => d.clone(),
            }
        }))
    }

    pub(crate) fn unknown(&self, name: &str) -> TypeError {
        TypeError::UnknownDimension {
            name: name.to_string(),
            ty: self.to_string(),
        }
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tensor({})", self.dims.iter().join(","))
    }
}

fn spec_parser() -> impl Parser<char, Vec<Dimension>, Error = Simple<char>> {
    let size = text::int(10).try_map(|digits: String, span| {
        digits
            .parse::<usize>()
            .map_err(|e| Simple::custom(span, e.to_string()))
    });

    let indexed = size
        .or_not()
        .delimited_by(just('['), just(']'))
        .map(|size| match size {
            Some(n) => DimensionKind::IndexedBound(n),
            None => DimensionKind::IndexedUnbound,
        });
    let mapped = just('{').then(just('}')).to(DimensionKind::Mapped);

    let dimension = text::ident()
        .then(indexed.or(mapped))
        .padded()
        .map(|(name, kind)| Dimension::new(name, kind));

    text::keyword("tensor")
        .ignore_then(
            dimension
                .separated_by(just(','))
                .delimited_by(just('('), just(')')),
        )
        .padded()
        .then_ignore(end())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ty(spec: &str) -> TensorType {
        TensorType::from_spec(spec).unwrap()
    }

    #[test]
    fn test_dimensions_sorted_by_name() {
        let t = TensorType::new(vec![Dimension::indexed("y", 2), Dimension::mapped("x")]).unwrap();
        assert_eq!(t.dimension_names().collect::<Vec<_>>(), vec!["x", "y"]);
        assert_eq!(t.to_string(), "tensor(x{},y[2])");
    }

    #[test]
    fn test_duplicate_dimension_rejected() {
        let err = TensorType::new(vec![Dimension::indexed("x", 2), Dimension::mapped("x")]);
        assert_eq!(err, Err(TypeError::DuplicateDimension("x".to_string())));
    }

    #[test]
    fn test_parse_spec() {
        let t = ty("tensor(batch[], x[3], key{})");
        assert_eq!(t.rank(), 3);
        assert_eq!(t.dimension("batch").unwrap().kind, DimensionKind::IndexedUnbound);
        assert_eq!(t.dimension("x").unwrap().kind, DimensionKind::IndexedBound(3));
        assert_eq!(t.dimension("key").unwrap().kind, DimensionKind::Mapped);
        assert_eq!(ty("tensor()"), TensorType::scalar());
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(TensorType::from_spec("tensor(x[3)"), Err(TypeError::Parse(_))));
        assert!(matches!(TensorType::from_spec("matrix(x[3])"), Err(TypeError::Parse(_))));
        assert!(matches!(
            TensorType::from_spec("tensor(x[3],x[2])"),
            Err(TypeError::DuplicateDimension(_))
        ));
    }

    #[test]
    fn test_cell_count() {
        assert_eq!(ty("tensor(x[3],y[4])").cell_count(), Some(12));
        assert_eq!(ty("tensor()").cell_count(), Some(1));
        assert_eq!(ty("tensor(x[3],y[])").cell_count(), None);
        assert_eq!(ty("tensor(x[3],k{})").cell_count(), None);
    }

    #[test]
    fn test_cell_count_overflow() {
        let huge = ty("tensor(a[4294967296],b[4294967296],c[4294967296])");
        assert_eq!(huge.cell_count(), None);
        assert!(matches!(huge.checked_cell_count(), Err(TypeError::TooManyCells(_))));
        // Not fully bound, so there is no count to overflow
        let open = ty("tensor(a[4294967296],b[4294967296],c[4294967296],d[])");
        assert_eq!(open.checked_cell_count(), Ok(None));
    }

    #[test]
    fn test_join_types() {
        let joined = ty("tensor(x[3],y[])").join(&ty("tensor(y[2],z{})")).unwrap();
        assert_eq!(joined, ty("tensor(x[3],y[2],z{})"));

        let err = ty("tensor(x[3])").join(&ty("tensor(x[4])"));
        assert!(matches!(err, Err(TypeError::IncompatibleDimensions { .. })));

        let err = ty("tensor(x[3])").join(&ty("tensor(x{})"));
        assert!(matches!(err, Err(TypeError::IncompatibleDimensions { .. })));
    }

    #[test]
    fn test_reduce_type() {
        let t = ty("tensor(x[3],y[2])");
        assert_eq!(t.reduce(&["x".to_string()]).unwrap(), ty("tensor(y[2])"));
        assert_eq!(t.reduce(&[]).unwrap(), TensorType::scalar());
        assert!(matches!(
            t.reduce(&["z".to_string()]),
            Err(TypeError::UnknownDimension { .. })
        ));
    }

    #[test]
    fn test_rename_type() {
        let t = ty("tensor(x[3],y[2])");
        let renamed = t.rename(&["x".to_string()], &["z".to_string()]).unwrap();
        assert_eq!(renamed, ty("tensor(y[2],z[3])"));

        let collision = t.rename(&["x".to_string()], &["y".to_string()]);
        assert_eq!(collision, Err(TypeError::DuplicateDimension("y".to_string())));
    }

    #[test]
    fn test_assignable() {
        assert!(ty("tensor(x[3])").is_assignable_to(&ty("tensor(x[])")));
        assert!(!ty("tensor(x[])").is_assignable_to(&ty("tensor(x[3])")));
        assert!(!ty("tensor(x{})").is_assignable_to(&ty("tensor(x[])")));
        assert!(!ty("tensor(x[3])").is_assignable_to(&ty("tensor(y[3])")));
    }
}
