//! Evaluation kernels for the primitive operators.
//!
//! All kernels take materialized tensors and return a new one; nothing is
//! mutated in place.

use std::collections::{BTreeMap, HashMap};

use crate::types::TensorType;
use crate::value::{Address, Label, Tensor};

use super::scalar::{Aggregator, JoinFunction, MapFunction};
use super::FunctionError;

/// Where a result label comes from in a join.
#[derive(Clone, Copy)]
enum Source {
    Left(usize),
    Right(usize),
}

/// Rename dimensions, re-ordering labels to the new name order.
pub(crate) fn rename(
    tensor: &Tensor,
    from: &[String],
    to: &[String],
) -> Result<Tensor, FunctionError> {
    let old = tensor.ty();
    let ty = old.rename(from, to)?;
    let permute = ty
        .dimension_names()
        .map(|new_name| {
            let old_name = match to.iter().position(|t| t == new_name) {
                Some(k) => from[k].as_str(),
                None => new_name,
            };
            old.index_of(old_name).ok_or_else(|| old.unknown(old_name))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(tensor.relabel(ty, &permute))
}

/// Join two tensors: combine every pair of cells that agree on shared dimensions.
///
/// Hash join keyed on the shared labels of the right-hand side.
pub(crate) fn join(lhs: &Tensor, rhs: &Tensor, op: JoinFunction) -> Result<Tensor, FunctionError> {
    let ty = lhs.ty().join(rhs.ty())?;
    let (lt, rt) = (lhs.ty(), rhs.ty());

    let mut left_keys = Vec::new();
    let mut right_keys = Vec::new();
    for (i, name) in lt.dimension_names().enumerate() {
        if let Some(j) = rt.index_of(name) {
            left_keys.push(i);
            right_keys.push(j);
        }
    }

    let sources = result_sources(&ty, lt, rt)?;

    let mut table: HashMap<Vec<&Label>, Vec<(&Address, f64)>> = HashMap::new();
    for (address, value) in rhs.cells() {
        let key = right_keys.iter().map(|&j| &address.0[j]).collect();
        table.entry(key).or_default().push((address, value));
    }

    let mut cells = BTreeMap::new();
    for (left, lv) in lhs.cells() {
        let key: Vec<&Label> = left_keys.iter().map(|&i| &left.0[i]).collect();
        let Some(matches) = table.get(&key) else {
            continue;
        };
        for (right, rv) in matches {
            let labels = sources
                .iter()
                .map(|source| match *source {
                    Source::Left(i) => left.0[i].clone(),
                    Source::Right(j) => right.0[j].clone(),
                })
                .collect();
            cells.insert(Address(labels), op.apply(lv, *rv));
        }
    }
    Ok(Tensor::from_cells(ty, cells))
}

fn result_sources(
    ty: &TensorType,
    lt: &TensorType,
    rt: &TensorType,
) -> Result<Vec<Source>, FunctionError> {
    ty.dimension_names()
        .map(|name| match (lt.index_of(name), rt.index_of(name)) {
            (Some(i), _) => Ok(Source::Left(i)),
            (None, Some(j)) => Ok(Source::Right(j)),
            (None, None) => Err(ty.unknown(name).into()),
        })
        .collect()
}

/// Reduce away `dims` (all dimensions when empty), aggregating each group.
pub(crate) fn reduce(
    tensor: &Tensor,
    aggregator: Aggregator,
    dims: &[String],
) -> Result<Tensor, FunctionError> {
    let old = tensor.ty();
    let ty = old.reduce(dims)?;
    let keep = ty
        .dimension_names()
        .map(|name| old.index_of(name).ok_or_else(|| old.unknown(name)))
        .collect::<Result<Vec<_>, _>>()?;

    let mut groups: BTreeMap<Address, Vec<f64>> = BTreeMap::new();
    for (address, value) in tensor.cells() {
        let key = Address(keep.iter().map(|&i| address.0[i].clone()).collect());
        groups.entry(key).or_default().push(value);
    }
    if groups.is_empty() && ty.is_scalar() {
        groups.insert(Address::empty(), Vec::new());
    }

    let cells = groups
        .into_iter()
        .map(|(address, values)| (address, aggregator.aggregate(&values)))
        .collect();
    Ok(Tensor::from_cells(ty, cells))
}

/// Apply a unary function to every cell.
pub(crate) fn map(tensor: &Tensor, op: MapFunction) -> Tensor {
    let cells = tensor
        .cells()
        .map(|(address, value)| (address.clone(), op.apply(value)))
        .collect();
    Tensor::from_cells(tensor.ty().clone(), cells)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dense(spec: &str, values: &[f64]) -> Tensor {
        Tensor::from_dense(TensorType::from_spec(spec).unwrap(), values).unwrap()
    }

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_join_broadcasts_over_missing_dims() {
        let x = dense("tensor(x[2])", &[1.0, 2.0]);
        let y = dense("tensor(y[3])", &[10.0, 20.0, 30.0]);
        let r = join(&x, &y, JoinFunction::Multiply).unwrap();
        assert_eq!(r.ty().to_string(), "tensor(x[2],y[3])");
        assert_eq!(r.len(), 6);
        assert_eq!(r.get(&Address::indexed(&[1, 2])), Some(60.0));
    }

    #[test]
    fn test_join_aligns_shared_dims() {
        let a = dense("tensor(x[2],y[2])", &[1.0, 2.0, 3.0, 4.0]);
        let b = dense("tensor(y[2])", &[10.0, 100.0]);
        let r = join(&a, &b, JoinFunction::Add).unwrap();
        assert_eq!(r.get(&Address::indexed(&[0, 0])), Some(11.0));
        assert_eq!(r.get(&Address::indexed(&[0, 1])), Some(102.0));
        assert_eq!(r.get(&Address::indexed(&[1, 1])), Some(104.0));
    }

    #[test]
    fn test_reduce() {
        let a = dense("tensor(x[2],y[3])", &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let rows = reduce(&a, Aggregator::Sum, &names(&["y"])).unwrap();
        assert_eq!(rows.ty().to_string(), "tensor(x[2])");
        assert_eq!(rows.get(&Address::indexed(&[0])), Some(6.0));
        assert_eq!(rows.get(&Address::indexed(&[1])), Some(15.0));

        let all = reduce(&a, Aggregator::Max, &[]).unwrap();
        assert_eq!(all.as_scalar(), Some(6.0));
    }

    #[test]
    fn test_reduce_empty_to_scalar_zero() {
        let empty = Tensor::empty(TensorType::from_spec("tensor(k{})").unwrap());
        let r = reduce(&empty, Aggregator::Sum, &[]).unwrap();
        assert_eq!(r.as_scalar(), Some(0.0));
    }

    #[test]
    fn test_rename_reorders_labels() {
        // (a, b) renamed to (z, c): label order must follow the new name order (c, z)
        let t = dense("tensor(a[2],b[3])", &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        let r = rename(&t, &names(&["a", "b"]), &names(&["z", "c"])).unwrap();
        assert_eq!(r.ty().to_string(), "tensor(c[3],z[2])");
        // old {a:1, b:2} = 5.0 is new {c:2, z:1}
        assert_eq!(r.get(&Address::indexed(&[2, 1])), Some(5.0));
    }

    #[test]
    fn test_map() {
        let t = dense("tensor(x[2])", &[-1.0, 2.0]);
        let r = map(&t, MapFunction::Relu);
        assert_eq!(r.get(&Address::indexed(&[0])), Some(0.0));
        assert_eq!(r.get(&Address::indexed(&[1])), Some(2.0));
    }
}
