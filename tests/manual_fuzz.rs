//! Quick manual fuzzer - run with: cargo test --release manual_fuzz -- --ignored --nocapture

use axisflow::{
    Aggregator, GraphBuilder, ImportConfig, JoinFunction, MapContext, MapFunction, OpId,
    OperationKind, Tensor, TensorType,
};
use axisflow::ordered::standard_name;
use rand::prelude::*;
use std::time::Instant;

fn random_ascii_string(rng: &mut impl Rng, len: usize) -> String {
    (0..len).map(|_| rng.random_range(0x20u8..0x7F) as char).collect()
}

fn random_spec_like(rng: &mut impl Rng) -> String {
    let pieces = ["tensor", "(", ")", "[", "]", "{", "}", ",", "x", "d0", "key", "3", "12", " "];
    let mut s = String::new();
    let len = rng.random_range(1..40);
    for _ in 0..len {
        s.push_str(pieces.choose(rng).unwrap());
    }
    s
}

#[test]
#[ignore]
fn manual_fuzz_type_spec() {
    let mut rng = rand::rng();
    let start = Instant::now();
    let mut count = 0;
    let mut errors = 0;

    while start.elapsed().as_secs() < 10 {
        let len = rng.random_range(1usize..100);
        let input = if rng.random_bool(0.5) {
            random_ascii_string(&mut rng, len)
        } else {
            random_spec_like(&mut rng)
        };

        // Parsing must never panic, and whatever parses must render back
        let result = std::panic::catch_unwind(|| {
            if let Ok(ty) = TensorType::from_spec(&input) {
                assert_eq!(TensorType::from_spec(&ty.to_string()).unwrap(), ty);
            }
        });

        if result.is_err() {
            eprintln!("PANIC on input: {:?}", input);
            errors += 1;
        }
        count += 1;
    }

    eprintln!("Ran {} iterations, {} panics", count, errors);
    assert_eq!(errors, 0, "Spec parser panicked on some inputs!");
}

fn random_shape(rng: &mut impl Rng) -> Vec<usize> {
    (0..rng.random_range(0..4))
        .map(|_| rng.random_range(1..4))
        .collect()
}

fn random_kind(rng: &mut impl Rng) -> OperationKind {
    match rng.random_range(0..6) {
        0 => OperationKind::Map(*[MapFunction::Neg, MapFunction::Relu, MapFunction::Tanh].choose(rng).unwrap()),
        1 => OperationKind::Join(*[JoinFunction::Add, JoinFunction::Multiply, JoinFunction::Max].choose(rng).unwrap()),
        2 => OperationKind::Reduce {
            aggregator: *[Aggregator::Sum, Aggregator::Max, Aggregator::Avg].choose(rng).unwrap(),
            axes: (0..rng.random_range(0..3)).map(|_| rng.random_range(0..4)).collect(),
        },
        3 => OperationKind::MatMul,
        4 => OperationKind::Softmax {
            axis: rng.random_range(0..4),
        },
        _ => OperationKind::Dense,
    }
}

/// A random graph: some inputs and constants, then operations over random
/// earlier nodes. Most candidate operations are ill-shaped and get rejected.
fn random_graph(rng: &mut impl Rng) -> (GraphBuilder, Vec<(String, Vec<usize>)>) {
    let mut g = GraphBuilder::new("fuzz");
    let mut nodes: Vec<OpId> = Vec::new();
    let mut inputs = Vec::new();

    for i in 0..rng.random_range(1..4) {
        let shape = random_shape(rng);
        let name = format!("in{i}");
        let declared: Vec<Option<usize>> = shape
            .iter()
            .map(|&n| if rng.random_bool(0.3) { None } else { Some(n) })
            .collect();
        if let Ok(id) = g.argument(&name, &declared) {
            nodes.push(id);
            inputs.push((name, shape));
        }
    }
    for i in 0..rng.random_range(0..3) {
        let shape = random_shape(rng);
        let values: Vec<f64> = (0..shape.iter().product::<usize>())
            .map(|_| rng.random_range(-3..3) as f64)
            .collect();
        if let Ok(id) = g.constant(&format!("c{i}"), &shape, &values) {
            nodes.push(id);
        }
    }
    for i in 0..rng.random_range(1..12) {
        let kind = random_kind(rng);
        let operands: Vec<OpId> = (0..kind.operand_count())
            .map(|_| *nodes.choose(rng).unwrap())
            .collect();
        if let Ok(id) = g.add(&format!("op{i}"), kind, &operands) {
            nodes.push(id);
        }
    }
    if let Some(&last) = nodes.last() {
        let _ = g.output(last);
    }
    (g, inputs)
}

#[test]
#[ignore]
fn manual_fuzz_import() {
    let mut rng = rand::rng();
    let start = Instant::now();
    let mut count = 0;
    let mut imported = 0;
    let mut errors = 0;

    while start.elapsed().as_secs() < 20 {
        let (graph, inputs) = random_graph(&mut rng);
        let seed_values: Vec<f64> = (0..64).map(|_| rng.random_range(-2.0..2.0)).collect();

        // Import and evaluation must report errors, never panic
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let Ok(model) = graph.import(&ImportConfig::default()) else {
                return false;
            };
            let mut ctx = MapContext::new();
            for (name, shape) in &inputs {
                let spec = shape
                    .iter()
                    .enumerate()
                    .map(|(i, n)| format!("{}[{n}]", standard_name(i, shape.len())))
                    .collect::<Vec<_>>()
                    .join(",");
                let ty = TensorType::from_spec(&format!("tensor({spec})")).unwrap();
                let cells = ty.cell_count().unwrap();
                ctx.bind(name, Tensor::from_dense(ty, &seed_values[..cells]).unwrap());
            }
            for output in model.outputs.keys() {
                let _ = model.evaluate(output, &ctx);
            }
            true
        }));

        match result {
            Ok(true) => imported += 1,
            Ok(false) => {}
            Err(_) => errors += 1,
        }
        count += 1;
    }

    eprintln!("Ran {} graphs, {} imported, {} panics", count, imported, errors);
    assert_eq!(errors, 0, "Import panicked on some graphs!");
}
