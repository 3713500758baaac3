//! Scalar operators used inside join, map and reduce.

use std::fmt;

/// Binary cell function of a join.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JoinFunction {
    Add,
    Subtract,
    Multiply,
    Divide,
    Max,
    Min,
    Pow,
}

impl JoinFunction {
    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            JoinFunction::Add => a + b,
            JoinFunction::Subtract => a - b,
            JoinFunction::Multiply => a * b,
            JoinFunction::Divide => a / b,
            JoinFunction::Max => a.max(b),
            JoinFunction::Min => a.min(b),
            JoinFunction::Pow => a.powf(b),
        }
    }
}

impl fmt::Display for JoinFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = match self {
            JoinFunction::Add => "a + b",
            JoinFunction::Subtract => "a - b",
            JoinFunction::Multiply => "a * b",
            JoinFunction::Divide => "a / b",
            JoinFunction::Max => "max(a, b)",
            JoinFunction::Min => "min(a, b)",
            JoinFunction::Pow => "pow(a, b)",
        };
        write!(f, "f(a,b)({body})")
    }
}

/// Unary cell function of a map.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MapFunction {
    Neg,
    Abs,
    Exp,
    Log,
    Sqrt,
    Square,
    Relu,
    Sigmoid,
    Tanh,
}

impl MapFunction {
    pub fn apply(self, a: f64) -> f64 {
        match self {
            MapFunction::Neg => -a,
            MapFunction::Abs => a.abs(),
            MapFunction::Exp => a.exp(),
            MapFunction::Log => a.ln(),
            MapFunction::Sqrt => a.sqrt(),
            MapFunction::Square => a * a,
            MapFunction::Relu => a.max(0.0),
            MapFunction::Sigmoid => 1.0 / (1.0 + (-a).exp()),
            MapFunction::Tanh => a.tanh(),
        }
    }
}

impl fmt::Display for MapFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = match self {
            MapFunction::Neg => "-a",
            MapFunction::Abs => "abs(a)",
            MapFunction::Exp => "exp(a)",
            MapFunction::Log => "log(a)",
            MapFunction::Sqrt => "sqrt(a)",
            MapFunction::Square => "a * a",
            MapFunction::Relu => "max(0, a)",
            MapFunction::Sigmoid => "1 / (1 + exp(-a))",
            MapFunction::Tanh => "tanh(a)",
        };
        write!(f, "f(a)({body})")
    }
}

/// Aggregation of a reduce.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Aggregator {
    Sum,
    Prod,
    Max,
    Min,
    Avg,
    Count,
}

impl Aggregator {
    /// Aggregate a group of cells. An empty group aggregates to 0.
    pub fn aggregate(self, values: &[f64]) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        match self {
            Aggregator::Sum => values.iter().sum(),
            Aggregator::Prod => values.iter().product(),
            Aggregator::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Aggregator::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Aggregator::Avg => values.iter().sum::<f64>() / values.len() as f64,
            Aggregator::Count => values.len() as f64,
        }
    }
}

impl fmt::Display for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Aggregator::Sum => "sum",
            Aggregator::Prod => "prod",
            Aggregator::Max => "max",
            Aggregator::Min => "min",
            Aggregator::Avg => "avg",
            Aggregator::Count => "count",
        };
        f.write_str(name)
    }
}
