//! Deterministic built-in algorithms.
//!
//! Series-typed algorithms accept either a bare JSON array of numbers or an
//! object with a `series` array plus optional parameters, so that the output
//! of one series algorithm can feed the next in a chain.

/// Correlation-based causal discovery and intervention effects.
pub mod causal;
/// K-means over one-dimensional data.
pub mod clustering;
/// Hurst exponent and multi-scale self-similarity.
pub mod fractal;
/// Online gradient descent and Gaussian naive Bayes.
pub mod learning;
/// Structural pattern mining over arbitrary JSON.
pub mod patterns;
/// Least-squares trend forecasting.
pub mod regression;
/// Additive trend and seasonal decomposition.
pub mod seasonal;
/// Moving average and exponential smoothing.
pub mod smoothing;
/// Summary statistics and z-score normalization.
pub mod stats;

pub use causal::{CausalInference, InterventionAnalyzer};
pub use clustering::KMeans;
pub use fractal::FractalAnalyzer;
pub use learning::{NaiveBayes, OnlineGradientDescent};
pub use patterns::PatternMiner;
pub use regression::{LinearRegression, PolynomialRegression};
pub use seasonal::SeasonalDecomposition;
pub use smoothing::{ExponentialSmoothing, MovingAverage};
pub use stats::{DescriptiveStats, Normalize};

use crate::algorithm::{AlgorithmCategory, AlgorithmDescriptor, Executable};
use crate::catalog::AlgorithmCatalog;
use std::sync::Arc;
use vertex_core::{Payload, VertexError, VertexResult};

const MIB: u64 = 1024 * 1024;

/// Register every built-in algorithm into `catalog`.
pub fn register_builtins(catalog: &mut AlgorithmCatalog) -> VertexResult<()> {
    catalog.register_fn(
        AlgorithmDescriptor::new("moving_average", AlgorithmCategory::Predictive, "series", "series")
            .with_cost(0.1, MIB)
            .with_execution_ms(2),
        || Ok(Arc::new(MovingAverage::default()) as Arc<dyn Executable>),
    )?;
    catalog.register_fn(
        AlgorithmDescriptor::new("normalize", AlgorithmCategory::Learning, "series", "series")
            .with_cost(0.1, MIB)
            .with_execution_ms(2),
        || Ok(Arc::new(Normalize) as Arc<dyn Executable>),
    )?;
    catalog.register_fn(
        AlgorithmDescriptor::new(
            "linear_regression",
            AlgorithmCategory::Predictive,
            "series",
            "forecast",
        )
        .with_cost(0.2, 2 * MIB)
        .with_execution_ms(5),
        || Ok(Arc::new(LinearRegression) as Arc<dyn Executable>),
    )?;
    catalog.register_fn(
        AlgorithmDescriptor::new(
            "exponential_smoothing",
            AlgorithmCategory::Predictive,
            "series",
            "forecast",
        )
        .with_cost(0.1, 2 * MIB)
        .with_execution_ms(3),
        || Ok(Arc::new(ExponentialSmoothing::default()) as Arc<dyn Executable>),
    )?;
    catalog.register_fn(
        AlgorithmDescriptor::new(
            "descriptive_stats",
            AlgorithmCategory::DecisionMaking,
            "series",
            "summary",
        )
        .with_cost(0.1, MIB)
        .with_execution_ms(2),
        || Ok(Arc::new(DescriptiveStats) as Arc<dyn Executable>),
    )?;
    catalog.register_fn(
        AlgorithmDescriptor::new("kmeans", AlgorithmCategory::Learning, "series", "clusters")
            .with_cost(0.5, 8 * MIB)
            .with_execution_ms(20),
        || Ok(Arc::new(KMeans::default()) as Arc<dyn Executable>),
    )?;
    catalog.register_fn(
        AlgorithmDescriptor::new(
            "pattern_miner",
            AlgorithmCategory::Recursive,
            "any",
            "patterns",
        )
        .with_cost(0.3, 4 * MIB)
        .with_execution_ms(10),
        || Ok(Arc::new(PatternMiner::default()) as Arc<dyn Executable>),
    )?;
    catalog.register_fn(
        AlgorithmDescriptor::new(
            "polynomial_regression",
            AlgorithmCategory::Predictive,
            "series",
            "forecast",
        )
        .with_cost(0.3, 2 * MIB)
        .with_execution_ms(8),
        || Ok(Arc::new(PolynomialRegression::default()) as Arc<dyn Executable>),
    )?;
    catalog.register_fn(
        AlgorithmDescriptor::new(
            "seasonal_decomposition",
            AlgorithmCategory::Predictive,
            "series",
            "forecast",
        )
        .with_cost(0.2, 2 * MIB)
        .with_execution_ms(6),
        || Ok(Arc::new(SeasonalDecomposition::default()) as Arc<dyn Executable>),
    )?;
    catalog.register_fn(
        AlgorithmDescriptor::new(
            "online_gradient_descent",
            AlgorithmCategory::Learning,
            "samples",
            "model",
        )
        .with_cost(0.2, 2 * MIB)
        .with_execution_ms(5),
        || Ok(Arc::new(OnlineGradientDescent::default()) as Arc<dyn Executable>),
    )?;
    catalog.register_fn(
        AlgorithmDescriptor::new("naive_bayes", AlgorithmCategory::Learning, "labelled", "model")
            .with_cost(0.3, 4 * MIB)
            .with_execution_ms(10),
        || Ok(Arc::new(NaiveBayes) as Arc<dyn Executable>),
    )?;
    catalog.register_fn(
        AlgorithmDescriptor::new(
            "causal_inference",
            AlgorithmCategory::Causal,
            "variables",
            "causal_graph",
        )
        .with_cost(0.4, 4 * MIB)
        .with_execution_ms(15),
        || Ok(Arc::new(CausalInference::default()) as Arc<dyn Executable>),
    )?;
    catalog.register_fn(
        AlgorithmDescriptor::new(
            "intervention_analyzer",
            AlgorithmCategory::Causal,
            "intervention",
            "effect",
        )
        .with_cost(0.1, MIB)
        .with_execution_ms(3),
        || Ok(Arc::new(InterventionAnalyzer) as Arc<dyn Executable>),
    )?;
    catalog.register_fn(
        AlgorithmDescriptor::new(
            "fractal_analyzer",
            AlgorithmCategory::Recursive,
            "series",
            "fractal",
        )
        .with_cost(0.3, 4 * MIB)
        .with_execution_ms(12),
        || Ok(Arc::new(FractalAnalyzer) as Arc<dyn Executable>),
    )?;
    Ok(())
}

/// A catalog pre-populated with the built-ins.
pub fn builtin_catalog() -> VertexResult<AlgorithmCatalog> {
    let mut catalog = AlgorithmCatalog::new();
    register_builtins(&mut catalog)?;
    Ok(catalog)
}

/// Extract a numeric series from `input`.
pub(crate) fn series_of(algorithm: &str, input: &Payload) -> VertexResult<Vec<f64>> {
    let values = match input {
        Payload::Array(items) => items,
        Payload::Object(map) => match map.get("series") {
            Some(Payload::Array(items)) => items,
            _ => {
                return Err(VertexError::execution(
                    algorithm,
                    "expected an object with a numeric 'series' array",
                ))
            }
        },
        _ => {
            return Err(VertexError::execution(
                algorithm,
                "expected a numeric array or {\"series\": [...]}",
            ))
        }
    };
    values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            v.as_f64().ok_or_else(|| {
                VertexError::execution(algorithm, format!("series element {i} is not a number"))
            })
        })
        .collect()
}

/// Required field of an object input.
pub(crate) fn field<'a>(algorithm: &str, input: &'a Payload, name: &str) -> VertexResult<&'a Payload> {
    input
        .as_object()
        .and_then(|map| map.get(name))
        .ok_or_else(|| VertexError::execution(algorithm, format!("missing field '{name}'")))
}

/// A JSON array of numbers.
pub(crate) fn numbers(algorithm: &str, value: &Payload, name: &str) -> VertexResult<Vec<f64>> {
    let items = value
        .as_array()
        .ok_or_else(|| VertexError::execution(algorithm, format!("'{name}' must be an array")))?;
    items
        .iter()
        .enumerate()
        .map(|(i, v)| {
            v.as_f64().ok_or_else(|| {
                VertexError::execution(algorithm, format!("'{name}' element {i} is not a number"))
            })
        })
        .collect()
}

/// A rectangular JSON matrix of numbers, one row per sample.
pub(crate) fn rows(algorithm: &str, value: &Payload, name: &str) -> VertexResult<Vec<Vec<f64>>> {
    let items = value
        .as_array()
        .ok_or_else(|| VertexError::execution(algorithm, format!("'{name}' must be an array of rows")))?;
    let matrix = items
        .iter()
        .map(|row| numbers(algorithm, row, name))
        .collect::<VertexResult<Vec<_>>>()?;
    if let Some(first) = matrix.first() {
        if first.is_empty() || matrix.iter().any(|r| r.len() != first.len()) {
            return Err(VertexError::execution(
                algorithm,
                format!("'{name}' rows must be non-empty and of equal width"),
            ));
        }
    }
    Ok(matrix)
}

/// Pearson correlation over the common prefix; zero when either side is flat.
pub(crate) fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return 0.0;
    }
    let (a, b) = (&a[..n], &b[..n]);
    let (ma, mb) = (mean(a), mean(b));
    let mut cov = 0.0;
    let (mut va, mut vb) = (0.0, 0.0);
    for (x, y) in a.iter().zip(b) {
        cov += (x - ma) * (y - mb);
        va += (x - ma).powi(2);
        vb += (y - mb).powi(2);
    }
    if va == 0.0 || vb == 0.0 {
        0.0
    } else {
        cov / (va * vb).sqrt()
    }
}

/// Optional numeric parameter from an object input.
pub(crate) fn param_f64(input: &Payload, name: &str) -> Option<f64> {
    input.as_object()?.get(name)?.as_f64()
}

pub(crate) fn param_u64(input: &Payload, name: &str) -> Option<u64> {
    input.as_object()?.get(name)?.as_u64()
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Sample standard deviation (n - 1 denominator).
pub(crate) fn sample_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64).sqrt()
}

/// Population standard deviation.
pub(crate) fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}
