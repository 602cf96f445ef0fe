use super::{mean, series_of, std_dev};
use crate::algorithm::{Executable, ExecutionContext};
use async_trait::async_trait;
use serde_json::json;
use vertex_core::{Payload, VertexError, VertexResult};

/// Count, extrema, mean, median and population standard deviation.
pub struct DescriptiveStats;

#[async_trait]
impl Executable for DescriptiveStats {
    async fn execute(&self, input: Payload, ctx: &ExecutionContext) -> VertexResult<Payload> {
        let mut series = series_of("descriptive_stats", &input)?;
        if series.is_empty() {
            return Err(VertexError::execution("descriptive_stats", "empty series"));
        }
        ctx.check_cancelled("descriptive_stats")?;
        let m = mean(&series);
        let sd = std_dev(&series);
        series.sort_by(f64::total_cmp);
        let mid = series.len() / 2;
        let median = if series.len() % 2 == 0 {
            (series[mid - 1] + series[mid]) / 2.0
        } else {
            series[mid]
        };
        Ok(json!({
            "count": series.len(),
            "min": series[0],
            "max": series[series.len() - 1],
            "mean": m,
            "median": median,
            "std_dev": sd,
        }))
    }
}

/// Z-score normalization. A constant series maps to all zeros.
pub struct Normalize;

#[async_trait]
impl Executable for Normalize {
    async fn execute(&self, input: Payload, ctx: &ExecutionContext) -> VertexResult<Payload> {
        let series = series_of("normalize", &input)?;
        ctx.check_cancelled("normalize")?;
        let m = mean(&series);
        let sd = std_dev(&series);
        let normalized: Vec<f64> = series
            .iter()
            .map(|v| if sd == 0.0 { 0.0 } else { (v - m) / sd })
            .collect();
        Ok(json!({
            "series": normalized,
            "mean": m,
            "std_dev": sd,
        }))
    }
}
