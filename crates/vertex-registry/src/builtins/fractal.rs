use super::{mean, pearson, series_of, std_dev};
use crate::algorithm::{Executable, ExecutionContext};
use async_trait::async_trait;
use serde_json::{json, Map};
use vertex_core::{Payload, VertexError, VertexResult};

/// Hurst exponent, fractal dimension and self-similarity of a series.
pub struct FractalAnalyzer;

/// Slope of `log sqrt(std(x[t + lag] - x[t]))` against `log lag`. Falls back
/// to 0.5 when the series is too short or flat to fit.
fn hurst_exponent(data: &[f64]) -> f64 {
    let max_lag = (data.len() / 4).min(100);
    let mut points = Vec::new();
    for lag in 2..max_lag {
        let diffs: Vec<f64> = data[lag..].iter().zip(data).map(|(a, b)| a - b).collect();
        let tau = std_dev(&diffs).sqrt();
        if tau > 0.0 {
            points.push(((lag as f64).ln(), tau.ln()));
        }
    }
    if points.len() < 2 {
        return 0.5;
    }
    let xs: Vec<f64> = points.iter().map(|p| p.0).collect();
    let ys: Vec<f64> = points.iter().map(|p| p.1).collect();
    let (mx, my) = (mean(&xs), mean(&ys));
    let sxx: f64 = xs.iter().map(|x| (x - mx).powi(2)).sum();
    let sxy: f64 = xs.iter().zip(&ys).map(|(x, y)| (x - mx) * (y - my)).sum();
    sxy / sxx
}

#[async_trait]
impl Executable for FractalAnalyzer {
    async fn execute(&self, input: Payload, ctx: &ExecutionContext) -> VertexResult<Payload> {
        let data = series_of("fractal_analyzer", &input)?;
        if data.len() < 2 {
            return Err(VertexError::execution(
                "fractal_analyzer",
                format!("need at least 2 points, got {}", data.len()),
            ));
        }
        let hurst = hurst_exponent(&data);
        ctx.check_cancelled("fractal_analyzer")?;

        let mut self_similarity = Map::new();
        for scale in [2usize, 4, 8, 16] {
            if data.len() >= scale * 2 {
                let downsampled: Vec<f64> = data.iter().step_by(scale).copied().collect();
                self_similarity.insert(format!("scale_{scale}"), json!(pearson(&data, &downsampled)));
            }
        }

        let trend_type = if hurst > 0.5 {
            "persistent"
        } else if hurst < 0.5 {
            "anti-persistent"
        } else {
            "random_walk"
        };

        Ok(json!({
            "hurst_exponent": hurst,
            "fractal_dimension": 2.0 - hurst,
            "trend_type": trend_type,
            "self_similarity": self_similarity,
            "data_length": data.len(),
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_short_series_defaults_to_random_walk() {
        let out = FractalAnalyzer
            .execute(json!([1, 2, 3, 4, 5]), &ExecutionContext::detached())
            .await
            .unwrap();
        assert_eq!(out["hurst_exponent"], json!(0.5));
        assert_eq!(out["fractal_dimension"], json!(1.5));
        assert_eq!(out["trend_type"], json!("random_walk"));
        assert!(out["self_similarity"]["scale_2"].is_number());
        assert!(out["self_similarity"].get("scale_4").is_none());
    }

    #[tokio::test]
    async fn test_alternating_series_is_anti_persistent() {
        let series: Vec<f64> = (0..64)
            .map(|i| {
                let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
                sign * (1.0 + (i % 5) as f64)
            })
            .collect();
        let out = FractalAnalyzer
            .execute(json!(series), &ExecutionContext::detached())
            .await
            .unwrap();
        assert_eq!(out["data_length"], json!(64));
        let h = out["hurst_exponent"].as_f64().unwrap();
        assert!(h < 0.5, "hurst {h}");
        assert_eq!(out["trend_type"], json!("anti-persistent"));
    }
}
