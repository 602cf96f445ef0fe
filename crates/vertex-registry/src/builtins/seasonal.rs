use super::{mean, param_u64, series_of};
use crate::algorithm::{Executable, ExecutionContext};
use async_trait::async_trait;
use serde_json::json;
use vertex_core::{Payload, VertexError, VertexResult};

/// Additive decomposition into a centred moving-average trend, a per-phase
/// seasonal component and a residual. Forecasts one step ahead by
/// extrapolating the last trend slope and adding the matching phase.
pub struct SeasonalDecomposition {
    pub period: usize,
}

impl Default for SeasonalDecomposition {
    fn default() -> Self {
        Self { period: 4 }
    }
}

#[async_trait]
impl Executable for SeasonalDecomposition {
    async fn execute(&self, input: Payload, ctx: &ExecutionContext) -> VertexResult<Payload> {
        let data = series_of("seasonal_decomposition", &input)?;
        let n = data.len();
        if n < 4 {
            return Err(VertexError::execution(
                "seasonal_decomposition",
                format!("need at least 4 points, got {n}"),
            ));
        }
        let period = param_u64(&input, "period")
            .map(|p| p as usize)
            .unwrap_or(self.period)
            .clamp(1, n / 2);
        let half = period / 2;

        let trend: Vec<f64> = (0..n)
            .map(|i| mean(&data[i.saturating_sub(half)..(i + half + 1).min(n)]))
            .collect();
        ctx.check_cancelled("seasonal_decomposition")?;

        let detrended: Vec<f64> = data.iter().zip(&trend).map(|(d, t)| d - t).collect();
        let phases: Vec<f64> = (0..period)
            .map(|phase| {
                let members: Vec<f64> = detrended.iter().skip(phase).step_by(period).copied().collect();
                mean(&members)
            })
            .collect();
        let seasonal: Vec<f64> = (0..n).map(|i| phases[i % period]).collect();
        let residual: Vec<f64> = (0..n).map(|i| data[i] - trend[i] - seasonal[i]).collect();

        let next_trend = trend[n - 1] + (trend[n - 1] - trend[n - 2]);
        Ok(json!({
            "prediction": next_trend + phases[n % period],
            "trend": trend,
            "seasonal": seasonal,
            "residual": residual,
            "period": period,
        }))
    }
}
