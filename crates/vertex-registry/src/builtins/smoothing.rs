use super::{param_f64, param_u64, series_of, std_dev};
use crate::algorithm::{Executable, ExecutionContext};
use async_trait::async_trait;
use serde_json::json;
use vertex_core::{Payload, VertexError, VertexResult};

/// Trailing moving average. Output is itself a series.
pub struct MovingAverage {
    pub window: usize,
}

impl Default for MovingAverage {
    fn default() -> Self {
        Self { window: 3 }
    }
}

#[async_trait]
impl Executable for MovingAverage {
    async fn execute(&self, input: Payload, ctx: &ExecutionContext) -> VertexResult<Payload> {
        let series = series_of("moving_average", &input)?;
        if series.is_empty() {
            return Err(VertexError::execution("moving_average", "empty series"));
        }
        let window = param_u64(&input, "window")
            .map(|w| w as usize)
            .unwrap_or(self.window)
            .clamp(1, series.len());

        let mut averages = Vec::with_capacity(series.len() + 1 - window);
        let mut sum: f64 = series[..window].iter().sum();
        averages.push(sum / window as f64);
        for i in window..series.len() {
            ctx.check_cancelled("moving_average")?;
            sum += series[i] - series[i - window];
            averages.push(sum / window as f64);
        }
        let prediction = averages.last().copied().unwrap_or_default();
        Ok(json!({
            "series": averages,
            "window": window,
            "prediction": prediction,
            "volatility": std_dev(&averages),
        }))
    }
}

/// Simple exponential smoothing with a one-step trend adjustment.
pub struct ExponentialSmoothing {
    pub alpha: f64,
}

impl Default for ExponentialSmoothing {
    fn default() -> Self {
        Self { alpha: 0.3 }
    }
}

#[async_trait]
impl Executable for ExponentialSmoothing {
    async fn execute(&self, input: Payload, ctx: &ExecutionContext) -> VertexResult<Payload> {
        let series = series_of("exponential_smoothing", &input)?;
        let Some(first) = series.first().copied() else {
            return Err(VertexError::execution("exponential_smoothing", "empty series"));
        };
        let alpha = param_f64(&input, "alpha").unwrap_or(self.alpha);
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(VertexError::execution(
                "exponential_smoothing",
                format!("alpha must be in (0, 1], got {alpha}"),
            ));
        }

        let mut smoothed = Vec::with_capacity(series.len());
        smoothed.push(first);
        for value in &series[1..] {
            ctx.check_cancelled("exponential_smoothing")?;
            let prev = smoothed[smoothed.len() - 1];
            smoothed.push(alpha * value + (1.0 - alpha) * prev);
        }
        let last = smoothed[smoothed.len() - 1];
        let trend = if smoothed.len() >= 2 {
            last - smoothed[smoothed.len() - 2]
        } else {
            0.0
        };
        Ok(json!({
            "prediction": last + trend * alpha,
            "trend": trend,
            "alpha": alpha,
            "smoothed": smoothed,
        }))
    }
}
