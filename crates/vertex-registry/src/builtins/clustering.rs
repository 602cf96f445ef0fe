use super::{param_u64, series_of};
use crate::algorithm::{Executable, ExecutionContext};
use async_trait::async_trait;
use serde_json::json;
use vertex_core::{Payload, VertexError, VertexResult};

/// Lloyd's k-means on scalar data.
///
/// Centroids are seeded at evenly spaced quantiles of the sorted input, which
/// keeps results reproducible.
pub struct KMeans {
    pub k: usize,
    pub max_iterations: usize,
}

impl Default for KMeans {
    fn default() -> Self {
        Self {
            k: 2,
            max_iterations: 50,
        }
    }
}

fn nearest(value: f64, centroids: &[f64]) -> usize {
    let mut best = 0;
    for (i, c) in centroids.iter().enumerate() {
        if (value - c).abs() < (value - centroids[best]).abs() {
            best = i;
        }
    }
    best
}

#[async_trait]
impl Executable for KMeans {
    async fn execute(&self, input: Payload, ctx: &ExecutionContext) -> VertexResult<Payload> {
        let data = series_of("kmeans", &input)?;
        if data.is_empty() {
            return Err(VertexError::execution("kmeans", "empty series"));
        }
        let k = param_u64(&input, "k")
            .map(|k| k as usize)
            .unwrap_or(self.k)
            .clamp(1, data.len());

        let mut sorted = data.clone();
        sorted.sort_by(f64::total_cmp);
        let mut centroids: Vec<f64> = (0..k)
            .map(|j| {
                let idx = if k == 1 { sorted.len() / 2 } else { j * (sorted.len() - 1) / (k - 1) };
                sorted[idx]
            })
            .collect();

        let mut assignments = vec![usize::MAX; data.len()];
        let mut iterations = 0;
        while iterations < self.max_iterations {
            ctx.check_cancelled("kmeans")?;
            iterations += 1;
            let next: Vec<usize> = data.iter().map(|v| nearest(*v, &centroids)).collect();
            let converged = next == assignments;
            assignments = next;
            if converged {
                break;
            }
            for (j, centroid) in centroids.iter_mut().enumerate() {
                let members: Vec<f64> = data
                    .iter()
                    .zip(&assignments)
                    .filter(|(_, a)| **a == j)
                    .map(|(v, _)| *v)
                    .collect();
                // An empty cluster keeps its previous centroid.
                if !members.is_empty() {
                    *centroid = members.iter().sum::<f64>() / members.len() as f64;
                }
            }
        }

        let inertia: f64 = data
            .iter()
            .zip(&assignments)
            .map(|(v, a)| (v - centroids[*a]).powi(2))
            .sum();
        Ok(json!({
            "k": k,
            "centroids": centroids,
            "assignments": assignments,
            "inertia": inertia,
            "iterations": iterations,
        }))
    }
}
