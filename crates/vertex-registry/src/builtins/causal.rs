use super::{field, mean, numbers, param_f64, pearson, sample_std_dev};
use crate::algorithm::{Executable, ExecutionContext};
use async_trait::async_trait;
use serde_json::{json, Map};
use vertex_core::{Payload, VertexError, VertexResult};

/// Pairwise correlation screen with a one-step temporal precedence test.
///
/// For every ordered pair of equally long series whose correlation exceeds
/// `correlation_threshold`, `a` is reported as a candidate cause of `b` when
/// `a[t]` correlates with `b[t + 1]` more strongly than the two do in step.
pub struct CausalInference {
    pub correlation_threshold: f64,
}

impl Default for CausalInference {
    fn default() -> Self {
        Self {
            correlation_threshold: 0.5,
        }
    }
}

#[async_trait]
impl Executable for CausalInference {
    async fn execute(&self, input: Payload, ctx: &ExecutionContext) -> VertexResult<Payload> {
        const ALG: &str = "causal_inference";
        let variables = field(ALG, &input, "variables")?
            .as_object()
            .ok_or_else(|| VertexError::execution(ALG, "'variables' must map names to series"))?;
        let threshold = param_f64(&input, "correlation_threshold").unwrap_or(self.correlation_threshold);
        let series = variables
            .iter()
            .map(|(name, values)| Ok((name.as_str(), numbers(ALG, values, name)?)))
            .collect::<VertexResult<Vec<_>>>()?;

        let mut correlations = Map::new();
        let mut relationships = Vec::new();
        for (cause, s1) in &series {
            ctx.check_cancelled(ALG)?;
            for (effect, s2) in &series {
                if cause == effect || s1.len() != s2.len() || s1.len() < 2 {
                    continue;
                }
                let correlation = pearson(s1, s2);
                correlations.insert(format!("{cause}->{effect}"), json!(correlation));
                if correlation.abs() <= threshold {
                    continue;
                }
                let lagged = pearson(&s1[..s1.len() - 1], &s2[1..]);
                if lagged.abs() > correlation.abs() {
                    relationships.push(json!({
                        "cause": cause,
                        "effect": effect,
                        "strength": lagged,
                        "confidence": lagged.abs().min(0.95),
                    }));
                }
            }
        }

        Ok(json!({
            "correlations": correlations,
            "causal_relationships": relationships,
            "threshold": threshold,
            "variables_analyzed": series.len(),
        }))
    }
}

/// Before/after comparison of an intervention: mean shift, pooled two-sample
/// t statistic and Cohen's d.
pub struct InterventionAnalyzer;

fn magnitude(cohens_d: f64) -> &'static str {
    match cohens_d.abs() {
        d if d < 0.2 => "small",
        d if d < 0.5 => "medium",
        _ => "large",
    }
}

#[async_trait]
impl Executable for InterventionAnalyzer {
    async fn execute(&self, input: Payload, _ctx: &ExecutionContext) -> VertexResult<Payload> {
        const ALG: &str = "intervention_analyzer";
        let before = numbers(ALG, field(ALG, &input, "before")?, "before")?;
        let after = numbers(ALG, field(ALG, &input, "after")?, "after")?;
        if before.is_empty() || after.is_empty() || before.len() + after.len() < 3 {
            return Err(VertexError::execution(
                ALG,
                "need non-empty 'before' and 'after' with at least 3 measurements in total",
            ));
        }

        let (nb, na) = (before.len() as f64, after.len() as f64);
        let (before_mean, after_mean) = (mean(&before), mean(&after));
        let effect_size = after_mean - before_mean;
        let (sb, sa) = (sample_std_dev(&before), sample_std_dev(&after));
        let pooled_std = (((nb - 1.0) * sb * sb + (na - 1.0) * sa * sa) / (nb + na - 2.0)).sqrt();

        let (t_statistic, cohens_d) = if pooled_std > 0.0 {
            (
                effect_size / (pooled_std * (1.0 / nb + 1.0 / na).sqrt()),
                effect_size / pooled_std,
            )
        } else {
            (0.0, 0.0)
        };

        Ok(json!({
            "effect_size": effect_size,
            "before_mean": before_mean,
            "after_mean": after_mean,
            "pooled_std": pooled_std,
            "t_statistic": t_statistic,
            "cohens_d": cohens_d,
            "effect_magnitude": magnitude(cohens_d),
            "sample_sizes": {"before": before.len(), "after": after.len()},
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_leading_series_is_a_cause() {
        let out = CausalInference::default()
            .execute(
                json!({"variables": {
                    "x": [1, 2, 4, 7, 11, 16, 22, 29],
                    "y": [0, 1, 2, 4, 7, 11, 16, 22],
                }}),
                &ExecutionContext::detached(),
            )
            .await
            .unwrap();
        let found = out["causal_relationships"].as_array().unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["cause"], json!("x"));
        assert_eq!(found[0]["effect"], json!("y"));
        assert_eq!(found[0]["confidence"], json!(0.95));
        assert_eq!(out["variables_analyzed"], json!(2));
        assert!(out["correlations"]["x->y"].as_f64().unwrap() > 0.99);
    }

    #[tokio::test]
    async fn test_threshold_filters_weak_pairs() {
        let out = CausalInference::default()
            .execute(
                json!({"variables": {"a": [1, 2, 1, 2, 1], "b": [5, 5, 6, 5, 5]}, "correlation_threshold": 0.9}),
                &ExecutionContext::detached(),
            )
            .await
            .unwrap();
        assert_eq!(out["causal_relationships"], json!([]));
        assert_eq!(out["threshold"], json!(0.9));
    }

    #[tokio::test]
    async fn test_intervention_effect() {
        let out = InterventionAnalyzer
            .execute(
                json!({"before": [1, 2, 3], "after": [4, 5, 6]}),
                &ExecutionContext::detached(),
            )
            .await
            .unwrap();
        assert_eq!(out["effect_size"], json!(3.0));
        assert_eq!(out["pooled_std"], json!(1.0));
        assert_eq!(out["cohens_d"], json!(3.0));
        assert_eq!(out["effect_magnitude"], json!("large"));
        assert_eq!(out["sample_sizes"], json!({"before": 3, "after": 3}));
    }

    #[tokio::test]
    async fn test_identical_samples_have_no_effect() {
        let out = InterventionAnalyzer
            .execute(json!({"before": [2, 2], "after": [2, 2]}), &ExecutionContext::detached())
            .await
            .unwrap();
        assert_eq!(out["t_statistic"], json!(0.0));
        assert_eq!(out["effect_magnitude"], json!("small"));
    }
}
