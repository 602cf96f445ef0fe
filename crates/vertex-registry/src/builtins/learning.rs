use super::{field, mean, numbers, param_f64, param_u64, rows, std_dev};
use crate::algorithm::{Executable, ExecutionContext};
use async_trait::async_trait;
use serde_json::{json, Map};
use std::collections::BTreeMap;
use vertex_core::{Payload, VertexError, VertexResult};

/// Linear model trained one sample at a time with squared loss.
///
/// Input is `{"features": [[..], ..], "targets": [..]}`; a single sample may
/// be given as `{"features": [..], "target": x}`. Passing the `weights` of a
/// previous run continues training from them, otherwise weights start at
/// zero so identical inputs always produce identical models.
pub struct OnlineGradientDescent {
    pub learning_rate: f64,
}

impl Default for OnlineGradientDescent {
    fn default() -> Self {
        Self { learning_rate: 0.01 }
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[async_trait]
impl Executable for OnlineGradientDescent {
    async fn execute(&self, input: Payload, ctx: &ExecutionContext) -> VertexResult<Payload> {
        const ALG: &str = "online_gradient_descent";
        let features = field(ALG, &input, "features")?;
        let (samples, targets) = if features.as_array().is_some_and(|a| a.iter().all(Payload::is_number)) {
            let target = param_f64(&input, "target")
                .ok_or_else(|| VertexError::execution(ALG, "missing numeric 'target'"))?;
            (vec![numbers(ALG, features, "features")?], vec![target])
        } else {
            (rows(ALG, features, "features")?, numbers(ALG, field(ALG, &input, "targets")?, "targets")?)
        };
        if samples.is_empty() || samples.len() != targets.len() {
            return Err(VertexError::execution(
                ALG,
                format!("{} samples but {} targets", samples.len(), targets.len()),
            ));
        }
        let width = samples[0].len();
        if width == 0 {
            return Err(VertexError::execution(ALG, "samples have no features"));
        }
        let learning_rate = param_f64(&input, "learning_rate").unwrap_or(self.learning_rate);
        let epochs = param_u64(&input, "epochs").unwrap_or(1).max(1);

        let mut weights = match input.get("weights") {
            Some(w) => numbers(ALG, w, "weights")?,
            None => vec![0.0; width],
        };
        if weights.len() != width {
            return Err(VertexError::execution(
                ALG,
                format!("{} weights for {width} features", weights.len()),
            ));
        }

        let (mut prediction, mut loss, mut gradient_norm) = (0.0, 0.0, 0.0);
        for _ in 0..epochs {
            ctx.check_cancelled(ALG)?;
            for (x, y) in samples.iter().zip(&targets) {
                prediction = dot(&weights, x);
                let error = prediction - y;
                loss = 0.5 * error * error;
                gradient_norm = x.iter().map(|xi| (error * xi).powi(2)).sum::<f64>().sqrt();
                for (w, xi) in weights.iter_mut().zip(x) {
                    *w -= learning_rate * error * xi;
                }
            }
        }

        Ok(json!({
            "prediction": prediction,
            "loss": loss,
            "weights": weights,
            "gradient_norm": gradient_norm,
            "learning_rate": learning_rate,
            "samples": samples.len(),
        }))
    }
}

/// Gaussian naive Bayes classifier.
///
/// Trains on `{"features": [[..], ..], "labels": [..]}` and classifies the
/// training rows, plus any rows under `query`.
pub struct NaiveBayes;

struct ClassModel {
    label: Payload,
    prior: f64,
    means: Vec<f64>,
    stds: Vec<f64>,
}

impl ClassModel {
    fn log_likelihood(&self, x: &[f64]) -> f64 {
        let mut total = self.prior.ln();
        for ((v, m), s) in x.iter().zip(&self.means).zip(&self.stds) {
            let var = s * s;
            total += -0.5 * (2.0 * std::f64::consts::PI * var).ln() - (v - m).powi(2) / (2.0 * var);
        }
        total
    }
}

fn label_key(label: &Payload) -> String {
    match label {
        Payload::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn classify<'a>(models: &'a [ClassModel], x: &[f64]) -> &'a Payload {
    let mut best = &models[0];
    let mut best_score = f64::NEG_INFINITY;
    for model in models {
        let score = model.log_likelihood(x);
        if score > best_score {
            best = model;
            best_score = score;
        }
    }
    &best.label
}

#[async_trait]
impl Executable for NaiveBayes {
    async fn execute(&self, input: Payload, ctx: &ExecutionContext) -> VertexResult<Payload> {
        const ALG: &str = "naive_bayes";
        let samples = rows(ALG, field(ALG, &input, "features")?, "features")?;
        let labels = field(ALG, &input, "labels")?
            .as_array()
            .ok_or_else(|| VertexError::execution(ALG, "'labels' must be an array"))?;
        if samples.is_empty() || samples.len() != labels.len() {
            return Err(VertexError::execution(
                ALG,
                format!("{} samples but {} labels", samples.len(), labels.len()),
            ));
        }

        let mut by_class: BTreeMap<String, (Payload, Vec<&Vec<f64>>)> = BTreeMap::new();
        for (x, label) in samples.iter().zip(labels) {
            by_class
                .entry(label_key(label))
                .or_insert_with(|| (label.clone(), Vec::new()))
                .1
                .push(x);
        }
        ctx.check_cancelled(ALG)?;

        let width = samples[0].len();
        let total = samples.len() as f64;
        let models: Vec<ClassModel> = by_class
            .values()
            .map(|(label, members)| {
                let column = |j: usize| members.iter().map(|x| x[j]).collect::<Vec<f64>>();
                ClassModel {
                    label: label.clone(),
                    prior: members.len() as f64 / total,
                    means: (0..width).map(|j| mean(&column(j))).collect(),
                    stds: (0..width).map(|j| std_dev(&column(j)) + 1e-6).collect(),
                }
            })
            .collect();

        let predictions: Vec<&Payload> = samples.iter().map(|x| classify(&models, x)).collect();
        let correct = predictions.iter().zip(labels).filter(|(p, l)| **p == *l).count();

        let mut class_priors = Map::new();
        let mut feature_stats = Map::new();
        for (key, model) in by_class.keys().zip(&models) {
            class_priors.insert(key.clone(), json!(model.prior));
            feature_stats.insert(key.clone(), json!({"mean": model.means, "std": model.stds}));
        }

        let mut out = json!({
            "predictions": predictions,
            "accuracy": correct as f64 / total,
            "class_priors": class_priors,
            "feature_stats": feature_stats,
            "classes": models.iter().map(|m| m.label.clone()).collect::<Vec<_>>(),
        });
        if let Some(query) = input.get("query") {
            let query = rows(ALG, query, "query")?;
            if query.iter().any(|q| q.len() != width) {
                return Err(VertexError::execution(ALG, format!("query rows must have {width} features")));
            }
            let labelled: Vec<&Payload> = query.iter().map(|q| classify(&models, q)).collect();
            out["query_predictions"] = json!(labelled);
        }
        Ok(out)
    }
}
