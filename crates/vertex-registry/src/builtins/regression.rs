use super::{mean, param_u64, series_of};
use crate::algorithm::{Executable, ExecutionContext};
use async_trait::async_trait;
use serde_json::json;
use vertex_core::{Payload, VertexError, VertexResult};

/// Ordinary least squares over `(index, value)`, forecasting the next point.
pub struct LinearRegression;

#[async_trait]
impl Executable for LinearRegression {
    async fn execute(&self, input: Payload, ctx: &ExecutionContext) -> VertexResult<Payload> {
        let y = series_of("linear_regression", &input)?;
        if y.len() < 2 {
            return Err(VertexError::execution(
                "linear_regression",
                format!("need at least 2 points, got {}", y.len()),
            ));
        }
        let n = y.len() as f64;
        let (mut sum_x, mut sum_xy, mut sum_x2) = (0.0, 0.0, 0.0);
        for (i, value) in y.iter().enumerate() {
            let x = i as f64;
            sum_x += x;
            sum_xy += x * value;
            sum_x2 += x * x;
        }
        ctx.check_cancelled("linear_regression")?;
        let sum_y: f64 = y.iter().sum();
        let slope = (n * sum_xy - sum_x * sum_y) / (n * sum_x2 - sum_x * sum_x);
        let intercept = (sum_y - slope * sum_x) / n;

        let y_mean = mean(&y);
        let ss_tot: f64 = y.iter().map(|v| (v - y_mean).powi(2)).sum();
        let ss_res: f64 = y
            .iter()
            .enumerate()
            .map(|(i, v)| (v - (slope * i as f64 + intercept)).powi(2))
            .sum();
        let r_squared = if ss_tot == 0.0 { 1.0 } else { 1.0 - ss_res / ss_tot };

        Ok(json!({
            "prediction": slope * n + intercept,
            "slope": slope,
            "intercept": intercept,
            "r_squared": r_squared,
        }))
    }
}

/// Least-squares polynomial fit over `(index, value)`.
///
/// `degree` defaults to 2 and is clamped to `len - 1`. Coefficients are
/// reported lowest order first.
pub struct PolynomialRegression {
    pub degree: usize,
}

impl Default for PolynomialRegression {
    fn default() -> Self {
        Self { degree: 2 }
    }
}

/// Solve `a * x = b` by Gaussian elimination with partial pivoting.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|i, j| a[*i][col].abs().total_cmp(&a[*j][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Some(x)
}

fn evaluate(coefficients: &[f64], x: f64) -> f64 {
    coefficients.iter().rev().fold(0.0, |acc, c| acc * x + c)
}

#[async_trait]
impl Executable for PolynomialRegression {
    async fn execute(&self, input: Payload, ctx: &ExecutionContext) -> VertexResult<Payload> {
        let y = series_of("polynomial_regression", &input)?;
        if y.len() < 3 {
            return Err(VertexError::execution(
                "polynomial_regression",
                format!("need at least 3 points, got {}", y.len()),
            ));
        }
        let degree = param_u64(&input, "degree")
            .map(|d| d as usize)
            .unwrap_or(self.degree)
            .clamp(1, y.len() - 1);
        let terms = degree + 1;

        // Normal equations: (X^T X) c = X^T y over the Vandermonde matrix.
        let mut xtx = vec![vec![0.0; terms]; terms];
        let mut xty = vec![0.0; terms];
        for (i, value) in y.iter().enumerate() {
            let powers: Vec<f64> = (0..2 * terms).map(|p| (i as f64).powi(p as i32)).collect();
            for r in 0..terms {
                for c in 0..terms {
                    xtx[r][c] += powers[r + c];
                }
                xty[r] += powers[r] * value;
            }
        }
        ctx.check_cancelled("polynomial_regression")?;
        let coefficients = solve(xtx, xty).ok_or_else(|| {
            VertexError::execution("polynomial_regression", "singular system, lower the degree")
        })?;

        let fitted: Vec<f64> = (0..y.len()).map(|i| evaluate(&coefficients, i as f64)).collect();
        let y_mean = mean(&y);
        let ss_tot: f64 = y.iter().map(|v| (v - y_mean).powi(2)).sum();
        let ss_res: f64 = y.iter().zip(&fitted).map(|(v, f)| (v - f).powi(2)).sum();
        let r_squared = if ss_tot == 0.0 { 1.0 } else { 1.0 - ss_res / ss_tot };

        Ok(json!({
            "prediction": evaluate(&coefficients, y.len() as f64),
            "coefficients": coefficients,
            "degree": degree,
            "r_squared": r_squared,
            "fitted_values": fitted,
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_perfect_line() {
        let out = LinearRegression
            .execute(json!([1, 3, 5, 7]), &ExecutionContext::detached())
            .await
            .unwrap();
        assert_eq!(out["slope"], json!(2.0));
        assert_eq!(out["intercept"], json!(1.0));
        assert_eq!(out["prediction"], json!(9.0));
        assert_eq!(out["r_squared"], json!(1.0));
    }

    #[tokio::test]
    async fn test_too_short() {
        let err = LinearRegression
            .execute(json!([4]), &ExecutionContext::detached())
            .await
            .unwrap_err();
        assert!(matches!(err, VertexError::ExecutionFailure { .. }));
    }

    #[tokio::test]
    async fn test_quadratic_fit() {
        let out = PolynomialRegression::default()
            .execute(json!([1, 2, 5, 10, 17]), &ExecutionContext::detached())
            .await
            .unwrap();
        // y = x^2 + 1
        let prediction = out["prediction"].as_f64().unwrap();
        assert!((prediction - 26.0).abs() < 1e-6, "got {prediction}");
        assert!((out["r_squared"].as_f64().unwrap() - 1.0).abs() < 1e-9);
        assert_eq!(out["degree"], json!(2));
        assert_eq!(out["coefficients"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_degree_clamped() {
        let out = PolynomialRegression::default()
            .execute(json!({"series": [3, 1, 4], "degree": 7}), &ExecutionContext::detached())
            .await
            .unwrap();
        assert_eq!(out["degree"], json!(2));
        assert!(PolynomialRegression::default()
            .execute(json!([1, 2]), &ExecutionContext::detached())
            .await
            .is_err());
    }
}
