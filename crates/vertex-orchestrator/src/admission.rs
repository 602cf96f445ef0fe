use crate::config::OrchestratorConfig;
use crate::types::{GroupPolicy, SubmitRequest, TaskSpec};
use std::collections::HashSet;
use vertex_core::{Priority, VertexError, VertexResult};
use vertex_monitor::{BudgetStatus, ThresholdTier};
use vertex_registry::AlgorithmRegistry;

/// Structural checks run synchronously on every submission.
pub fn validate(
    request: &SubmitRequest,
    registry: &AlgorithmRegistry,
    config: &OrchestratorConfig,
) -> VertexResult<()> {
    if request.timeout_ms == Some(0) {
        return Err(VertexError::Validation("timeout_ms must be positive".into()));
    }

    match &request.spec {
        TaskSpec::Single { algorithm } => {
            registry.describe(algorithm)?;
        }
        TaskSpec::Chain { steps } => validate_chain(steps, registry, config)?,
        TaskSpec::Group { algorithms, policy } => {
            validate_group(algorithms, policy, registry, config)?;
        }
    }
    Ok(())
}

/// Chains are type-checked eagerly: the output tag of step `i` must feed the
/// input tag of step `i + 1`.
fn validate_chain(
    steps: &[String],
    registry: &AlgorithmRegistry,
    config: &OrchestratorConfig,
) -> VertexResult<()> {
    if steps.is_empty() {
        return Err(VertexError::Validation("chain has no steps".into()));
    }
    if steps.len() > config.max_chain_depth {
        return Err(VertexError::Validation(format!(
            "chain depth {} exceeds the limit of {}",
            steps.len(),
            config.max_chain_depth
        )));
    }

    let descriptors = steps
        .iter()
        .map(|id| registry.describe(id))
        .collect::<VertexResult<Vec<_>>>()?;

    for (i, pair) in descriptors.windows(2).enumerate() {
        let (from, to) = (&pair[0], &pair[1]);
        if !from.output.feeds(&to.input) {
            return Err(VertexError::Validation(format!(
                "chain step {i} '{}' outputs '{}' but step {} '{}' expects '{}'",
                from.id,
                from.output,
                i + 1,
                to.id,
                to.input
            )));
        }
    }
    Ok(())
}

fn validate_group(
    algorithms: &[String],
    policy: &GroupPolicy,
    registry: &AlgorithmRegistry,
    config: &OrchestratorConfig,
) -> VertexResult<()> {
    if algorithms.is_empty() {
        return Err(VertexError::Validation("group has no algorithms".into()));
    }
    if algorithms.len() > config.max_group_width {
        return Err(VertexError::Validation(format!(
            "group width {} exceeds the limit of {}",
            algorithms.len(),
            config.max_group_width
        )));
    }

    let mut seen = HashSet::new();
    for id in algorithms {
        if !seen.insert(id.as_str()) {
            return Err(VertexError::Validation(format!(
                "group lists '{id}' more than once"
            )));
        }
        registry.describe(id)?;
    }

    let required = policy.required();
    if required == 0 || required > algorithms.len() {
        return Err(VertexError::Validation(format!(
            "group policy requires {required} successes out of {} branches",
            algorithms.len()
        )));
    }
    if let GroupPolicy::FirstN { timeout_ms: 0, .. } = policy {
        return Err(VertexError::Validation(
            "first_n timeout_ms must be positive".into(),
        ));
    }
    Ok(())
}

/// Budget gate. A breached billing ceiling blocks everything but critical
/// work; the throttle tier and above block non-critical priorities.
pub fn admit(priority: Priority, status: &BudgetStatus) -> VertexResult<()> {
    if status.ceiling_breached && priority != Priority::CRITICAL {
        return Err(VertexError::BudgetExceeded(format!(
            "billing window cost {:.4} reached its ceiling; priority {priority} rejected",
            status.window_cost
        )));
    }
    if status.tier >= ThresholdTier::Throttle && priority.is_non_critical() {
        return Err(VertexError::ResourceExhausted(format!(
            "utilization at {:.0}% ({} tier{}); priority {priority} rejected",
            status.ratios.max() * 100.0,
            status.tier,
            if status.stale { ", stale sample" } else { "" }
        )));
    }
    Ok(())
}
