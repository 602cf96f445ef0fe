use crate::algorithm::{Executable, ExecutionContext};
use async_trait::async_trait;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use vertex_core::{Payload, VertexResult};

/// Walks arbitrary JSON and records structural features per path, then
/// reports features that recur under the same trailing name at different
/// paths.
pub struct PatternMiner {
    pub max_depth: usize,
    /// Array elements inspected per array.
    pub max_items: usize,
}

impl Default for PatternMiner {
    fn default() -> Self {
        Self {
            max_depth: 10,
            max_items: 5,
        }
    }
}

struct Walk<'a> {
    miner: &'a PatternMiner,
    ctx: &'a ExecutionContext,
    features: BTreeMap<String, Payload>,
    deepest: usize,
}

impl Walk<'_> {
    fn visit(&mut self, value: &Payload, depth: usize, path: &str) -> VertexResult<()> {
        if depth > self.miner.max_depth {
            return Ok(());
        }
        self.ctx.check_cancelled("pattern_miner")?;
        self.deepest = self.deepest.max(depth);
        match value {
            Payload::Object(map) => {
                let keys: Vec<&String> = map.keys().collect();
                self.features.insert(format!("{path}#keys"), json!(keys));
                for (key, child) in map {
                    self.visit(child, depth + 1, &format!("{path}.{key}"))?;
                }
            }
            Payload::Array(items) => {
                self.features.insert(format!("{path}#length"), json!(items.len()));
                if !items.is_empty() {
                    let kinds: BTreeSet<&str> = items.iter().map(kind_of).collect();
                    self.features.insert(format!("{path}#kinds"), json!(kinds));
                }
                for (i, item) in items.iter().take(self.miner.max_items).enumerate() {
                    self.visit(item, depth + 1, &format!("{path}[{i}]"))?;
                }
            }
            Payload::Number(n) => {
                self.features.insert(format!("{path}#number"), json!(n));
            }
            Payload::String(s) => {
                self.features.insert(format!("{path}#length"), json!(s.chars().count()));
                self.features
                    .insert(format!("{path}#words"), json!(s.split_whitespace().count()));
            }
            Payload::Bool(_) | Payload::Null => {}
        }
        Ok(())
    }
}

fn kind_of(value: &Payload) -> &'static str {
    match value {
        Payload::Null => "null",
        Payload::Bool(_) => "bool",
        Payload::Number(_) => "number",
        Payload::String(_) => "string",
        Payload::Array(_) => "array",
        Payload::Object(_) => "object",
    }
}

/// `root.a.b#length` -> `b#length`.
fn trailing_name(feature: &str) -> &str {
    feature.rsplit('.').next().unwrap_or(feature)
}

#[async_trait]
impl Executable for PatternMiner {
    async fn execute(&self, input: Payload, ctx: &ExecutionContext) -> VertexResult<Payload> {
        let mut walk = Walk {
            miner: self,
            ctx,
            features: BTreeMap::new(),
            deepest: 0,
        };
        walk.visit(&input, 0, "root")?;

        let mut groups: BTreeMap<&str, Vec<&String>> = BTreeMap::new();
        for feature in walk.features.keys() {
            groups.entry(trailing_name(feature)).or_default().push(feature);
        }
        let recurring: Vec<Payload> = groups
            .into_iter()
            .filter(|(_, paths)| paths.len() > 1)
            .map(|(name, paths)| {
                let values: Vec<&Payload> = paths.iter().filter_map(|p| walk.features.get(*p)).collect();
                json!({ "pattern": name, "occurrences": paths, "values": values })
            })
            .collect();

        Ok(json!({
            "total_features": walk.features.len(),
            "depth_reached": walk.deepest,
            "recurring": recurring,
            "features": walk.features,
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recurring_names_detected() {
        let input = json!({
            "left": {"value": 1, "child": {"value": 2}},
            "right": {"value": 3}
        });
        let out = PatternMiner::default()
            .execute(input, &ExecutionContext::detached())
            .await
            .unwrap();
        let recurring = out["recurring"].as_array().unwrap();
        let value_group = recurring
            .iter()
            .find(|g| g["pattern"] == json!("value#number"))
            .unwrap();
        assert_eq!(value_group["occurrences"].as_array().unwrap().len(), 3);
        assert_eq!(out["depth_reached"], json!(3));
    }

    #[tokio::test]
    async fn test_depth_limit() {
        let miner = PatternMiner {
            max_depth: 1,
            ..PatternMiner::default()
        };
        let out = miner
            .execute(json!({"a": {"b": {"c": 1}}}), &ExecutionContext::detached())
            .await
            .unwrap();
        assert_eq!(out["depth_reached"], json!(1));
        assert!(out["features"].get("root.a.b#keys").is_none());
    }

    #[tokio::test]
    async fn test_scalar_input() {
        let out = PatternMiner::default()
            .execute(json!("hello wide world"), &ExecutionContext::detached())
            .await
            .unwrap();
        assert_eq!(out["features"]["root#words"], json!(3));
    }
}
