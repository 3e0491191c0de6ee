pub mod actions;

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use rig::completion::ToolDefinition;
use serde_json::Value;
use tracing::warn;

pub use actions::action_catalog;

/// An operation the model may call.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;
    async fn execute(&self, params: Value) -> Result<String>;
}

/// The catalog of callable operations, ordered by name.
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Definitions handed to the model with every completion request.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    /// Run a tool and return its textual result.
    ///
    /// Unknown tools, invalid parameters and tool errors all come back as
    /// `Error: ...` text so the model can read and react to them.
    pub async fn execute(&self, name: &str, params: Value) -> String {
        let Some(tool) = self.tools.get(name) else {
            warn!("Model requested unknown tool '{name}'");
            return format!("Error: unknown tool '{name}'. Available: {}", self.names().join(", "));
        };

        let problems = validate(&params, &tool.parameters_schema());
        if !problems.is_empty() {
            return format!(
                "Error: invalid parameters for '{name}': {}",
                problems.join("; ")
            );
        }

        match tool.execute(params).await {
            Ok(text) => text,
            Err(e) => format!("Error executing {name}: {e}"),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Check `params` against the subset of JSON schema the catalog uses:
/// `type` (a name or a list of names), `required`, `properties`, `enum`,
/// `minimum`, `maximum` and `minLength`.
fn validate(params: &Value, schema: &Value) -> Vec<String> {
    let mut problems = Vec::new();
    check(params, schema, "", &mut problems);
    problems
}

fn check(val: &Value, schema: &Value, path: &str, problems: &mut Vec<String>) {
    let at = if path.is_empty() { "params" } else { path };

    let allowed: Vec<&str> = match schema.get("type") {
        Some(Value::String(t)) => vec![t.as_str()],
        Some(Value::Array(ts)) => ts.iter().filter_map(|t| t.as_str()).collect(),
        _ => Vec::new(),
    };
    if !allowed.is_empty() && !allowed.iter().any(|t| has_type(val, t)) {
        problems.push(format!("{at}: expected {}", allowed.join(" or ")));
        return;
    }

    if let Some(options) = schema.get("enum").and_then(|e| e.as_array()) {
        if !options.contains(val) {
            problems.push(format!("{at}: not one of the allowed values"));
        }
    }

    if let (Some(n), Some(min)) = (val.as_f64(), schema.get("minimum").and_then(|m| m.as_f64())) {
        if n < min {
            problems.push(format!("{at}: {n} is below the minimum {min}"));
        }
    }
    if let (Some(n), Some(max)) = (val.as_f64(), schema.get("maximum").and_then(|m| m.as_f64())) {
        if n > max {
            problems.push(format!("{at}: {n} is above the maximum {max}"));
        }
    }

    if let (Some(s), Some(min)) = (val.as_str(), schema.get("minLength").and_then(|m| m.as_u64())) {
        if (s.chars().count() as u64) < min {
            problems.push(format!("{at}: shorter than {min} characters"));
        }
    }

    let Some(obj) = val.as_object() else {
        return;
    };
    let child = |key: &str| {
        if path.is_empty() {
            key.to_string()
        } else {
            format!("{path}.{key}")
        }
    };
    for field in schema
        .get("required")
        .and_then(|r| r.as_array())
        .into_iter()
        .flatten()
        .filter_map(|f| f.as_str())
    {
        if !obj.contains_key(field) {
            problems.push(format!("{}: required", child(field)));
        }
    }
    if let Some(props) = schema.get("properties").and_then(|p| p.as_object()) {
        for (key, prop_schema) in props {
            if let Some(prop) = obj.get(key) {
                check(prop, prop_schema, &child(key), problems);
            }
        }
    }
}

fn has_type(val: &Value, name: &str) -> bool {
    match name {
        "object" => val.is_object(),
        "array" => val.is_array(),
        "string" => val.is_string(),
        "integer" => val.is_i64() || val.is_u64(),
        "number" => val.is_number(),
        "boolean" => val.is_boolean(),
        "null" => val.is_null(),
        _ => true,
    }
}
