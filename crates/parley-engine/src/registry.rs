use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use parley_core::tools::{Tool, ToolDefinition};

/// Why a tool was refused at registration.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("tool already registered: {0}")]
    Duplicate(String),

    #[error("invalid tool name {0:?}: use 1-64 letters, digits, '_' or '-', not starting with a digit")]
    InvalidName(String),

    #[error("invalid schema for tool {tool}: {reason}")]
    InvalidSchema { tool: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Name → handler map. Tools are validated when registered, so the
/// definitions handed to the model always describe callable handlers.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool after checking its name and argument schema.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        if !is_valid_name(&name) {
            return Err(RegistryError::InvalidName(name));
        }
        if self.tools.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        validate_schema(&tool.parameters_schema()).map_err(|reason| RegistryError::InvalidSchema {
            tool: name.clone(),
            reason,
        })?;
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(Arc::clone)
    }

    /// Check if a tool is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// List all tool names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Definitions advertised to the model, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Total tool count.
    pub fn count(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= 64
        && (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// The subset of JSON Schema both the model API and the handlers agree on:
/// an object with typed properties, and `required` naming only declared ones.
fn validate_schema(schema: &Value) -> Result<(), String> {
    if schema.get("type").and_then(Value::as_str) != Some("object") {
        return Err("top-level type must be \"object\"".into());
    }
    let properties = match schema.get("properties") {
        Some(Value::Object(props)) => props,
        Some(_) => return Err("\"properties\" must be an object".into()),
        None => return Err("missing \"properties\"".into()),
    };
    for (key, prop) in properties {
        if prop.get("type").and_then(Value::as_str).is_none() {
            return Err(format!("property {key:?} has no type"));
        }
    }
    if let Some(required) = schema.get("required") {
        let required = required
            .as_array()
            .ok_or_else(|| "\"required\" must be an array".to_string())?;
        for entry in required {
            let key = entry
                .as_str()
                .ok_or_else(|| "\"required\" entries must be strings".to_string())?;
            if !properties.contains_key(key) {
                return Err(format!("required property {key:?} is not declared"));
            }
        }
    }
    Ok(())
}
