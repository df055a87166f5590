use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Tool the model may call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type", default = "crate::types::message::function_type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

impl ToolDefinition {
    pub fn function(name: impl Into<String>, description: Option<String>, parameters: Option<serde_json::Value>) -> Self {
        Self {
            tool_type: crate::types::message::function_type(),
            function: FunctionDefinition {
                name: name.into(),
                description,
                parameters,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema of the arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

/// How the model should pick tools
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolChoice {
    Mode(ToolChoiceMode),
    /// `{"type": "function", "function": {"name": ...}}`
    Function {
        #[serde(rename = "type")]
        tool_type: String,
        function: ToolChoiceName,
    },
}

impl ToolChoice {
    /// Name of the forced function, if any
    pub fn forced_function(&self) -> Option<&str> {
        match self {
            Self::Mode(_) => None,
            Self::Function { function, .. } => Some(&function.name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoiceMode {
    None,
    Auto,
    Required,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolChoiceName {
    pub name: String,
}

/// Drop tools whose function name was already declared
pub(crate) fn dedup_by_name(tools: &[ToolDefinition]) -> Vec<ToolDefinition> {
    let mut seen = HashSet::new();

    tools
        .iter()
        .filter(|tool| {
            let fresh = seen.insert(tool.function.name.as_str());
            if !fresh {
                tracing::debug!(tool = %tool.function.name, "dropping duplicate tool declaration");
            }
            fresh
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn dedup_keeps_first_declaration() {
        let tools = vec![
            ToolDefinition::function("search", Some("first".into()), None),
            ToolDefinition::function("fetch", None, None),
            ToolDefinition::function("search", Some("second".into()), None),
        ];

        let unique = dedup_by_name(&tools);

        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].function.description.as_deref(), Some("first"));
        assert_eq!(unique[1].function.name, "fetch");
    }

    #[test]
    fn tool_choice_shapes() {
        let auto: ToolChoice = serde_json::from_value(json!("auto")).unwrap();
        assert!(matches!(auto, ToolChoice::Mode(ToolChoiceMode::Auto)));
        assert_eq!(auto.forced_function(), None);

        let forced: ToolChoice =
            serde_json::from_value(json!({ "type": "function", "function": { "name": "lookup" } })).unwrap();
        assert_eq!(forced.forced_function(), Some("lookup"));
    }
}
