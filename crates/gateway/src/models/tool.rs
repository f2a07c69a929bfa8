use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A tool advertised to the model.
///
/// Specs only describe what the model may ask for; the tool bridge decides what
/// can actually be invoked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSpec {
    /// The name of the tool, unique within a request
    pub name: String,
    /// A description of what the tool does
    #[serde(default)]
    pub description: String,
    /// JSON schema for the arguments the tool accepts
    #[serde(default = "empty_object_schema", alias = "input_schema", alias = "schema")]
    pub parameters: Value,
}

impl ToolSpec {
    pub fn new<N, D>(name: N, description: D, parameters: Value) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        ToolSpec {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

pub(crate) fn empty_object_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

/// A request from the model to invoke a named tool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Identifier used to pair the call with its result
    pub id: String,
    /// The name of the tool to execute
    pub name: String,
    /// The arguments for the execution
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new<I, N>(id: I, name: N, arguments: Value) -> Self
    where
        I: Into<String>,
        N: Into<String>,
    {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Create a call with a freshly generated id
    pub fn generated<N: Into<String>>(name: N, arguments: Value) -> Self {
        Self::new(
            format!("call_{}", uuid::Uuid::new_v4().simple()),
            name,
            arguments,
        )
    }
}
