use std::io::Cursor;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::ImageOutputFormat;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;

/// JSON schema primitive types usable for tool parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Integer,
    Number,
    String,
    Boolean,
    Object,
    Array,
}

#[derive(Debug, Clone)]
pub struct ToolParam {
    pub name: String,
    pub kind: ParamKind,
    pub description: Option<String>,
    pub required: bool,
}

impl ToolParam {
    pub fn required(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            description: None,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind)
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A function the model may call, in chat-completions `tools` format.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub params: Vec<ToolParam>,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: Vec::new(),
        }
    }

    pub fn param(mut self, param: ToolParam) -> Self {
        self.params.push(param);
        self
    }

    fn parameters_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .params
            .iter()
            .map(|param| {
                let mut property = json!({ "type": param.kind });
                if let Some(description) = &param.description {
                    property["description"] = Value::String(description.clone());
                }
                (param.name.clone(), property)
            })
            .collect();
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|param| param.required)
            .map(|param| param.name.as_str())
            .collect();

        let mut schema = json!({ "type": "object", "properties": properties });
        if !required.is_empty() {
            schema["required"] = json!(required);
        }
        schema
    }

    pub fn to_json(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters_schema(),
            }
        })
    }
}

/// Function name and JSON-encoded arguments of a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default, deserialize_with = "arguments_as_string")]
    pub arguments: String,
}

/// Tool call emitted by a model, in chat-completions wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-generated call id.
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

// Some providers send arguments as an object instead of a JSON string.
fn arguments_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(value) => value,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: &Value) -> Self {
        let arguments = match args {
            Value::String(value) => value.clone(),
            other => other.to_string(),
        };
        Self {
            id: id.into(),
            kind: function_kind(),
            function: FunctionCall {
                name: name.into(),
                arguments,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    /// Parses the argument payload as a JSON object.
    pub fn args(&self) -> Result<Map<String, Value>, serde_json::Error> {
        if self.function.arguments.trim().is_empty() {
            return Ok(Map::new());
        }
        serde_json::from_str(&self.function.arguments)
    }
}

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Image file not found: {0}")]
    NotFound(String),
    #[error("failed to read image {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Normalizes arbitrary image bytes to PNG and returns Base64 payload.
pub fn encode_image_base64_from_bytes(bytes: &[u8]) -> Result<String, ImageError> {
    let image = image::load_from_memory(bytes)?;
    let mut buffer = Vec::new();
    image.write_to(&mut Cursor::new(&mut buffer), ImageOutputFormat::Png)?;
    Ok(STANDARD.encode(&buffer))
}

/// Remote URLs pass through; local files become PNG data URLs.
pub fn image_url_for(source: &str) -> Result<String, ImageError> {
    if source.starts_with("http://")
        || source.starts_with("https://")
        || source.starts_with("data:")
    {
        return Ok(source.to_string());
    }

    let path = Path::new(source);
    if !path.is_file() {
        return Err(ImageError::NotFound(source.to_string()));
    }
    let bytes = std::fs::read(path).map_err(|source_err| ImageError::Io {
        path: source.to_string(),
        source: source_err,
    })?;
    let encoded = encode_image_base64_from_bytes(&bytes)?;
    Ok(format!("data:image/png;base64,{encoded}"))
}
