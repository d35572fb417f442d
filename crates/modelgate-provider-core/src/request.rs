use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Either a chat sequence or a legacy prompt string; never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestBody {
    Chat(Vec<ChatMessage>),
    Prompt(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
}

/// A provider-agnostic request shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRequest {
    pub model: String,
    pub body: RequestBody,
    #[serde(default)]
    pub sampling: SamplingParams,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default)]
    pub extras: HashMap<String, Value>,
}

impl NormalizedRequest {
    pub fn is_chat(&self) -> bool {
        matches!(self.body, RequestBody::Chat(_))
    }

    /// Builds the effective per-attempt request: `model` replaced by the
    /// mapping's upstream model name, `overlay` merged on top (overlay wins
    /// on conflict, unknown overlay keys fall through to `extras`).
    /// Deterministic for a given request and overlay.
    pub fn with_overlay(&self, upstream_model: &str, overlay: &HashMap<String, Value>) -> Self {
        let mut effective = self.clone();
        effective.model = upstream_model.to_string();

        for (key, value) in overlay {
            match key.as_str() {
                "temperature" => effective.sampling.temperature = value.as_f64().map(|v| v as f32),
                "max_tokens" => effective.sampling.max_tokens = value.as_u64().map(|v| v as u32),
                "top_p" => effective.sampling.top_p = value.as_f64().map(|v| v as f32),
                "frequency_penalty" => {
                    effective.sampling.frequency_penalty = value.as_f64().map(|v| v as f32)
                }
                "presence_penalty" => {
                    effective.sampling.presence_penalty = value.as_f64().map(|v| v as f32)
                }
                "stop" => {
                    effective.sampling.stop = value
                        .as_array()
                        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                }
                "stream" => {
                    if let Some(flag) = value.as_bool() {
                        effective.stream = flag;
                    }
                }
                "user" => effective.user = value.as_str().map(String::from),
                _ => {
                    effective.extras.insert(key.clone(), value.clone());
                }
            }
        }

        effective
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_request() -> NormalizedRequest {
        NormalizedRequest {
            model: "gpt-3.5-turbo".to_string(),
            body: RequestBody::Chat(vec![ChatMessage {
                role: ChatRole::User,
                content: "hi".to_string(),
                name: None,
            }]),
            sampling: SamplingParams::default(),
            stream: false,
            user: None,
            extras: HashMap::new(),
        }
    }

    #[test]
    fn overlay_replaces_model_and_known_fields() {
        let req = base_request();
        let mut overlay = HashMap::new();
        overlay.insert("temperature".to_string(), serde_json::json!(0.2));
        overlay.insert("region".to_string(), serde_json::json!("us-east"));

        let effective = req.with_overlay("gpt-4o-mini", &overlay);
        assert_eq!(effective.model, "gpt-4o-mini");
        assert_eq!(effective.sampling.temperature, Some(0.2));
        assert_eq!(
            effective.extras.get("region"),
            Some(&serde_json::json!("us-east"))
        );
    }
}
