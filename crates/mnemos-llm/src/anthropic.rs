//! Anthropic messages backend.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

use mnemos_core::error::{MnemosError, MnemosResult};
use mnemos_core::traits::{
    GenerationOptions, Llm, LlmConfig, LlmResponse, TokenUsage, Tool, ToolCall, ToolChoice,
};
use mnemos_core::types::{Message, MessageRole};

use crate::http;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
const PROVIDER: &str = "Anthropic";

/// Anthropic reasoning engine.
///
/// The system prompt is sent out of band and tool results travel as
/// `tool_result` blocks inside user messages.
pub struct AnthropicLlm {
    client: reqwest::Client,
    api_key: SecretString,
    endpoint: Url,
    config: LlmConfig,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: Vec<RequestBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RequestBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ResponseBlock>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorDetail,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetail {
    message: String,
}

impl AnthropicLlm {
    pub fn new(config: LlmConfig) -> MnemosResult<Self> {
        let api_key =
            http::resolve_api_key(config.api_key.as_deref(), "ANTHROPIC_API_KEY", PROVIDER)?;
        let base_url = config.base_url.as_deref().unwrap_or(ANTHROPIC_API_URL);
        let endpoint = http::endpoint(base_url, "messages")?;
        let client = http::client(config.request_timeout_secs)?;

        let mut config = config;
        if config.model.is_empty() {
            config.model = DEFAULT_MODEL.to_string();
        }

        Ok(Self {
            client,
            api_key,
            endpoint,
            config,
        })
    }

    /// Lift system messages out and fold the rest into alternating turns.
    fn convert_messages(messages: &[Message]) -> (Option<String>, Vec<AnthropicMessage>) {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == MessageRole::System)
            .map(|m| m.content.as_str())
            .filter(|c| !c.trim().is_empty())
            .collect();
        let system = (!system.is_empty()).then(|| system.join("\n\n"));

        let mut converted: Vec<AnthropicMessage> = Vec::new();
        for msg in messages.iter().filter(|m| m.role != MessageRole::System) {
            let (role, blocks) = match msg.role {
                MessageRole::Assistant => {
                    let mut blocks = Vec::new();
                    if !msg.content.trim().is_empty() {
                        blocks.push(RequestBlock::Text {
                            text: msg.content.clone(),
                        });
                    }
                    blocks.extend(msg.tool_calls.iter().map(|call| RequestBlock::ToolUse {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        input: call.arguments.clone(),
                    }));
                    ("assistant", blocks)
                }
                MessageRole::Tool => match &msg.tool_call_id {
                    Some(id) => (
                        "user",
                        vec![RequestBlock::ToolResult {
                            tool_use_id: id.clone(),
                            content: msg.content.clone(),
                        }],
                    ),
                    None => (
                        "user",
                        vec![RequestBlock::Text {
                            text: msg.content.clone(),
                        }],
                    ),
                },
                _ => (
                    "user",
                    if msg.content.trim().is_empty() {
                        Vec::new()
                    } else {
                        vec![RequestBlock::Text {
                            text: msg.content.clone(),
                        }]
                    },
                ),
            };
            if blocks.is_empty() {
                continue;
            }
            match converted.last_mut() {
                Some(last) if last.role == role => last.content.extend(blocks),
                _ => converted.push(AnthropicMessage {
                    role,
                    content: blocks,
                }),
            }
        }
        (system, converted)
    }

    fn tool_choice_value(choice: &ToolChoice) -> Value {
        match choice {
            ToolChoice::Auto => json!({"type": "auto"}),
            ToolChoice::None => json!({"type": "none"}),
            ToolChoice::Required => json!({"type": "any"}),
            ToolChoice::Specific(name) => json!({"type": "tool", "name": name}),
        }
    }

    // No native JSON mode; callers that need JSON ask for it in the prompt.
    fn build_request(
        &self,
        messages: &[Message],
        tools: &[Tool],
        tool_choice: Option<&ToolChoice>,
        options: GenerationOptions,
    ) -> AnthropicRequest {
        let (system, messages) = Self::convert_messages(messages);
        let tools: Vec<AnthropicTool> = tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.parameters.clone(),
            })
            .collect();
        let tool_choice = if tools.is_empty() {
            None
        } else {
            tool_choice.map(Self::tool_choice_value)
        };

        AnthropicRequest {
            model: self.config.model.clone(),
            max_tokens: options.max_tokens.unwrap_or(self.config.max_tokens),
            temperature: Some(options.temperature.unwrap_or(self.config.temperature)),
            top_p: options.top_p,
            system,
            messages,
            tools,
            tool_choice,
        }
    }

    fn parse_response(body: &str) -> MnemosResult<LlmResponse> {
        let response: AnthropicResponse = serde_json::from_str(body).map_err(|e| {
            MnemosError::llm_invalid_response(format!("Failed to parse Anthropic response: {}", e))
        })?;

        let mut text = Vec::new();
        let mut tool_calls = Vec::new();
        for block in response.content {
            match block {
                ResponseBlock::Text { text: t } => text.push(t),
                ResponseBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCall::new(id, name, input))
                }
                ResponseBlock::Other => {}
            }
        }

        Ok(LlmResponse {
            content: (!text.is_empty()).then(|| text.join("")),
            tool_calls,
            usage: response
                .usage
                .map(|u| TokenUsage::new(u.input_tokens, u.output_tokens)),
        })
    }

    async fn send(&self, request: AnthropicRequest) -> MnemosResult<LlmResponse> {
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending messages request"
        );
        let response = self
            .client
            .post(self.endpoint.clone())
            .header("x-api-key", self.api_key.expose_secret().as_str())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| http::map_send_error(PROVIDER, e))?;

        let body = http::read_body(PROVIDER, response, |body| {
            serde_json::from_str::<AnthropicError>(body)
                .ok()
                .map(|e| e.error.message)
        })
        .await?;
        Self::parse_response(&body)
    }
}

#[async_trait]
impl Llm for AnthropicLlm {
    async fn generate(
        &self,
        messages: &[Message],
        options: Option<GenerationOptions>,
    ) -> MnemosResult<LlmResponse> {
        let request = self.build_request(messages, &[], None, options.unwrap_or_default());
        self.send(request).await
    }

    async fn generate_with_tools(
        &self,
        messages: &[Message],
        tools: &[Tool],
        tool_choice: ToolChoice,
        options: Option<GenerationOptions>,
    ) -> MnemosResult<LlmResponse> {
        let request =
            self.build_request(messages, tools, Some(&tool_choice), options.unwrap_or_default());
        self.send(request).await
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}
