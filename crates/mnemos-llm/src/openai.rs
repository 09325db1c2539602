//! OpenAI chat-completions backend.

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use mnemos_core::error::{MnemosError, MnemosResult};
use mnemos_core::traits::{
    GenerationOptions, Llm, LlmConfig, LlmResponse, ResponseFormat, TokenUsage, Tool, ToolCall,
    ToolChoice,
};
use mnemos_core::types::{Message, MessageRole};

use crate::http;

const OPENAI_API_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4.1-mini";
const PROVIDER: &str = "OpenAI";

/// OpenAI (or OpenAI-compatible) reasoning engine.
pub struct OpenAILlm {
    client: reqwest::Client,
    api_key: SecretString,
    endpoint: Url,
    config: LlmConfig,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ChatTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ChatToolCall>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    call_type: String,
    function: ChatFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatFunctionCall {
    name: String,
    /// JSON-encoded arguments.
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ChatTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: ChatFunction,
}

#[derive(Debug, Serialize)]
struct ChatFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ChatToolCall>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    error: OpenAIErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorDetail {
    message: String,
}

fn function_type() -> String {
    "function".to_string()
}

impl OpenAILlm {
    pub fn new(config: LlmConfig) -> MnemosResult<Self> {
        let api_key = http::resolve_api_key(config.api_key.as_deref(), "OPENAI_API_KEY", PROVIDER)?;
        let base_url = config.base_url.as_deref().unwrap_or(OPENAI_API_URL);
        let endpoint = http::endpoint(base_url, "chat/completions")?;
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

    /// Reasoning models reject sampling parameters and `max_tokens`.
    fn is_reasoning_model(&self) -> bool {
        let model = self.config.model.to_lowercase();
        ["o1", "o3", "o4", "gpt-5"].iter().any(|m| model.starts_with(m))
    }

    fn to_chat_message(msg: &Message) -> ChatMessage {
        let role = match msg.role {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        };
        let tool_calls = msg
            .tool_calls
            .iter()
            .map(|call| ChatToolCall {
                id: call.id.clone(),
                call_type: function_type(),
                function: ChatFunctionCall {
                    name: call.name.clone(),
                    arguments: call.arguments.to_string(),
                },
            })
            .collect::<Vec<_>>();

        // An assistant message carrying only tool calls must send null content.
        let content = if msg.content.is_empty() && !tool_calls.is_empty() {
            None
        } else {
            Some(msg.content.clone())
        };

        ChatMessage {
            role,
            content,
            name: match msg.role {
                MessageRole::Tool => None,
                _ => msg.name.clone(),
            },
            tool_call_id: msg.tool_call_id.clone(),
            tool_calls,
        }
    }

    fn to_chat_tool(tool: &Tool) -> ChatTool {
        ChatTool {
            tool_type: "function",
            function: ChatFunction {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.parameters.clone(),
            },
        }
    }

    fn tool_choice_value(choice: &ToolChoice) -> Value {
        match choice {
            ToolChoice::Auto => Value::from("auto"),
            ToolChoice::None => Value::from("none"),
            ToolChoice::Required => Value::from("required"),
            ToolChoice::Specific(name) => serde_json::json!({
                "type": "function",
                "function": {"name": name}
            }),
        }
    }

    fn build_request(
        &self,
        messages: &[Message],
        tools: &[Tool],
        tool_choice: Option<&ToolChoice>,
        options: GenerationOptions,
    ) -> ChatRequest {
        let mut request = ChatRequest {
            model: self.config.model.clone(),
            messages: messages.iter().map(Self::to_chat_message).collect(),
            tools: tools.iter().map(Self::to_chat_tool).collect(),
            tool_choice: None,
            temperature: None,
            top_p: None,
            max_tokens: None,
            max_completion_tokens: None,
            response_format: match options.response_format {
                Some(ResponseFormat::Json) => Some(serde_json::json!({"type": "json_object"})),
                _ => None,
            },
        };
        if !request.tools.is_empty() {
            request.tool_choice = tool_choice.map(Self::tool_choice_value);
        }

        let max_tokens = options.max_tokens.unwrap_or(self.config.max_tokens);
        if self.is_reasoning_model() {
            request.max_completion_tokens = Some(max_tokens);
        } else {
            request.temperature = Some(options.temperature.unwrap_or(self.config.temperature));
            request.top_p = Some(options.top_p.unwrap_or(self.config.top_p));
            request.max_tokens = Some(max_tokens);
        }
        request
    }

    fn parse_response(body: &str) -> MnemosResult<LlmResponse> {
        let response: ChatResponse = serde_json::from_str(body).map_err(|e| {
            MnemosError::llm_invalid_response(format!("Failed to parse OpenAI response: {}", e))
        })?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| MnemosError::llm_invalid_response("No response choices returned"))?;

        let tool_calls = choice
            .message
            .tool_calls
            .into_iter()
            .map(|call| {
                let arguments = if call.function.arguments.trim().is_empty() {
                    Value::Object(Default::default())
                } else {
                    serde_json::from_str(&call.function.arguments).unwrap_or_else(|e| {
                        warn!(tool = %call.function.name, error = %e, "Tool arguments are not valid JSON");
                        Value::String(call.function.arguments.clone())
                    })
                };
                ToolCall::new(call.id, call.function.name, arguments)
            })
            .collect();

        Ok(LlmResponse {
            content: choice.message.content,
            tool_calls,
            usage: response
                .usage
                .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens)),
        })
    }

    async fn send(&self, request: ChatRequest) -> MnemosResult<LlmResponse> {
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending chat completion"
        );
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(reqwest::header::AUTHORIZATION, http::bearer(&self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| http::map_send_error(PROVIDER, e))?;

        let body = http::read_body(PROVIDER, response, |body| {
            serde_json::from_str::<OpenAIError>(body)
                .ok()
                .map(|e| e.error.message)
        })
        .await?;
        Self::parse_response(&body)
    }
}

#[async_trait]
impl Llm for OpenAILlm {
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn llm(model: &str) -> OpenAILlm {
        OpenAILlm::new(LlmConfig {
            model: model.to_string(),
            api_key: Some("sk-test".to_string()),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_tool_round_trip_messages() {
        let call = ToolCall::new("call_1", "search_memory", json!({"query": "tea"}));
        let messages = vec![
            Message::system("be brief"),
            Message::user("what tea do I like?"),
            Message::assistant_tool_calls("", vec![call]),
            Message::tool("call_1", "search_memory", "- [preference] oolong"),
        ];
        let tools = vec![Tool::new("search_memory", "Search", json!({"type": "object"}))];
        let request = llm("gpt-4.1-mini").build_request(
            &messages,
            &tools,
            Some(&ToolChoice::Auto),
            GenerationOptions::default(),
        );
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["messages"][0]["role"], "system");
        assert!(value["messages"][2]["content"].is_null());
        assert_eq!(
            value["messages"][2]["tool_calls"][0]["function"]["arguments"],
            r#"{"query":"tea"}"#
        );
        assert_eq!(value["messages"][3]["role"], "tool");
        assert_eq!(value["messages"][3]["tool_call_id"], "call_1");
        assert!(value["messages"][3].get("name").is_none());
        assert_eq!(value["tools"][0]["function"]["name"], "search_memory");
        assert_eq!(value["tool_choice"], "auto");
        assert_eq!(value["max_tokens"], 2000);
    }

    #[test]
    fn test_reasoning_model_omits_sampling() {
        let options = GenerationOptions {
            temperature: Some(0.0),
            response_format: Some(ResponseFormat::Json),
            ..Default::default()
        };
        let request = llm("o3-mini").build_request(&[Message::user("hi")], &[], None, options);
        let value = serde_json::to_value(&request).unwrap();

        assert!(value.get("temperature").is_none());
        assert!(value.get("max_tokens").is_none());
        assert_eq!(value["max_completion_tokens"], 2000);
        assert_eq!(value["response_format"]["type"], "json_object");
        assert!(value.get("tools").is_none());
        assert!(value.get("tool_choice").is_none());
    }

    #[test]
    fn test_parse_tool_calls_and_usage() {
        let body = r#"{
            "choices": [{"message": {"role": "assistant", "content": null, "tool_calls": [
                {"id": "call_9", "type": "function", "function": {"name": "log_measurement", "arguments": "{\"kind\":\"weight\",\"value\":80,\"unit\":\"kg\"}"}}
            ]}}],
            "usage": {"prompt_tokens": 120, "completion_tokens": 18, "total_tokens": 138}
        }"#;
        let response = OpenAILlm::parse_response(body).unwrap();
        assert!(response.content.is_none());
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].arguments["value"], 80);
        assert_eq!(response.usage.unwrap().total_tokens, 138);
    }

    #[test]
    fn test_empty_choices_is_invalid_response() {
        let err = OpenAILlm::parse_response(r#"{"choices": []}"#).unwrap_err();
        assert!(matches!(err, MnemosError::Llm { .. }));
    }

    #[test]
    fn test_default_model_filled_in() {
        assert_eq!(llm("").model_name(), DEFAULT_MODEL);
    }
}
