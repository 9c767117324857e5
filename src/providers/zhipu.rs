//! Chat completions de Zhipu AI (GLM).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{post_json, RetryPolicy};
use crate::error::AdapterError;
use crate::llm::{ChatMessage, GenerationOptions, LanguageModel};

const ADAPTER: &str = "zhipu-chat";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    top_p: f64,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

fn first_content(response: ChatResponse) -> Result<String, AdapterError> {
    if let Some(error) = response.error {
        return Err(AdapterError::unavailable(ADAPTER, error));
    }
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| AdapterError::invalid_response(ADAPTER, "respuesta sin choices[0].message.content"))
}

pub struct ZhipuChat {
    client: reqwest::Client,
    api_key: String,
    model: String,
    url: String,
    retry: RetryPolicy,
}

impl ZhipuChat {
    pub fn new(client: reqwest::Client, api_key: String, model: String, url: String, retry: RetryPolicy) -> Self {
        Self { client, api_key, model, url, retry }
    }

    async fn request(&self, messages: &[ChatMessage], options: &GenerationOptions) -> Result<String, AdapterError> {
        let body = ChatRequest {
            model: &self.model,
            messages,
            temperature: options.temperature,
            top_p: options.top_p,
        };
        let response: ChatResponse = post_json(&self.client, ADAPTER, &self.url, &self.api_key, &body).await?;
        first_content(response)
    }
}

#[async_trait]
impl LanguageModel for ZhipuChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn chat(&self, messages: &[ChatMessage], options: &GenerationOptions) -> Result<String, AdapterError> {
        if messages.is_empty() {
            return Err(AdapterError::EmptyInput("chat"));
        }
        self.retry.run(ADAPTER, || self.request(messages, options)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_carries_sampling_options() {
        let messages = vec![ChatMessage::user("什么是不可抗力？")];
        let body = ChatRequest {
            model: "GLM-4-Plus",
            messages: &messages,
            temperature: 0.3,
            top_p: 0.9,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({
                "model": "GLM-4-Plus",
                "messages": [{"role": "user", "content": "什么是不可抗力？"}],
                "temperature": 0.3,
                "top_p": 0.9
            })
        );
    }

    #[test]
    fn extracts_first_choice() {
        let response: ChatResponse = serde_json::from_value(json!({
            "id": "x",
            "choices": [{"index": 0, "finish_reason": "stop", "message": {"role": "assistant", "content": "不可抗力是指..."}}]
        }))
        .unwrap();
        assert_eq!(first_content(response).unwrap(), "不可抗力是指...");
    }

    #[test]
    fn missing_content_is_an_error_not_an_empty_answer() {
        let response: ChatResponse = serde_json::from_value(json!({ "choices": [] })).unwrap();
        assert!(matches!(first_content(response), Err(AdapterError::InvalidResponse { .. })));

        let response: ChatResponse =
            serde_json::from_value(json!({ "error": {"code": "1113", "message": "余额不足"} })).unwrap();
        assert!(matches!(first_content(response), Err(AdapterError::Unavailable { .. })));
    }
}
