//! Contrato del modelo de lenguaje usado para sintetizar respuestas.
//! Los proveedores concretos viven en `providers`.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::config::RagParams;
use crate::error::AdapterError;

/// Parámetros de muestreo que se pasan tal cual al modelo remoto.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f64,
    pub top_p: f64,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        // Baja aleatoriedad para respuestas legales.
        Self {
            temperature: 0.3,
            top_p: 0.9,
        }
    }
}

impl From<&RagParams> for GenerationOptions {
    fn from(params: &RagParams) -> Self {
        Self {
            temperature: params.temperature,
            top_p: params.top_p,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

pub type TextStream = BoxStream<'static, Result<String, AdapterError>>;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn chat(&self, messages: &[ChatMessage], options: &GenerationOptions) -> Result<String, AdapterError>;

    async fn complete(&self, prompt: &str, options: &GenerationOptions) -> Result<String, AdapterError> {
        self.chat(&[ChatMessage::user(prompt)], options).await
    }

    /// Ningún proveedor admite streaming: falla en el acto.
    fn stream_complete(&self, _prompt: &str, _options: &GenerationOptions) -> Result<TextStream, AdapterError> {
        Err(AdapterError::Unsupported("stream_complete"))
    }

    fn stream_chat(&self, _messages: &[ChatMessage], _options: &GenerationOptions) -> Result<TextStream, AdapterError> {
        Err(AdapterError::Unsupported("stream_chat"))
    }
}
