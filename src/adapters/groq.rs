use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestMessageContentPartImage, ChatCompletionRequestMessageContentPartText,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionRequestUserMessageContent, ChatCompletionRequestUserMessageContentPart,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs, ImageDetail, ImageUrl,
};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde_json::Value;
use tracing::debug;

use super::{build_client, json_or_upstream, trim_base, DEFAULT_TIMEOUT};
use crate::error::{AvaBotError, Result};
use crate::interfaces::services::{ChatModel, ChatRole, ChatTurn, ImageSource};

pub const DEFAULT_VISION_PROMPT: &str = "¿Qué hay en esta imagen?";

/// Groq speaks the OpenAI chat-completions dialect, so requests are built
/// with `async-openai` types and posted directly.
pub struct GroqClient {
    api_key: String,
    base_url: String,
    model: String,
    vision_model: String,
    client: reqwest::Client,
}

impl GroqClient {
    pub fn new(api_key: &str, base_url: &str, model: &str, vision_model: &str) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(AvaBotError::Config("GROQ_API_KEY is empty".to_string()));
        }
        Ok(Self {
            api_key: api_key.trim().to_string(),
            base_url: trim_base(base_url),
            model: model.to_string(),
            vision_model: vision_model.to_string(),
            client: build_client(DEFAULT_TIMEOUT)?,
        })
    }

    async fn send(&self, request: &CreateChatCompletionRequest) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;
        let body = json_or_upstream(response).await?;
        extract_text(&body).ok_or_else(|| AvaBotError::Runtime("empty chat response".to_string()))
    }
}

pub fn extract_text(response: &Value) -> Option<String> {
    response
        .pointer("/choices/0/message/content")
        .and_then(|v| v.as_str())
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

fn system_message(prompt: &str) -> Result<ChatCompletionRequestMessage> {
    let message = ChatCompletionRequestSystemMessageArgs::default()
        .content(prompt)
        .build()
        .map_err(|e| AvaBotError::Runtime(e.to_string()))?;
    Ok(ChatCompletionRequestMessage::System(message))
}

fn user_message(text: &str) -> Result<ChatCompletionRequestMessage> {
    let message = ChatCompletionRequestUserMessageArgs::default()
        .content(ChatCompletionRequestUserMessageContent::Text(text.to_string()))
        .build()
        .map_err(|e| AvaBotError::Runtime(e.to_string()))?;
    Ok(ChatCompletionRequestMessage::User(message))
}

fn assistant_message(text: &str) -> Result<ChatCompletionRequestMessage> {
    let message = ChatCompletionRequestAssistantMessageArgs::default()
        .content(text)
        .build()
        .map_err(|e| AvaBotError::Runtime(e.to_string()))?;
    Ok(ChatCompletionRequestMessage::Assistant(message))
}

pub fn image_url(image: &ImageSource) -> String {
    match image {
        ImageSource::Url(url) => url.clone(),
        ImageSource::Png(bytes) => format!(
            "data:image/png;base64,{}",
            general_purpose::STANDARD.encode(bytes)
        ),
    }
}

pub fn build_conversation(
    system: &str,
    history: &[ChatTurn],
    user: &str,
) -> Result<Vec<ChatCompletionRequestMessage>> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    if !system.trim().is_empty() {
        messages.push(system_message(system)?);
    }
    for turn in history {
        messages.push(match turn.role {
            ChatRole::User => user_message(&turn.content)?,
            ChatRole::Assistant => assistant_message(&turn.content)?,
        });
    }
    messages.push(user_message(user)?);
    Ok(messages)
}

#[async_trait]
impl ChatModel for GroqClient {
    async fn complete(&self, system: &str, history: &[ChatTurn], user: &str) -> Result<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(self.model.clone())
            .messages(build_conversation(system, history, user)?)
            .build()
            .map_err(|e| AvaBotError::Runtime(e.to_string()))?;
        debug!(model = %self.model, turns = history.len(), "sending chat completion");
        self.send(&request).await
    }

    async fn describe_image(&self, prompt: &str, image: &ImageSource) -> Result<String> {
        let prompt = if prompt.trim().is_empty() {
            DEFAULT_VISION_PROMPT
        } else {
            prompt
        };
        let parts = vec![
            ChatCompletionRequestUserMessageContentPart::Text(
                ChatCompletionRequestMessageContentPartText {
                    text: prompt.to_string(),
                },
            ),
            ChatCompletionRequestUserMessageContentPart::ImageUrl(
                ChatCompletionRequestMessageContentPartImage {
                    image_url: ImageUrl {
                        url: image_url(image),
                        detail: Some(ImageDetail::Auto),
                    },
                },
            ),
        ];
        let message = ChatCompletionRequestUserMessageArgs::default()
            .content(ChatCompletionRequestUserMessageContent::Array(parts))
            .build()
            .map_err(|e| AvaBotError::Runtime(e.to_string()))?;
        let request = CreateChatCompletionRequestArgs::default()
            .model(self.vision_model.clone())
            .messages(vec![ChatCompletionRequestMessage::User(message)])
            .build()
            .map_err(|e| AvaBotError::Runtime(e.to_string()))?;
        debug!(model = %self.vision_model, "sending vision request");
        self.send(&request).await
    }
}
