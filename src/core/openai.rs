//! OpenAI REST client.
//!
//! The request and response structures are kept compatible with the OpenAI
//! API specification; only the fields this application reads are declared.

use anyhow::anyhow;
use di::{inject, injectable};
use futures_util::{Stream, StreamExt};
use log::debug;
use serde::{Deserialize, Serialize};
use std::env;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// A single message in a chat completion payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionMessage {
    pub role: String,
    pub content: String,
}

impl ChatCompletionMessage {
    pub fn user(content: String) -> ChatCompletionMessage {
        ChatCompletionMessage {
            role: "user".to_owned(),
            content,
        }
    }
}

/// Request body for `POST /chat/completions`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatCompletionMessage>,
    pub stream: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    pub message: ChatCompletionMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkChoice {
    pub delta: ChunkDelta,
    pub finish_reason: Option<String>,
}

/// One `data:` frame of a streamed chat completion.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionChunk {
    pub choices: Vec<ChunkChoice>,
}

/// Request body for `POST /images/generations`.
#[derive(Debug, Clone, Serialize)]
pub struct ImageGenerationRequest {
    pub model: String,
    pub prompt: String,
    pub n: u32,
    pub size: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageData {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageGenerationResponse {
    pub data: Vec<ImageData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptionResponse {
    pub text: String,
}

/// Extracts the content delta from one streamed `data:` payload.
///
/// Frames without content (role announcements, finish markers) and frames
/// that fail to parse yield `None`.
pub fn delta_content(data: &str) -> Option<String> {
    let chunk: ChatCompletionChunk = serde_json::from_str(data).ok()?;
    chunk.choices.into_iter().next()?.delta.content
}

/// Strips the decoration models like to put around a generated title.
pub fn tidy_title(raw: &str) -> String {
    raw.trim().trim_matches('"').trim().to_owned()
}

pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    chat_model: String,
    title_model: String,
    image_model: String,
    transcribe_model: String,
}

#[injectable]
impl OpenAiClient {
    #[inject]
    pub fn create() -> OpenAiClient {
        OpenAiClient::from_env()
    }
}

impl OpenAiClient {
    pub fn from_env() -> OpenAiClient {
        dotenvy::dotenv().ok();
        let api_key = env::var("OPENAI_API_KEY").expect("OPENAI_API_KEY must be set");

        OpenAiClient {
            http: reqwest::Client::new(),
            base_url: env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_owned()),
            api_key,
            chat_model: env::var("OPENAI_CHAT_MODEL").unwrap_or_else(|_| "gpt-4o".to_owned()),
            title_model: env::var("OPENAI_TITLE_MODEL")
                .unwrap_or_else(|_| "gpt-3.5-turbo".to_owned()),
            image_model: env::var("OPENAI_IMAGE_MODEL").unwrap_or_else(|_| "dall-e-3".to_owned()),
            transcribe_model: env::var("OPENAI_TRANSCRIBE_MODEL")
                .unwrap_or_else(|_| "whisper-1".to_owned()),
        }
    }

    /// Non-streaming chat completion; returns the assistant text.
    pub async fn chat(&self, messages: Vec<ChatCompletionMessage>) -> anyhow::Result<String> {
        self.complete(&self.chat_model, messages).await
    }

    /// Streaming chat completion; yields assistant content deltas.
    pub async fn chat_stream(
        &self,
        messages: Vec<ChatCompletionMessage>,
    ) -> anyhow::Result<impl Stream<Item = anyhow::Result<String>> + Send> {
        let request = ChatCompletionRequest {
            model: self.chat_model.clone(),
            messages,
            stream: true,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("chat completion failed ({status}): {body}"));
        }

        let mut byte_stream = response.bytes_stream();

        Ok(async_stream::try_stream! {
            let mut buffer = String::new();

            while let Some(chunk) = byte_stream.next().await {
                let chunk = chunk.map_err(|e| anyhow!("stream read error: {e}"))?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline_pos) = buffer.find('\n') {
                    let line = buffer[..newline_pos].trim().to_string();
                    buffer.drain(..=newline_pos);

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if data == "[DONE]" {
                        return;
                    }
                    if let Some(content) = delta_content(data) {
                        yield content;
                    }
                }
            }
        })
    }

    /// Generates a short conversation title from the first exchange.
    pub async fn generate_title(
        &self,
        user_prompt: &str,
        assistant_reply: &str,
    ) -> anyhow::Result<String> {
        let prompt = format!(
            "Generate a short title (5 words maximum) for the following conversation: User: {user_prompt}\nAssistant: {assistant_reply}"
        );
        let raw = self
            .complete(&self.title_model, vec![ChatCompletionMessage::user(prompt)])
            .await?;
        Ok(tidy_title(&raw))
    }

    /// Generates one image and returns its URL.
    pub async fn generate_image(&self, prompt: &str, size: &str) -> anyhow::Result<String> {
        let request = ImageGenerationRequest {
            model: self.image_model.clone(),
            prompt: prompt.to_owned(),
            n: 1,
            size: size.to_owned(),
        };

        let response = self
            .http
            .post(format!("{}/images/generations", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("image generation failed ({status}): {body}"));
        }

        let response: ImageGenerationResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("failed to parse image response: {e}"))?;

        response
            .data
            .into_iter()
            .next()
            .map(|image| image.url)
            .ok_or_else(|| anyhow!("image response contained no images"))
    }

    /// Speech-to-text transcription of an uploaded audio file.
    pub async fn transcribe(&self, file_name: String, bytes: Vec<u8>) -> anyhow::Result<String> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let form = reqwest::multipart::Form::new()
            .text("model", self.transcribe_model.clone())
            .part("file", part);

        let response = self
            .http
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("transcription failed ({status}): {body}"));
        }

        let response: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("failed to parse transcription response: {e}"))?;

        Ok(response.text)
    }

    async fn complete(
        &self,
        model: &str,
        messages: Vec<ChatCompletionMessage>,
    ) -> anyhow::Result<String> {
        let request = ChatCompletionRequest {
            model: model.to_owned(),
            messages,
            stream: false,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("chat completion failed ({status}): {body}"));
        }

        let response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("failed to parse chat response: {e}"))?;

        debug!("completion {} finished", response.id);

        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("chat response contained no choices"))
    }
}
