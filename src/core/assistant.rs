//! LLM relay service.
//!
//! Completion requests are serialized through a single background task that
//! talks to the OpenAI API and forwards streamed tokens back to the caller
//! over a channel.

use crate::core::openai::{ChatCompletionMessage, OpenAiClient};
use crate::infrastructure::entities;
use futures_util::StreamExt;
use log::{error, info};
use tokio::sync::mpsc;

pub struct CompletionTask {
    messages: Vec<ChatMessage>,
    return_channel: mpsc::Sender<String>,
}

impl CompletionTask {
    pub fn new(messages: Vec<ChatMessage>) -> (CompletionTask, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel::<String>(1000);

        (
            CompletionTask {
                messages,
                return_channel: sender,
            },
            receiver,
        )
    }

    pub fn request_messages(&self) -> Vec<ChatCompletionMessage> {
        self.messages
            .iter()
            .map(ChatMessage::as_request_message)
            .collect()
    }

    /// Forwards one reply fragment to the requesting stream.
    ///
    /// Fails when the receiving side is gone, which means the client
    /// disconnected mid-stream.
    pub async fn send_part(&self, part: String) -> Result<(), mpsc::error::SendError<String>> {
        self.return_channel.send(part).await
    }
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    role: Role,
    content: String,
}

impl ChatMessage {
    pub fn as_request_message(&self) -> ChatCompletionMessage {
        ChatCompletionMessage {
            role: match self.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::System => "system",
            }
            .to_owned(),
            content: self.content.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Role {
    User,
    Assistant,
    System,
}

impl From<entities::Message> for ChatMessage {
    fn from(m: entities::Message) -> Self {
        Self {
            content: m.content,
            role: match m.kind {
                entities::MessageKind::System => Role::System,
                entities::MessageKind::User => Role::User,
                entities::MessageKind::Bot => Role::Assistant,
            },
        }
    }
}

pub async fn background_task(mut task_queue: mpsc::Receiver<CompletionTask>) -> () {
    let client = OpenAiClient::from_env();
    info!("Relay task ready.");

    loop {
        match task_queue.recv().await {
            None => {
                return;
            }
            Some(task) => {
                match client.chat_stream(task.request_messages()).await {
                    Ok(stream) => {
                        futures_util::pin_mut!(stream);

                        while let Some(part) = stream.next().await {
                            match part {
                                Ok(content) => {
                                    // A closed channel means the client went
                                    // away; stop forwarding this task.
                                    if task.send_part(content).await.is_err() {
                                        break;
                                    }
                                }
                                Err(e) => {
                                    error!("{e}");
                                    let _ = task.send_part(format!("An error occurred: {e}")).await;
                                    break;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!("{e}");
                        let _ = task.send_part(format!("An error occurred: {e}")).await;
                    }
                }
            }
        }
    }
}
