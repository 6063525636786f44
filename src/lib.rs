//! Personal chat web server backed by the OpenAI API - Library exports for testing

pub mod api;
pub mod core;
pub mod infrastructure;

use crate::core::assistant::CompletionTask;
use tokio::sync::OnceCell;
use tokio::sync::mpsc;

pub static TASK_SENDER: OnceCell<mpsc::Sender<CompletionTask>> = OnceCell::const_new();
