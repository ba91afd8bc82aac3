use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::error::Result;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailSummary {
    pub id: String,
    pub thread_id: Option<String>,
    pub sender: String,
    pub subject: String,
    pub date: String,
    pub snippet: String,
    pub message_id: Option<String>,
    pub references: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReplyRequest {
    pub email_id: String,
    pub thread_id: Option<String>,
    pub to: String,
    pub subject: String,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
    pub body: String,
}

impl ReplyRequest {
    /// Addresses the original sender on the same thread, with `Re:` added
    /// once and the message-id chained into `References`.
    pub fn answering(original: &EmailSummary, body: &str) -> Self {
        let subject = if original.subject.to_lowercase().starts_with("re:") {
            original.subject.clone()
        } else {
            format!("Re: {}", original.subject)
        };
        let references = match (&original.references, &original.message_id) {
            (Some(refs), Some(id)) if !refs.trim().is_empty() => Some(format!("{refs} {id}")),
            (_, Some(id)) => Some(id.clone()),
            (Some(refs), None) => Some(refs.clone()),
            (None, None) => None,
        };
        Self {
            email_id: original.id.clone(),
            thread_id: original.thread_id.clone(),
            to: original.sender.clone(),
            subject,
            in_reply_to: original.message_id.clone(),
            references,
            body: body.to_string(),
        }
    }
}

#[async_trait]
pub trait MailService: Send + Sync {
    async fn list_messages(&self, query: &str, max_results: u32) -> Result<Vec<EmailSummary>>;
    async fn send_reply(&self, request: &ReplyRequest) -> Result<Value>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NewEvent {
    pub summary: String,
    pub description: Option<String>,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub timezone: String,
    pub attendees: Vec<String>,
    pub with_meet: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedEvent {
    pub id: String,
    pub html_link: Option<String>,
    pub meet_link: Option<String>,
    pub status: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEntry {
    pub id: String,
    pub summary: String,
    /// `dateTime` for timed events, `date` for all-day ones.
    pub start: String,
    pub end: String,
    pub attendees: Vec<String>,
    pub html_link: Option<String>,
}

#[async_trait]
pub trait CalendarService: Send + Sync {
    async fn list_events(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
        max_results: u32,
    ) -> Result<Vec<CalendarEntry>>;
    async fn create_event(&self, event: &NewEvent) -> Result<CreatedEvent>;
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveFile {
    pub id: String,
    pub name: Option<String>,
    pub mime_type: Option<String>,
    pub web_view_link: Option<String>,
}

#[async_trait]
pub trait DriveService: Send + Sync {
    async fn upload_file(&self, path: &Path, folder_id: Option<&str>) -> Result<DriveFile>;
    async fn list_files(&self, query: Option<&str>) -> Result<Vec<DriveFile>>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub link: String,
    pub snippet: String,
    pub display_link: String,
}

#[async_trait]
pub trait SearchService: Send + Sync {
    fn name(&self) -> &str;
    async fn search(&self, query: &str, max_results: u32) -> Result<Vec<SearchResult>>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PaymentLinkRequest {
    pub name: String,
    pub description: String,
    pub amount_in_cents: u64,
    pub currency: String,
    pub expires_in_minutes: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentLink {
    pub id: String,
    pub url: String,
    pub reference: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TransactionRequest {
    pub amount_in_cents: u64,
    pub currency: String,
    pub customer_email: String,
    pub payment_method: Value,
    pub reference: Option<String>,
    pub redirect_url: Option<String>,
}

#[async_trait]
pub trait PaymentService: Send + Sync {
    async fn create_transaction(&self, request: &TransactionRequest) -> Result<Value>;
    async fn get_transaction(&self, transaction_id: &str) -> Result<Value>;
    async fn create_payment_link(&self, request: &PaymentLinkRequest) -> Result<PaymentLink>;
    fn verify_webhook(&self, body: &[u8], signature: &str) -> bool;
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GeneratedImage {
    pub path: PathBuf,
    pub metadata_path: PathBuf,
    pub prompt_used: String,
    pub model: String,
    pub generation_seconds: f64,
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, style: &str) -> Result<GeneratedImage>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImageSource {
    Url(String),
    Png(Vec<u8>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, system: &str, history: &[ChatTurn], user: &str) -> Result<String>;
    async fn describe_image(&self, prompt: &str, image: &ImageSource) -> Result<String>;
}
