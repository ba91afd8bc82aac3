use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine as _;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{build_client, json_or_upstream, trim_base, DEFAULT_TIMEOUT};
use crate::credentials::GoogleAuth;
use crate::error::{AvaBotError, Result};
use crate::interfaces::services::{EmailSummary, MailService, ReplyRequest};

pub const DEFAULT_LIST_LIMIT: u32 = 5;
const METADATA_HEADERS: [&str; 5] = ["From", "Subject", "Date", "Message-ID", "References"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Period {
    Today,
    Yesterday,
    Week,
    Month,
}

impl Period {
    fn query(self) -> &'static str {
        match self {
            Period::Today => "newer_than:1d",
            Period::Yesterday => "older_than:1d newer_than:2d",
            Period::Week => "newer_than:7d",
            Period::Month => "newer_than:30d",
        }
    }
}

/// Structured Gmail search, rendered into Gmail's query syntax.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailSearch {
    pub period: Option<Period>,
    pub unread_only: bool,
    pub important_only: bool,
    pub has_attachment: bool,
    pub sender: Option<String>,
    pub keywords: Vec<String>,
    pub label: Option<String>,
    pub max_results: u32,
}

impl Default for EmailSearch {
    fn default() -> Self {
        Self {
            period: None,
            unread_only: false,
            important_only: false,
            has_attachment: false,
            sender: None,
            keywords: Vec::new(),
            label: None,
            max_results: DEFAULT_LIST_LIMIT,
        }
    }
}

fn sender_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\b(?:de|from)\s+([A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}|[A-ZÁÉÍÓÚÑ][\wáéíóúñ]+)",
        )
        .unwrap()
    })
}

fn keyword_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\b(?:sobre|about|acerca de)\s+"?([^"?]+?)"?\s*\??$"#).unwrap()
    })
}

fn label_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(?:etiqueta|label)\s+([\w-]+)").unwrap())
}

impl EmailSearch {
    pub fn from_utterance(text: &str) -> Self {
        let lowered = text.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|needle| lowered.contains(needle));

        let period = if has(&["hoy", "today"]) {
            Some(Period::Today)
        } else if has(&["ayer", "yesterday"]) {
            Some(Period::Yesterday)
        } else if has(&["esta semana", "this week", "semana"]) {
            Some(Period::Week)
        } else if has(&["este mes", "this month"]) {
            Some(Period::Month)
        } else {
            None
        };

        Self {
            period,
            unread_only: has(&["no leído", "no leido", "sin leer", "unread"]),
            important_only: has(&["importante", "urgente", "important"]),
            has_attachment: has(&["adjunto", "attachment"]),
            sender: sender_regex()
                .captures(text)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string()),
            keywords: keyword_regex()
                .captures(text)
                .and_then(|caps| caps.get(1))
                .map(|m| vec![m.as_str().trim().to_string()])
                .unwrap_or_default(),
            label: label_regex()
                .captures(text)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string()),
            max_results: DEFAULT_LIST_LIMIT,
        }
    }

    pub fn to_query(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(period) = self.period {
            parts.push(period.query().to_string());
        }
        if self.unread_only {
            parts.push("is:unread".to_string());
        }
        if self.important_only {
            parts.push("is:important".to_string());
        }
        if self.has_attachment {
            parts.push("has:attachment".to_string());
        }
        if let Some(sender) = &self.sender {
            parts.push(format!("from:{sender}"));
        }
        for keyword in &self.keywords {
            if keyword.contains(' ') {
                parts.push(format!("\"{keyword}\""));
            } else {
                parts.push(keyword.clone());
            }
        }
        match &self.label {
            Some(label) => parts.push(format!("in:{label}")),
            None if parts.is_empty() => parts.push("in:inbox".to_string()),
            None => {}
        }
        parts.join(" ")
    }
}

pub fn format_listing(emails: &[EmailSummary]) -> String {
    let mut out = format!("Encontré {} correos:\n\n", emails.len());
    for (index, email) in emails.iter().enumerate() {
        out.push_str(&format!(
            "{}. De: {}\n   Asunto: {}\n   Fecha: {}\n   Resumen: {}\n\n",
            index + 1,
            email.sender,
            email.subject,
            email.date,
            email.snippet
        ));
    }
    out.push_str("Si quieres responder alguno, dime por ejemplo \"responder al correo 1\".");
    out
}

fn encode_header(value: &str) -> String {
    if value.is_ascii() {
        value.to_string()
    } else {
        format!("=?UTF-8?B?{}?=", STANDARD.encode(value))
    }
}

pub fn build_reply_mime(request: &ReplyRequest) -> String {
    let mut lines = vec![
        format!("To: {}", request.to),
        format!("Subject: {}", encode_header(&request.subject)),
    ];
    if let Some(in_reply_to) = &request.in_reply_to {
        lines.push(format!("In-Reply-To: {in_reply_to}"));
    }
    if let Some(references) = &request.references {
        lines.push(format!("References: {references}"));
    }
    lines.push("MIME-Version: 1.0".to_string());
    lines.push("Content-Type: text/plain; charset=\"UTF-8\"".to_string());
    lines.push("Content-Transfer-Encoding: base64".to_string());

    let encoded = STANDARD.encode(request.body.as_bytes());
    let body = encoded
        .as_bytes()
        .chunks(76)
        .map(|chunk| String::from_utf8_lossy(chunk).to_string())
        .collect::<Vec<_>>()
        .join("\r\n");
    format!("{}\r\n\r\n{}", lines.join("\r\n"), body)
}

fn header_value(message: &Value, name: &str) -> Option<String> {
    message
        .pointer("/payload/headers")
        .and_then(|headers| headers.as_array())?
        .iter()
        .find(|header| {
            header
                .get("name")
                .and_then(|n| n.as_str())
                .map(|n| n.eq_ignore_ascii_case(name))
                .unwrap_or(false)
        })
        .and_then(|header| header.get("value"))
        .and_then(|value| value.as_str())
        .map(str::to_string)
}

fn summary_from_message(message: &Value) -> Result<EmailSummary> {
    let id = message
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AvaBotError::Serialization("gmail message without id".to_string()))?;
    Ok(EmailSummary {
        id: id.to_string(),
        thread_id: message
            .get("threadId")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        sender: header_value(message, "From").unwrap_or_else(|| "Desconocido".to_string()),
        subject: header_value(message, "Subject").unwrap_or_else(|| "(sin asunto)".to_string()),
        date: header_value(message, "Date").unwrap_or_default(),
        snippet: message
            .get("snippet")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        message_id: header_value(message, "Message-ID"),
        references: header_value(message, "References"),
    })
}

pub struct GmailClient {
    auth: Arc<GoogleAuth>,
    base_url: String,
    client: reqwest::Client,
}

impl GmailClient {
    pub fn new(auth: Arc<GoogleAuth>, base_url: &str) -> Result<Self> {
        Ok(Self {
            auth,
            base_url: trim_base(base_url),
            client: build_client(DEFAULT_TIMEOUT)?,
        })
    }

    fn messages_url(&self, suffix: &str) -> String {
        format!("{}/gmail/v1/users/me/messages{suffix}", self.base_url)
    }

    async fn fetch_summary(&self, token: &str, id: &str) -> Result<EmailSummary> {
        let mut query: Vec<(&str, &str)> = vec![("format", "metadata")];
        for header in METADATA_HEADERS {
            query.push(("metadataHeaders", header));
        }
        let response = self
            .client
            .get(self.messages_url(&format!("/{id}")))
            .bearer_auth(token)
            .query(&query)
            .send()
            .await?;
        let message = json_or_upstream(response).await?;
        summary_from_message(&message)
    }
}

#[async_trait]
impl MailService for GmailClient {
    async fn list_messages(&self, query: &str, max_results: u32) -> Result<Vec<EmailSummary>> {
        let token = self.auth.access_token().await?;
        let max_results = max_results.to_string();
        info!(query, "listing gmail messages");
        let response = self
            .client
            .get(self.messages_url(""))
            .bearer_auth(&token)
            .query(&[("q", query), ("maxResults", max_results.as_str())])
            .send()
            .await?;
        let listing = json_or_upstream(response).await?;

        let ids: Vec<String> = listing
            .get("messages")
            .and_then(|v| v.as_array())
            .map(|messages| {
                messages
                    .iter()
                    .filter_map(|m| m.get("id").and_then(|id| id.as_str()))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        debug!(count = ids.len(), "gmail listing returned ids");

        let mut summaries = Vec::with_capacity(ids.len());
        for id in ids {
            summaries.push(self.fetch_summary(&token, &id).await?);
        }
        Ok(summaries)
    }

    async fn send_reply(&self, request: &ReplyRequest) -> Result<Value> {
        let token = self.auth.access_token().await?;
        let raw = URL_SAFE.encode(build_reply_mime(request).as_bytes());
        let mut payload = json!({ "raw": raw });
        if let Some(thread_id) = &request.thread_id {
            payload["threadId"] = Value::String(thread_id.clone());
        }
        info!(email_id = %request.email_id, thread_id = ?request.thread_id, "sending gmail reply");
        let response = self
            .client
            .post(self.messages_url("/send"))
            .bearer_auth(&token)
            .json(&payload)
            .send()
            .await?;
        json_or_upstream(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_text_becomes_gmail_query() {
        let search = EmailSearch::from_utterance("muéstrame los correos no leídos de hoy");
        assert_eq!(search.to_query(), "newer_than:1d is:unread");

        let search =
            EmailSearch::from_utterance("correos importantes con adjunto de ana@example.com");
        assert_eq!(
            search.to_query(),
            "is:important has:attachment from:ana@example.com"
        );

        let search = EmailSearch::from_utterance("emails from Carlos about factura pendiente");
        assert_eq!(search.to_query(), "from:Carlos \"factura pendiente\"");
    }

    #[test]
    fn empty_search_defaults_to_inbox() {
        assert_eq!(EmailSearch::default().to_query(), "in:inbox");
        let search = EmailSearch {
            label: Some("clientes".to_string()),
            period: Some(Period::Yesterday),
            ..EmailSearch::default()
        };
        assert_eq!(search.to_query(), "older_than:1d newer_than:2d in:clientes");
    }

    #[test]
    fn listing_uses_numbered_summary_blocks() {
        let listing = format_listing(&[EmailSummary {
            id: "1".to_string(),
            sender: "Ana <ana@example.com>".to_string(),
            subject: "Propuesta".to_string(),
            date: "hoy".to_string(),
            snippet: "Te envío".to_string(),
            ..EmailSummary::default()
        }]);
        assert!(listing.starts_with("Encontré 1 correos:"));
        assert!(listing.contains(
            "1. De: Ana <ana@example.com>\n   Asunto: Propuesta\n   Fecha: hoy\n   Resumen: Te envío"
        ));
    }

    #[test]
    fn reply_mime_threads_and_encodes_body() {
        let request = ReplyRequest {
            email_id: "m1".to_string(),
            thread_id: Some("t1".to_string()),
            to: "ana@example.com".to_string(),
            subject: "Re: Cotización".to_string(),
            in_reply_to: Some("<abc@mail>".to_string()),
            references: Some("<abc@mail>".to_string()),
            body: "¡Gracias!".to_string(),
        };
        let mime = build_reply_mime(&request);
        assert!(mime.starts_with("To: ana@example.com\r\n"));
        assert!(mime.contains("Subject: =?UTF-8?B?"));
        assert!(mime.contains("In-Reply-To: <abc@mail>\r\n"));
        assert!(mime.contains("References: <abc@mail>\r\n"));
        let body = mime.split("\r\n\r\n").nth(1).unwrap();
        assert_eq!(STANDARD.decode(body).unwrap(), "¡Gracias!".as_bytes());
    }

    #[test]
    fn summary_reads_metadata_headers_case_insensitively() {
        let message = json!({
            "id": "m1",
            "threadId": "t1",
            "snippet": "Hola",
            "payload": {"headers": [
                {"name": "from", "value": "Ana <ana@example.com>"},
                {"name": "Subject", "value": "Hola"},
                {"name": "Message-Id", "value": "<x@mail>"}
            ]}
        });
        let summary = summary_from_message(&message).unwrap();
        assert_eq!(summary.sender, "Ana <ana@example.com>");
        assert_eq!(summary.message_id.as_deref(), Some("<x@mail>"));
        assert_eq!(summary.thread_id.as_deref(), Some("t1"));
        assert_eq!(summary.references, None);
    }
}
