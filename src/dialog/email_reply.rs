use std::sync::Arc;

use async_trait::async_trait;

use super::engine::{Dialog, Flow, Intent, Signal, Transition};
use super::{fsm, intent, ConversationState, Route, TaskData};
use crate::adapters::AdapterResult;
use crate::error::AvaBotError;
use crate::interfaces::services::{EmailSummary, MailService, ReplyRequest};

pub const NEED_LISTING: &str =
    "Primero necesito que veas tus correos. Te muestro los más recientes:";
const ASK_SELECTION: &str = "¿A cuál de los correos quieres responder? Indica el número.";
const RETRY_SELECTION: &str =
    "No entendí qué correo quieres responder. Por favor indica el número.";
const ASK_BODY: &str = "¿Qué respuesta quieres enviar?";
const RETRY_BODY: &str = "La respuesta no puede estar vacía. ¿Qué respuesta quieres enviar?";
const RETRY_CONFIRM: &str = "Por favor responde 'sí' para confirmar o 'no' para cancelar.";
const REDRAFT: &str = "Envío cancelado. ¿Quieres redactar una nueva respuesta?";
const SENT: &str = "¡Respuesta enviada exitosamente!";
const SEND_FAILED: &str = "Lo siento, hubo un problema al enviar la respuesta.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplyStep {
    SelectEmail,
    DraftResponse,
    ConfirmSend,
}

impl ReplyStep {
    pub fn as_str(self) -> &'static str {
        match self {
            ReplyStep::SelectEmail => "select_email",
            ReplyStep::DraftResponse => "draft_response",
            ReplyStep::ConfirmSend => "confirm_send",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReplyDraft {
    /// Snapshot of the listing the user is choosing from.
    pub listed: Vec<EmailSummary>,
    pub selected: Option<EmailSummary>,
    pub body: Option<String>,
}

impl ReplyDraft {
    pub fn selected_email_id(&self) -> Option<&str> {
        self.selected.as_ref().map(|email| email.id.as_str())
    }
}

pub struct EmailReplyFlow {
    mail: Arc<dyn MailService>,
}

impl EmailReplyFlow {
    pub fn new(mail: Arc<dyn MailService>) -> Self {
        Self { mail }
    }

    /// Starts a reply task from a fresh utterance.
    pub fn begin(&self, state: &mut ConversationState) -> Option<Route> {
        if state.context.listed_emails.is_empty() {
            state.response = NEED_LISTING.to_string();
            return Some(Route::EmailReader);
        }

        let mut dialog = Dialog {
            step: ReplyStep::SelectEmail,
            data: ReplyDraft {
                listed: state.context.listed_emails.clone(),
                ..ReplyDraft::default()
            },
        };
        if let Some(index) = intent::selection_in(&state.input, dialog.data.listed.len()) {
            self.apply(ReplyStep::SelectEmail, &Intent::Pick(index), &mut dialog.data);
            dialog.step = ReplyStep::DraftResponse;
        }

        state.response = self.prompt(dialog.step, &dialog.data);
        state.set_task(TaskData::EmailReply(dialog));
        None
    }
}

#[async_trait]
impl Flow for EmailReplyFlow {
    type Step = ReplyStep;
    type Data = ReplyDraft;

    fn name(&self) -> &'static str {
        "email_reply"
    }

    fn read(&self, step: ReplyStep, input: &str, data: &ReplyDraft) -> Intent {
        match step {
            ReplyStep::SelectEmail => intent::selection(input, data.listed.len()),
            ReplyStep::DraftResponse => intent::free_text(input),
            ReplyStep::ConfirmSend => intent::confirmation(input),
        }
    }

    fn next(&self, step: ReplyStep, signal: Signal) -> Option<Transition<ReplyStep>> {
        fsm::reply_transition(step, signal)
    }

    fn apply(&self, step: ReplyStep, intent: &Intent, data: &mut ReplyDraft) {
        match (step, intent) {
            (ReplyStep::SelectEmail, Intent::Pick(index)) => {
                data.selected = index
                    .checked_sub(1)
                    .and_then(|i| data.listed.get(i))
                    .cloned();
            }
            (ReplyStep::DraftResponse, Intent::Content(text)) => {
                data.body = Some(text.clone());
            }
            (ReplyStep::ConfirmSend, Intent::Deny) => {
                data.body = None;
            }
            _ => {}
        }
    }

    fn prompt(&self, step: ReplyStep, data: &ReplyDraft) -> String {
        match step {
            ReplyStep::SelectEmail => ASK_SELECTION.to_string(),
            ReplyStep::DraftResponse => match &data.selected {
                Some(email) => format!(
                    "Vas a responder a {} sobre \"{}\". {ASK_BODY}",
                    email.sender, email.subject
                ),
                None => ASK_BODY.to_string(),
            },
            ReplyStep::ConfirmSend => format!(
                "¿Estás seguro de que quieres enviar esta respuesta?\n\n{}\n\nResponde 'sí' para confirmar o 'no' para cancelar.",
                data.body.as_deref().unwrap_or_default()
            ),
        }
    }

    fn announce(&self, from: ReplyStep, to: ReplyStep, data: &ReplyDraft) -> String {
        if from == ReplyStep::ConfirmSend && to == ReplyStep::DraftResponse {
            return REDRAFT.to_string();
        }
        self.prompt(to, data)
    }

    fn retry_prompt(&self, step: ReplyStep, _input: &str, _data: &ReplyDraft) -> String {
        match step {
            ReplyStep::SelectEmail => RETRY_SELECTION,
            ReplyStep::DraftResponse => RETRY_BODY,
            ReplyStep::ConfirmSend => RETRY_CONFIRM,
        }
        .to_string()
    }

    async fn commit(&self, data: &ReplyDraft) -> AdapterResult {
        let (Some(email), Some(body)) = (&data.selected, &data.body) else {
            return AdapterResult::from_outcome::<()>(
                "gmail.send_reply",
                Err(AvaBotError::Validation(
                    "reply is missing the selected email or its body".to_string(),
                )),
            );
        };
        let request = ReplyRequest::answering(email, body);
        AdapterResult::from_outcome("gmail.send_reply", self.mail.send_reply(&request).await)
    }

    fn completed_message(&self, _data: &ReplyDraft, _result: &AdapterResult) -> String {
        SENT.to_string()
    }

    fn failure_message(&self, _data: &ReplyDraft, _result: &AdapterResult) -> String {
        SEND_FAILED.to_string()
    }

    fn cancelled_message(&self, _data: &ReplyDraft) -> String {
        REDRAFT.to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::{json, Value};

    use super::*;
    use crate::dialog::engine::drive_turn;
    use crate::error::Result;

    struct Outbox {
        fail: bool,
        sent: Mutex<Vec<ReplyRequest>>,
    }

    impl Outbox {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                fail,
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl MailService for Outbox {
        async fn list_messages(&self, _query: &str, _max: u32) -> Result<Vec<EmailSummary>> {
            Ok(Vec::new())
        }

        async fn send_reply(&self, request: &ReplyRequest) -> Result<Value> {
            self.sent.lock().unwrap().push(request.clone());
            if self.fail {
                Err(AvaBotError::Upstream {
                    status: 500,
                    body: "backend error".to_string(),
                })
            } else {
                Ok(json!({"id": "sent-1"}))
            }
        }
    }

    fn email(id: &str, sender: &str) -> EmailSummary {
        EmailSummary {
            id: id.to_string(),
            thread_id: Some(format!("t-{id}")),
            sender: sender.to_string(),
            subject: format!("Asunto {id}"),
            date: "Mon, 12 Oct 2026 09:00:00 -0500".to_string(),
            snippet: String::new(),
            message_id: None,
            references: None,
        }
    }

    fn selecting() -> Dialog<ReplyStep, ReplyDraft> {
        Dialog {
            step: ReplyStep::SelectEmail,
            data: ReplyDraft {
                listed: vec![email("a", "ana@example.com"), email("b", "beto@example.com")],
                ..ReplyDraft::default()
            },
        }
    }

    #[tokio::test]
    async fn unrecognized_selection_keeps_step_and_draft() {
        let flow = EmailReplyFlow::new(Outbox::new(false));
        let mut dialog = selecting();
        let before = dialog.data.clone();

        for input in ["el segundo", "7", "0", ""] {
            let report = drive_turn(&flow, &mut dialog, input).await;
            assert_eq!(report.response, RETRY_SELECTION);
            assert!(!report.finished);
            assert_eq!(dialog.step, ReplyStep::SelectEmail);
            assert_eq!(dialog.data, before);
        }

        drive_turn(&flow, &mut dialog, "número 2").await;
        assert_eq!(dialog.step, ReplyStep::DraftResponse);
        assert_eq!(dialog.data.selected_email_id(), Some("b"));
    }

    #[tokio::test]
    async fn declining_returns_to_drafting_with_the_selection_kept() {
        let outbox = Outbox::new(false);
        let flow = EmailReplyFlow::new(outbox.clone());
        let mut dialog = selecting();

        drive_turn(&flow, &mut dialog, "1").await;
        drive_turn(&flow, &mut dialog, "Te confirmo mañana.").await;
        assert_eq!(dialog.step, ReplyStep::ConfirmSend);

        let report = drive_turn(&flow, &mut dialog, "no").await;
        assert_eq!(report.response, REDRAFT);
        assert!(!report.finished);
        assert_eq!(dialog.step, ReplyStep::DraftResponse);
        assert_eq!(dialog.data.body, None);
        assert_eq!(dialog.data.selected_email_id(), Some("a"));
        assert!(outbox.sent.lock().unwrap().is_empty());

        drive_turn(&flow, &mut dialog, "Mejor el jueves.").await;
        let report = drive_turn(&flow, &mut dialog, "sí").await;
        assert!(report.finished);
        assert_eq!(report.response, SENT);
        let sent = outbox.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].body, "Mejor el jueves.");
    }

    #[tokio::test]
    async fn failed_send_finishes_with_the_failure_message() {
        let outbox = Outbox::new(true);
        let flow = EmailReplyFlow::new(outbox.clone());
        let mut dialog = selecting();

        drive_turn(&flow, &mut dialog, "2").await;
        drive_turn(&flow, &mut dialog, "Gracias").await;
        let report = drive_turn(&flow, &mut dialog, "si").await;

        assert!(report.finished);
        assert_eq!(report.response, SEND_FAILED);
        assert_eq!(outbox.sent.lock().unwrap().len(), 1);
    }
}
