//! Multi-turn task dialogs.
//!
//! A session holds at most one active task. Each task variant carries its own
//! typed step and data, so unrelated dialogs never share scratch fields.

pub mod email_reply;
mod engine;
mod fsm;
pub mod intent;
pub mod payment_link;
pub mod schedule;

use serde::Serialize;

pub use email_reply::{EmailReplyFlow, ReplyDraft, ReplyStep};
pub use engine::{drive_turn, Dialog, Flow, Intent, Signal, Transition, TurnReport};
pub use payment_link::{PaymentLinkDraft, PaymentLinkFlow, PaymentStep};
pub use schedule::{ScheduleDraft, ScheduleFlow, ScheduleStep};

use crate::interfaces::services::EmailSummary;

/// A handler a dialog can pass the turn on to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    EmailReader,
    Conversation,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    EmailReply,
    CalendarEvent,
    Meeting,
    PaymentLink,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::EmailReply => "email_responding",
            TaskKind::CalendarEvent => "calendar_event",
            TaskKind::Meeting => "meet_scheduling",
            TaskKind::PaymentLink => "payment_link",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TaskData {
    EmailReply(Dialog<ReplyStep, ReplyDraft>),
    Schedule(Dialog<ScheduleStep, ScheduleDraft>),
    PaymentLink(Dialog<PaymentStep, PaymentLinkDraft>),
}

impl TaskData {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskData::EmailReply(_) => TaskKind::EmailReply,
            TaskData::Schedule(dialog) if dialog.data.with_meet => TaskKind::Meeting,
            TaskData::Schedule(_) => TaskKind::CalendarEvent,
            TaskData::PaymentLink(_) => TaskKind::PaymentLink,
        }
    }

    pub fn step_name(&self) -> &'static str {
        match self {
            TaskData::EmailReply(dialog) => dialog.step.as_str(),
            TaskData::Schedule(dialog) => dialog.step.as_str(),
            TaskData::PaymentLink(dialog) => dialog.step.as_str(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ActiveTask {
    pub name: &'static str,
    pub step: &'static str,
}

/// Facts that outlive a single task.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionContext {
    pub listed_emails: Vec<EmailSummary>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConversationState {
    pub input: String,
    pub response: String,
    pub context: SessionContext,
    task: Option<TaskData>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_turn(&mut self, input: &str) {
        self.input = input.to_string();
        self.response.clear();
    }

    pub fn active_task(&self) -> Option<ActiveTask> {
        self.task.as_ref().map(|task| ActiveTask {
            name: task.kind().as_str(),
            step: task.step_name(),
        })
    }

    pub fn task(&self) -> Option<&TaskData> {
        self.task.as_ref()
    }

    pub fn set_task(&mut self, task: TaskData) {
        self.task = Some(task);
    }

    pub fn take_task(&mut self) -> Option<TaskData> {
        self.task.take()
    }

    pub fn clear_task(&mut self) {
        self.task = None;
    }
}

/// The flows a session can run. A missing flow means its backing service is
/// not configured.
#[derive(Default)]
pub struct Dialogs {
    pub reply: Option<EmailReplyFlow>,
    pub schedule: Option<ScheduleFlow>,
    pub payment: Option<PaymentLinkFlow>,
}

const UNAVAILABLE: &str =
    "Lo siento, ese servicio ya no está disponible. Cancelé la tarea en curso.";

impl Dialogs {
    /// Feeds the turn's input to the active task. Returns `false` when no task
    /// is active and the turn still needs routing.
    pub async fn resume(&self, state: &mut ConversationState) -> bool {
        let Some(task) = state.take_task() else {
            return false;
        };
        let input = state.input.clone();

        let (report, task) = match task {
            TaskData::EmailReply(mut dialog) => match &self.reply {
                Some(flow) => {
                    let report = drive_turn(flow, &mut dialog, &input).await;
                    (report, TaskData::EmailReply(dialog))
                }
                None => (unavailable(), TaskData::EmailReply(dialog)),
            },
            TaskData::Schedule(mut dialog) => match &self.schedule {
                Some(flow) => {
                    let report = drive_turn(flow, &mut dialog, &input).await;
                    (report, TaskData::Schedule(dialog))
                }
                None => (unavailable(), TaskData::Schedule(dialog)),
            },
            TaskData::PaymentLink(mut dialog) => match &self.payment {
                Some(flow) => {
                    let report = drive_turn(flow, &mut dialog, &input).await;
                    (report, TaskData::PaymentLink(dialog))
                }
                None => (unavailable(), TaskData::PaymentLink(dialog)),
            },
        };

        state.response = report.response;
        if !report.finished {
            state.set_task(task);
        }
        true
    }
}

fn unavailable() -> TurnReport {
    TurnReport {
        response: UNAVAILABLE.to_string(),
        finished: true,
    }
}
