use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::fmt;
use tracing::{debug, info, warn};

use crate::adapters::AdapterResult;

/// What a single user utterance means for the step that is waiting on it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Intent {
    Affirm,
    Deny,
    /// 1-based position in a list shown to the user.
    Pick(usize),
    Content(String),
    Time(NaiveDateTime),
    Amount(u64),
    Blank,
    Unrecognized,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Signal {
    Affirm,
    Deny,
    Pick,
    Content,
    Time,
    Amount,
    Blank,
    Unrecognized,
}

impl Intent {
    pub fn signal(&self) -> Signal {
        match self {
            Intent::Affirm => Signal::Affirm,
            Intent::Deny => Signal::Deny,
            Intent::Pick(_) => Signal::Pick,
            Intent::Content(_) => Signal::Content,
            Intent::Time(_) => Signal::Time,
            Intent::Amount(_) => Signal::Amount,
            Intent::Blank => Signal::Blank,
            Intent::Unrecognized => Signal::Unrecognized,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition<S> {
    Stay,
    Goto(S),
    Done,
    Cancelled,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Dialog<S, D> {
    pub step: S,
    pub data: D,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnReport {
    pub response: String,
    pub finished: bool,
}

impl TurnReport {
    fn pending(response: String) -> Self {
        Self {
            response,
            finished: false,
        }
    }

    fn finished(response: String) -> Self {
        Self {
            response,
            finished: true,
        }
    }
}

/// A multi-turn task. The driver owns the control flow; a flow only
/// describes how input is read, which transitions exist, and what to say.
#[async_trait]
pub trait Flow: Send + Sync {
    type Step: Copy + Eq + fmt::Debug + Send + Sync;
    type Data: Send + Sync;

    fn name(&self) -> &'static str;

    fn read(&self, step: Self::Step, input: &str, data: &Self::Data) -> Intent;

    /// `None` when the table has no entry; the driver treats that as `Stay`.
    fn next(&self, step: Self::Step, signal: Signal) -> Option<Transition<Self::Step>>;

    fn apply(&self, step: Self::Step, intent: &Intent, data: &mut Self::Data);

    fn prompt(&self, step: Self::Step, data: &Self::Data) -> String;

    fn announce(&self, from: Self::Step, to: Self::Step, data: &Self::Data) -> String {
        let _ = from;
        self.prompt(to, data)
    }

    fn retry_prompt(&self, step: Self::Step, input: &str, data: &Self::Data) -> String;

    async fn commit(&self, data: &Self::Data) -> AdapterResult;

    fn completed_message(&self, data: &Self::Data, result: &AdapterResult) -> String;

    fn failure_message(&self, data: &Self::Data, result: &AdapterResult) -> String;

    fn cancelled_message(&self, data: &Self::Data) -> String;
}

pub async fn drive_turn<F: Flow>(
    flow: &F,
    dialog: &mut Dialog<F::Step, F::Data>,
    input: &str,
) -> TurnReport {
    let step = dialog.step;
    let intent = flow.read(step, input, &dialog.data);
    let signal = intent.signal();
    let transition = flow.next(step, signal).unwrap_or(Transition::Stay);
    debug!(flow = flow.name(), ?step, ?signal, ?transition, "dialog turn");

    match transition {
        Transition::Stay => TurnReport::pending(flow.retry_prompt(step, input, &dialog.data)),
        Transition::Goto(next) => {
            flow.apply(step, &intent, &mut dialog.data);
            dialog.step = next;
            TurnReport::pending(flow.announce(step, next, &dialog.data))
        }
        Transition::Done => {
            flow.apply(step, &intent, &mut dialog.data);
            let result = flow.commit(&dialog.data).await;
            if result.success {
                info!(flow = flow.name(), "dialog completed");
                TurnReport::finished(flow.completed_message(&dialog.data, &result))
            } else {
                warn!(flow = flow.name(), error = result.error_text(), "dialog commit failed");
                TurnReport::finished(flow.failure_message(&dialog.data, &result))
            }
        }
        Transition::Cancelled => {
            info!(flow = flow.name(), "dialog cancelled");
            TurnReport::finished(flow.cancelled_message(&dialog.data))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum Step {
        Ask,
        Confirm,
    }

    #[derive(Default)]
    struct Counter {
        commits: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Flow for Counter {
        type Step = Step;
        type Data = Option<String>;

        fn name(&self) -> &'static str {
            "counter"
        }

        fn read(&self, step: Step, input: &str, _data: &Option<String>) -> Intent {
            match step {
                Step::Ask if input.trim().is_empty() => Intent::Blank,
                Step::Ask => Intent::Content(input.trim().to_string()),
                Step::Confirm => crate::dialog::intent::confirmation(input),
            }
        }

        fn next(&self, step: Step, signal: Signal) -> Option<Transition<Step>> {
            match (step, signal) {
                (Step::Ask, Signal::Content) => Some(Transition::Goto(Step::Confirm)),
                (Step::Confirm, Signal::Affirm) => Some(Transition::Done),
                (Step::Confirm, Signal::Deny) => Some(Transition::Cancelled),
                _ => None,
            }
        }

        fn apply(&self, _step: Step, intent: &Intent, data: &mut Option<String>) {
            if let Intent::Content(text) = intent {
                *data = Some(text.clone());
            }
        }

        fn prompt(&self, step: Step, _data: &Option<String>) -> String {
            format!("prompt {step:?}")
        }

        fn retry_prompt(&self, step: Step, _input: &str, _data: &Option<String>) -> String {
            format!("retry {step:?}")
        }

        async fn commit(&self, data: &Option<String>) -> AdapterResult {
            self.commits.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                AdapterResult::failed("down")
            } else {
                AdapterResult::ok(serde_json::json!({ "value": data }))
            }
        }

        fn completed_message(&self, _data: &Option<String>, result: &AdapterResult) -> String {
            format!("done {}", result.field("value").unwrap_or_default())
        }

        fn failure_message(&self, _data: &Option<String>, result: &AdapterResult) -> String {
            format!("failed {}", result.error_text())
        }

        fn cancelled_message(&self, _data: &Option<String>) -> String {
            "cancelled".to_string()
        }
    }

    #[tokio::test]
    async fn missing_table_entry_stays_without_touching_data() {
        let flow = Counter::default();
        let mut dialog = Dialog {
            step: Step::Ask,
            data: None,
        };
        let report = drive_turn(&flow, &mut dialog, "   ").await;
        assert_eq!(report.response, "retry Ask");
        assert!(!report.finished);
        assert_eq!(dialog.step, Step::Ask);
        assert_eq!(dialog.data, None);
    }

    #[tokio::test]
    async fn goto_applies_then_done_commits_once() {
        let flow = Counter::default();
        let mut dialog = Dialog {
            step: Step::Ask,
            data: None,
        };
        let report = drive_turn(&flow, &mut dialog, " hola ").await;
        assert_eq!(report.response, "prompt Confirm");
        assert_eq!(dialog.data.as_deref(), Some("hola"));

        let report = drive_turn(&flow, &mut dialog, "quizás").await;
        assert_eq!(report.response, "retry Confirm");
        assert_eq!(flow.commits.load(Ordering::SeqCst), 0);

        let report = drive_turn(&flow, &mut dialog, "sí").await;
        assert!(report.finished);
        assert_eq!(report.response, "done hola");
        assert_eq!(flow.commits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_commit_still_finishes() {
        let flow = Counter {
            fail: true,
            ..Counter::default()
        };
        let mut dialog = Dialog {
            step: Step::Confirm,
            data: Some("x".to_string()),
        };
        let report = drive_turn(&flow, &mut dialog, "yes").await;
        assert!(report.finished);
        assert_eq!(report.response, "failed down");
    }

    #[tokio::test]
    async fn deny_cancels_without_commit() {
        let flow = Counter::default();
        let mut dialog = Dialog {
            step: Step::Confirm,
            data: Some("x".to_string()),
        };
        let report = drive_turn(&flow, &mut dialog, "cancelar").await;
        assert!(report.finished);
        assert_eq!(report.response, "cancelled");
        assert_eq!(flow.commits.load(Ordering::SeqCst), 0);
    }
}
