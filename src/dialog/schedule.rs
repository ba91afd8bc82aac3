use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use chrono::{NaiveDateTime, TimeDelta};
use regex::Regex;

use super::engine::{Dialog, Flow, Intent, Signal, Transition};
use super::{fsm, intent, ConversationState, TaskData};
use crate::adapters::AdapterResult;
use crate::error::AvaBotError;
use crate::interfaces::services::{CalendarService, NewEvent};

pub const DEFAULT_MEETING_SUMMARY: &str = "Reunión programada por AVA";
pub const DEFAULT_EVENT_SUMMARY: &str = "Evento programado por AVA";
pub const DEFAULT_DURATION_MINUTES: i64 = 60;
const RETRY_CONFIRM: &str = "Por favor responde 'sí' para confirmar o 'no' para cancelar.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScheduleStep {
    CollectStart,
    ConfirmSchedule,
}

impl ScheduleStep {
    pub fn as_str(self) -> &'static str {
        match self {
            ScheduleStep::CollectStart => "collect_start",
            ScheduleStep::ConfirmSchedule => "confirm_schedule",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScheduleDraft {
    pub summary: String,
    pub description: Option<String>,
    pub start: Option<NaiveDateTime>,
    pub duration_minutes: i64,
    pub attendees: Vec<String>,
    pub timezone: String,
    pub with_meet: bool,
}

impl ScheduleDraft {
    /// Pulls whatever the first utterance already says: start time, attendee
    /// addresses, a duration and a quoted title.
    pub fn from_request(text: &str, with_meet: bool, timezone: &str) -> Self {
        let summary = quoted_title(text).unwrap_or_else(|| {
            if with_meet {
                DEFAULT_MEETING_SUMMARY.to_string()
            } else {
                DEFAULT_EVENT_SUMMARY.to_string()
            }
        });
        Self {
            summary,
            description: None,
            start: intent::find_datetime(text),
            duration_minutes: find_duration_minutes(text).unwrap_or(DEFAULT_DURATION_MINUTES),
            attendees: find_emails(text),
            timezone: timezone.to_string(),
            with_meet,
        }
    }

    fn label(&self) -> &'static str {
        if self.with_meet {
            "la reunión de Google Meet"
        } else {
            "el evento"
        }
    }
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap())
}

fn duration_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(\d{1,3})\s*(horas?|hours?|minutos?|minutes?|mins?)\b").unwrap()
    })
}

fn title_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"["“]([^"”]+)["”]"#).unwrap())
}

pub fn find_emails(text: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for m in email_regex().find_iter(text) {
        let email = m.as_str().trim_end_matches('.').to_string();
        if !found.contains(&email) {
            found.push(email);
        }
    }
    found
}

pub fn find_duration_minutes(text: &str) -> Option<i64> {
    let caps = duration_regex().captures(text)?;
    let amount: i64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps.get(2)?.as_str().to_lowercase();
    let minutes = if unit.starts_with('h') {
        amount * 60
    } else {
        amount
    };
    (minutes > 0).then_some(minutes)
}

fn quoted_title(text: &str) -> Option<String> {
    title_regex()
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|title| !title.is_empty())
}

pub struct ScheduleFlow {
    calendar: Arc<dyn CalendarService>,
    timezone: String,
}

impl ScheduleFlow {
    pub fn new(calendar: Arc<dyn CalendarService>, timezone: impl Into<String>) -> Self {
        Self {
            calendar,
            timezone: timezone.into(),
        }
    }

    pub fn begin(&self, state: &mut ConversationState, with_meet: bool) {
        let data = ScheduleDraft::from_request(&state.input, with_meet, &self.timezone);
        let step = if data.start.is_some() {
            ScheduleStep::ConfirmSchedule
        } else {
            ScheduleStep::CollectStart
        };
        state.response = self.prompt(step, &data);
        state.set_task(TaskData::Schedule(Dialog { step, data }));
    }
}

#[async_trait]
impl Flow for ScheduleFlow {
    type Step = ScheduleStep;
    type Data = ScheduleDraft;

    fn name(&self) -> &'static str {
        "schedule"
    }

    fn read(&self, step: ScheduleStep, input: &str, _data: &ScheduleDraft) -> Intent {
        match step {
            ScheduleStep::CollectStart => intent::start_time(input),
            ScheduleStep::ConfirmSchedule => intent::confirmation(input),
        }
    }

    fn next(&self, step: ScheduleStep, signal: Signal) -> Option<Transition<ScheduleStep>> {
        fsm::schedule_transition(step, signal)
    }

    fn apply(&self, step: ScheduleStep, intent: &Intent, data: &mut ScheduleDraft) {
        if let (ScheduleStep::CollectStart, Intent::Time(start)) = (step, intent) {
            data.start = Some(*start);
        }
    }

    fn prompt(&self, step: ScheduleStep, data: &ScheduleDraft) -> String {
        match step {
            ScheduleStep::CollectStart => format!(
                "¿Cuándo empieza {}? Indica la fecha y hora de inicio (por ejemplo 2026-10-20 15:00).",
                data.label()
            ),
            ScheduleStep::ConfirmSchedule => {
                let start = data
                    .start
                    .map(|start| start.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                let guests = if data.attendees.is_empty() {
                    String::new()
                } else {
                    format!(" con {}", data.attendees.join(", "))
                };
                format!(
                    "Voy a crear {} \"{}\" el {start} ({} min, {}){guests}. ¿Confirmas? Responde 'sí' o 'no'.",
                    data.label(),
                    data.summary,
                    data.duration_minutes,
                    data.timezone
                )
            }
        }
    }

    fn retry_prompt(&self, step: ScheduleStep, input: &str, _data: &ScheduleDraft) -> String {
        match step {
            ScheduleStep::CollectStart if input.trim().is_empty() => {
                "Necesito la fecha y hora de inicio para continuar (AAAA-MM-DD HH:MM).".to_string()
            }
            ScheduleStep::CollectStart => format!(
                "No pude entender la fecha y hora '{}'. Usa el formato AAAA-MM-DD HH:MM.",
                input.trim()
            ),
            ScheduleStep::ConfirmSchedule => RETRY_CONFIRM.to_string(),
        }
    }

    async fn commit(&self, data: &ScheduleDraft) -> AdapterResult {
        let Some(start) = data.start else {
            return AdapterResult::from_outcome::<()>(
                "calendar.create_event",
                Err(AvaBotError::Validation("missing start time".to_string())),
            );
        };
        let event = NewEvent {
            summary: data.summary.clone(),
            description: data.description.clone(),
            start,
            end: start + TimeDelta::minutes(data.duration_minutes),
            timezone: data.timezone.clone(),
            attendees: data.attendees.clone(),
            with_meet: data.with_meet,
        };
        AdapterResult::from_outcome(
            "calendar.create_event",
            self.calendar.create_event(&event).await,
        )
    }

    fn completed_message(&self, data: &ScheduleDraft, result: &AdapterResult) -> String {
        let event_link = result.field("html_link").unwrap_or("(sin enlace)");
        if data.with_meet {
            match result.field("meet_link") {
                Some(meet) => format!(
                    "¡Reunión creada! Enlace de Google Meet: {meet}\nDetalles del evento: {event_link}"
                ),
                None => format!(
                    "Creé el evento, pero Google no devolvió un enlace de Meet. Detalles: {event_link}"
                ),
            }
        } else {
            format!("¡Evento creado en tu calendario! {event_link}")
        }
    }

    fn failure_message(&self, data: &ScheduleDraft, result: &AdapterResult) -> String {
        format!(
            "Lo siento, no pude crear {}: {}",
            data.label(),
            result.error_text()
        )
    }

    fn cancelled_message(&self, data: &ScheduleDraft) -> String {
        format!("Entendido, no agendé {}.", data.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_extraction_picks_up_time_guests_and_duration() {
        let draft = ScheduleDraft::from_request(
            "agenda una reunión de meet \"Revisión Q4\" el 2026-10-20 15:00 por 2 horas con ana@example.com y luis@example.com.",
            true,
            "America/Bogota",
        );
        assert_eq!(draft.summary, "Revisión Q4");
        assert_eq!(
            draft.start,
            NaiveDateTime::parse_from_str("2026-10-20 15:00", "%Y-%m-%d %H:%M").ok()
        );
        assert_eq!(draft.duration_minutes, 120);
        assert_eq!(draft.attendees, vec!["ana@example.com", "luis@example.com"]);
        assert!(draft.with_meet);
    }

    #[test]
    fn defaults_apply_when_the_request_is_vague() {
        let draft = ScheduleDraft::from_request("crea una reunión", true, "America/Bogota");
        assert_eq!(draft.summary, DEFAULT_MEETING_SUMMARY);
        assert_eq!(draft.start, None);
        assert_eq!(draft.duration_minutes, DEFAULT_DURATION_MINUTES);
        assert!(draft.attendees.is_empty());

        let draft = ScheduleDraft::from_request("agenda un evento de 30 minutos", false, "UTC");
        assert_eq!(draft.summary, DEFAULT_EVENT_SUMMARY);
        assert_eq!(draft.duration_minutes, 30);
    }
}
