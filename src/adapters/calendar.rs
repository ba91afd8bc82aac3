use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use super::{build_client, json_or_upstream, trim_base, DEFAULT_TIMEOUT};
use crate::credentials::GoogleAuth;
use crate::error::Result;
use crate::interfaces::services::{CalendarEntry, CalendarService, CreatedEvent, NewEvent};

const LOCAL_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub struct GoogleCalendarClient {
    auth: Arc<GoogleAuth>,
    base_url: String,
    calendar_id: String,
    client: reqwest::Client,
}

impl GoogleCalendarClient {
    pub fn new(auth: Arc<GoogleAuth>, base_url: &str) -> Result<Self> {
        Ok(Self {
            auth,
            base_url: trim_base(base_url),
            calendar_id: "primary".to_string(),
            client: build_client(DEFAULT_TIMEOUT)?,
        })
    }

    fn events_url(&self) -> String {
        format!(
            "{}/calendar/v3/calendars/{}/events",
            self.base_url, self.calendar_id
        )
    }
}

pub fn event_body(event: &NewEvent) -> Value {
    let mut body = json!({
        "summary": event.summary,
        "start": {
            "dateTime": event.start.format(LOCAL_FORMAT).to_string(),
            "timeZone": event.timezone,
        },
        "end": {
            "dateTime": event.end.format(LOCAL_FORMAT).to_string(),
            "timeZone": event.timezone,
        },
        "attendees": event
            .attendees
            .iter()
            .map(|email| json!({ "email": email }))
            .collect::<Vec<_>>(),
        "reminders": {
            "useDefault": false,
            "overrides": [
                {"method": "email", "minutes": 24 * 60},
                {"method": "popup", "minutes": 15},
            ],
        },
    });
    if let Some(description) = &event.description {
        body["description"] = Value::String(description.clone());
    }
    if event.with_meet {
        body["conferenceData"] = json!({
            "createRequest": {
                "requestId": format!("ava-meet-{}", uuid::Uuid::new_v4()),
                "conferenceSolutionKey": {"type": "hangoutsMeet"},
            }
        });
    }
    body
}

fn created_from_response(body: &Value) -> CreatedEvent {
    let meet_link = body
        .pointer("/conferenceData/entryPoints")
        .and_then(|v| v.as_array())
        .and_then(|entries| {
            entries.iter().find(|entry| {
                entry.get("entryPointType").and_then(|t| t.as_str()) == Some("video")
            })
        })
        .and_then(|entry| entry.get("uri"))
        .and_then(|uri| uri.as_str())
        .map(str::to_string)
        .or_else(|| {
            body.get("hangoutLink")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        });
    CreatedEvent {
        id: body
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        html_link: body
            .get("htmlLink")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        meet_link,
        status: body
            .get("status")
            .and_then(|v| v.as_str())
            .map(str::to_string),
    }
}

fn boundary(value: Option<&Value>) -> String {
    value
        .and_then(|v| v.get("dateTime").or_else(|| v.get("date")))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn entry_from_item(item: &Value) -> CalendarEntry {
    CalendarEntry {
        id: item
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        summary: item
            .get("summary")
            .and_then(|v| v.as_str())
            .unwrap_or("(sin título)")
            .to_string(),
        start: boundary(item.get("start")),
        end: boundary(item.get("end")),
        attendees: item
            .get("attendees")
            .and_then(|v| v.as_array())
            .map(|attendees| {
                attendees
                    .iter()
                    .filter_map(|a| a.get("email").and_then(|e| e.as_str()))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        html_link: item
            .get("htmlLink")
            .and_then(|v| v.as_str())
            .map(str::to_string),
    }
}

#[async_trait]
impl CalendarService for GoogleCalendarClient {
    async fn list_events(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
        max_results: u32,
    ) -> Result<Vec<CalendarEntry>> {
        let token = self.auth.access_token().await?;
        let time_min = format!("{}Z", from.format(LOCAL_FORMAT));
        let time_max = format!("{}Z", to.format(LOCAL_FORMAT));
        let max_results = max_results.to_string();
        let response = self
            .client
            .get(self.events_url())
            .bearer_auth(&token)
            .query(&[
                ("timeMin", time_min.as_str()),
                ("timeMax", time_max.as_str()),
                ("maxResults", max_results.as_str()),
                ("singleEvents", "true"),
                ("orderBy", "startTime"),
            ])
            .send()
            .await?;
        let body = json_or_upstream(response).await?;
        Ok(body
            .get("items")
            .and_then(|v| v.as_array())
            .map(|items| items.iter().map(entry_from_item).collect())
            .unwrap_or_default())
    }

    async fn create_event(&self, event: &NewEvent) -> Result<CreatedEvent> {
        let token = self.auth.access_token().await?;
        let mut query = vec![("sendUpdates", "all")];
        if event.with_meet {
            query.push(("conferenceDataVersion", "1"));
        }
        info!(summary = %event.summary, with_meet = event.with_meet, "creating calendar event");
        let response = self
            .client
            .post(self.events_url())
            .bearer_auth(&token)
            .query(&query)
            .json(&event_body(event))
            .send()
            .await?;
        let body = json_or_upstream(response).await?;
        Ok(created_from_response(&body))
    }
}

/// Parses an event boundary. All-day dates count from midnight.
fn parse_boundary(raw: &str) -> Option<NaiveDateTime> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.naive_utc())
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(raw, LOCAL_FORMAT).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

pub fn overlaps(entry: &CalendarEntry, start: NaiveDateTime, end: NaiveDateTime) -> bool {
    match (parse_boundary(&entry.start), parse_boundary(&entry.end)) {
        (Some(entry_start), Some(entry_end)) => entry_start < end && entry_end > start,
        _ => false,
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Availability {
    pub available: bool,
    pub conflicts: Vec<CalendarEntry>,
}

pub async fn check_availability(
    calendar: &dyn CalendarService,
    start: NaiveDateTime,
    duration_minutes: i64,
) -> Result<Availability> {
    let end = start + TimeDelta::minutes(duration_minutes);
    let events = calendar.list_events(start, end, 50).await?;
    let conflicts: Vec<CalendarEntry> = events
        .into_iter()
        .filter(|entry| overlaps(entry, start, end))
        .collect();
    Ok(Availability {
        available: conflicts.is_empty(),
        conflicts,
    })
}

pub fn format_events(events: &[CalendarEntry]) -> String {
    if events.is_empty() {
        return "No tienes eventos en ese periodo.".to_string();
    }
    let mut out = format!("Encontré {} eventos:\n", events.len());
    for (index, event) in events.iter().enumerate() {
        out.push_str(&format!(
            "{}. {} ({} → {})\n",
            index + 1,
            event.summary,
            event.start,
            event.end
        ));
    }
    out.trim_end().to_string()
}
