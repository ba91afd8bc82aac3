//! Per-user sessions and turn dispatch.
//!
//! A turn first resumes the session's active task, if any. Otherwise the
//! router picks a handler; handlers may hand the turn to another handler
//! through a [`Route`], at most [`MAX_HOPS`] times.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Local, NaiveDateTime, NaiveTime, TimeDelta};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::adapters::calendar::{check_availability, format_events, GoogleCalendarClient};
use crate::adapters::drive::{format_files, GoogleDriveClient};
use crate::adapters::gmail::{format_listing, EmailSearch, GmailClient};
use crate::adapters::groq::{GroqClient, DEFAULT_VISION_PROMPT};
use crate::adapters::search::{
    analysis_prompt, format_results, FallbackSearch, GoogleSearchClient, TavilySearchClient,
    ANALYSIS_SYSTEM_PROMPT, DEFAULT_GOOGLE_DAILY_LIMIT, DEFAULT_GOOGLE_SEARCH_BASE_URL,
    DEFAULT_TAVILY_BASE_URL,
};
use crate::adapters::together::TogetherImageClient;
use crate::adapters::wompi::WompiClient;
use crate::config::{
    Config, DEFAULT_GMAIL_API_BASE, DEFAULT_GOOGLE_API_BASE, DEFAULT_GROQ_BASE_URL,
    DEFAULT_GROQ_MODEL, DEFAULT_SEARCH_RESULTS, DEFAULT_TOGETHER_BASE_URL,
    DEFAULT_TOGETHER_MODEL,
};
use crate::credentials::GoogleAuth;
use crate::dialog::intent::find_datetime;
use crate::dialog::schedule::{find_duration_minutes, DEFAULT_DURATION_MINUTES};
use crate::dialog::{
    ActiveTask, ConversationState, Dialogs, EmailReplyFlow, PaymentLinkFlow, Route, ScheduleFlow,
};
use crate::error::{AvaBotError, Result};
use crate::interfaces::services::{
    CalendarService, ChatModel, ChatTurn, DriveService, ImageGenerator, ImageSource, MailService,
    PaymentService, SearchService,
};
use crate::router::{self, Command};

pub const MAX_HOPS: usize = 3;
pub const MAX_HISTORY: usize = 10;
const EVENT_LIST_LIMIT: u32 = 10;

pub const DEFAULT_SYSTEM_PROMPT: &str = "Eres Ava, una asistente personal especializada en \
productividad y organización. Respondes en español, de forma breve, clara y amable. Puedes \
leer y responder correos, agendar eventos y reuniones de Meet, crear links de pago, generar \
imágenes y subir archivos a Drive cuando el usuario lo pide.";

const NOT_CONFIGURED_MAIL: &str = "El servicio de correo no está configurado.";
const NOT_CONFIGURED_CALENDAR: &str = "El servicio de calendario no está configurado.";
const NOT_CONFIGURED_DRIVE: &str = "El servicio de Drive no está configurado.";
const NOT_CONFIGURED_PAYMENTS: &str =
    "Los pagos no están configurados. Falta WOMPI_PRIVATE_KEY.";
const NOT_CONFIGURED_IMAGES: &str =
    "La generación de imágenes no está configurada. Falta TOGETHER_API_KEY.";
const NOT_CONFIGURED_SEARCH: &str =
    "La búsqueda web no está configurada. Falta TAVILY_API_KEY.";
const ASK_SEARCH_QUERY: &str = "¿Qué quieres que busque en internet?";
const NOT_CONFIGURED_CHAT: &str =
    "El modelo de conversación no está configurado. Falta GROQ_API_KEY.";
const NO_GOOGLE_CREDENTIALS: &str = "No encontré credenciales de Google. Configura las \
variables GOOGLE_* o coloca un token.json en la carpeta de la aplicación.";
const ASK_AVAILABILITY_TIME: &str =
    "¿Para qué fecha y hora reviso tu disponibilidad? Usa el formato YYYY-MM-DD HH:MM.";
const ASK_UPLOAD_PATH: &str =
    "¿Qué archivo quieres subir a Drive? Indícame la ruta, por ejemplo /home/ana/informe.pdf.";
const CHAT_FAILED: &str = "Lo siento, tuve un problema al generar la respuesta.";

/// The vendor services a session can reach. `None` means not configured.
#[derive(Clone, Default)]
pub struct Services {
    pub mail: Option<Arc<dyn MailService>>,
    pub calendar: Option<Arc<dyn CalendarService>>,
    pub drive: Option<Arc<dyn DriveService>>,
    pub payments: Option<Arc<dyn PaymentService>>,
    pub images: Option<Arc<dyn ImageGenerator>>,
    pub chat: Option<Arc<dyn ChatModel>>,
    pub search: Option<Arc<dyn SearchService>>,
}

impl Services {
    /// Google services resolve credentials lazily, per call. Keyed vendors
    /// are only wired when their key is present.
    pub fn from_config(config: &Config) -> Result<Self> {
        let google = config.google.clone().unwrap_or_default();
        let api_base = google
            .api_base
            .unwrap_or_else(|| DEFAULT_GOOGLE_API_BASE.to_string());
        let gmail_base = google
            .gmail_base
            .unwrap_or_else(|| DEFAULT_GMAIL_API_BASE.to_string());
        let auth = Arc::new(GoogleAuth::from_config(config)?);

        let mut services = Self {
            mail: Some(Arc::new(GmailClient::new(Arc::clone(&auth), &gmail_base)?)),
            calendar: Some(Arc::new(GoogleCalendarClient::new(
                Arc::clone(&auth),
                &api_base,
            )?)),
            drive: Some(Arc::new(GoogleDriveClient::new(auth, &api_base)?)),
            ..Self::default()
        };

        if let Some(key) = config.groq_api_key() {
            let groq = config.groq.clone().unwrap_or_default();
            let model = groq.model.unwrap_or_else(|| DEFAULT_GROQ_MODEL.to_string());
            let vision_model = groq.vision_model.unwrap_or_else(|| model.clone());
            services.chat = Some(Arc::new(GroqClient::new(
                key,
                groq.base_url.as_deref().unwrap_or(DEFAULT_GROQ_BASE_URL),
                &model,
                &vision_model,
            )?));
        }
        if let Some(key) = config.together_api_key() {
            let together = config.together.clone().unwrap_or_default();
            services.images = Some(Arc::new(TogetherImageClient::new(
                key,
                together
                    .base_url
                    .as_deref()
                    .unwrap_or(DEFAULT_TOGETHER_BASE_URL),
                together.model.as_deref().unwrap_or(DEFAULT_TOGETHER_MODEL),
                config.output_dir(),
            )?));
        }
        services.search = web_search(config)?;
        let wompi = config.wompi.clone().unwrap_or_default();
        if let Some(private_key) = wompi.private_key.as_deref().filter(|k| !k.trim().is_empty()) {
            services.payments = Some(Arc::new(WompiClient::new(
                &config.wompi_base_url(),
                private_key,
                wompi.event_key.clone(),
            )?));
        }
        Ok(services)
    }
}

/// Tavily when its key is set, Google Custom Search as the fallback or as the
/// only provider.
fn web_search(config: &Config) -> Result<Option<Arc<dyn SearchService>>> {
    let search = config.search.clone().unwrap_or_default();
    let tavily = match search.tavily_api_key.as_deref() {
        Some(key) => Some(Arc::new(TavilySearchClient::new(
            key,
            search
                .tavily_base_url
                .as_deref()
                .unwrap_or(DEFAULT_TAVILY_BASE_URL),
        )?) as Arc<dyn SearchService>),
        None => None,
    };
    let google = match (search.google_api_key.as_deref(), search.google_cx.as_deref()) {
        (Some(key), Some(cx)) => Some(Arc::new(GoogleSearchClient::new(
            key,
            cx,
            search
                .google_base_url
                .as_deref()
                .unwrap_or(DEFAULT_GOOGLE_SEARCH_BASE_URL),
            search.google_daily_limit.unwrap_or(DEFAULT_GOOGLE_DAILY_LIMIT),
        )?) as Arc<dyn SearchService>),
        _ => None,
    };
    Ok(match (tavily, google) {
        (Some(tavily), google) => Some(Arc::new(FallbackSearch::new(tavily, google))),
        (None, google) => google,
    })
}

#[derive(Debug, Default)]
pub struct ConversationSession {
    pub state: ConversationState,
    pub history: Vec<ChatTurn>,
}

impl ConversationSession {
    fn remember(&mut self, user: &str, response: &str) {
        self.history.push(ChatTurn::user(user));
        self.history.push(ChatTurn::assistant(response));
        let excess = self.history.len().saturating_sub(MAX_HISTORY);
        if excess > 0 {
            self.history.drain(..excess);
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Reply {
    pub response: String,
    pub active_task: Option<ActiveTask>,
}

pub struct Assistant {
    services: Services,
    dialogs: Dialogs,
    system_prompt: String,
    timezone: String,
    search_results: u32,
    upload_root: PathBuf,
    sessions: Mutex<HashMap<String, Arc<Mutex<ConversationSession>>>>,
}

impl Assistant {
    pub fn new(services: Services, system_prompt: impl Into<String>, timezone: impl Into<String>) -> Self {
        let timezone = timezone.into();
        let dialogs = Dialogs {
            reply: services.mail.clone().map(EmailReplyFlow::new),
            schedule: services
                .calendar
                .clone()
                .map(|calendar| ScheduleFlow::new(calendar, timezone.clone())),
            payment: services.payments.clone().map(PaymentLinkFlow::new),
        };
        Self {
            services,
            dialogs,
            system_prompt: system_prompt.into(),
            timezone,
            search_results: DEFAULT_SEARCH_RESULTS,
            upload_root: crate::runtime_paths::default_output_dir(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let services = Services::from_config(config)?;
        let system_prompt = config
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
        let mut assistant = Self::new(services, system_prompt, config.timezone())
            .with_upload_root(config.drive_upload_root());
        if let Some(max) = config.search.as_ref().and_then(|s| s.max_results) {
            assistant.search_results = max;
        }
        Ok(assistant)
    }

    pub fn with_upload_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.upload_root = root.into();
        self
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    async fn session(&self, session_id: &str) -> Arc<Mutex<ConversationSession>> {
        let mut sessions = self.sessions.lock().await;
        Arc::clone(sessions.entry(session_id.to_string()).or_default())
    }

    /// Runs one turn. Turns for the same session are serialized.
    pub async fn handle(&self, session_id: &str, input: &str) -> Reply {
        let session = self.session(session_id).await;
        let mut session = session.lock().await;
        session.state.begin_turn(input);

        if !self.dialogs.resume(&mut session.state).await {
            let command = router::route(input);
            info!(session = session_id, command = ?command, "routing turn");
            let mut next = self.run_command(command, &mut session).await;
            let mut hops = 0;
            while let Some(route) = next {
                if hops == MAX_HOPS {
                    warn!(session = session_id, route = ?route, "route limit reached");
                    break;
                }
                hops += 1;
                debug!(session = session_id, route = ?route, "following route");
                next = self.follow(route, &mut session).await;
            }
        }

        let response = session.state.response.clone();
        session.remember(input, &response);
        Reply {
            response,
            active_task: session.state.active_task(),
        }
    }

    /// Describes an image with the vision model. An active task is left as is.
    pub async fn handle_with_image(&self, session_id: &str, input: &str, image: ImageSource) -> Reply {
        let session = self.session(session_id).await;
        let mut session = session.lock().await;
        session.state.begin_turn(input);

        let prompt = if input.trim().is_empty() {
            DEFAULT_VISION_PROMPT
        } else {
            input
        };
        let response = match &self.services.chat {
            Some(chat) => match chat.describe_image(prompt, &image).await {
                Ok(text) => text,
                Err(err) => {
                    warn!(session = session_id, error = %err, "image analysis failed");
                    format!("Lo siento, no pude analizar la imagen: {err}")
                }
            },
            None => NOT_CONFIGURED_CHAT.to_string(),
        };
        session.state.response = response.clone();
        session.remember(prompt, &response);
        Reply {
            response,
            active_task: session.state.active_task(),
        }
    }

    /// Drops the session, active task included. `false` if none existed.
    pub async fn reset(&self, session_id: &str) -> bool {
        self.sessions.lock().await.remove(session_id).is_some()
    }

    pub async fn active_task(&self, session_id: &str) -> Option<ActiveTask> {
        let session = self.sessions.lock().await.get(session_id).cloned()?;
        let session = session.lock().await;
        session.state.active_task()
    }

    async fn run_command(&self, command: Command, session: &mut ConversationSession) -> Option<Route> {
        let state = &mut session.state;
        match command {
            Command::ReplyEmail => match &self.dialogs.reply {
                Some(flow) => flow.begin(state),
                None => {
                    state.response = NOT_CONFIGURED_MAIL.to_string();
                    None
                }
            },
            Command::ReadEmails => Some(Route::EmailReader),
            Command::ScheduleMeeting => {
                self.begin_schedule(state, true);
                None
            }
            Command::CreateEvent => {
                self.begin_schedule(state, false);
                None
            }
            Command::PaymentLink => {
                match &self.dialogs.payment {
                    Some(flow) => flow.begin(state),
                    None => state.response = NOT_CONFIGURED_PAYMENTS.to_string(),
                }
                None
            }
            Command::ListEvents => {
                state.response = self.list_events(&state.input).await;
                None
            }
            Command::CheckAvailability => {
                state.response = self.availability(&state.input).await;
                None
            }
            Command::GenerateImage { prompt, style } => {
                state.response = self.generate_image(&prompt, style).await;
                None
            }
            Command::UploadToDrive { path } => {
                state.response = self.upload(path).await;
                None
            }
            Command::ListDriveFiles => {
                state.response = self.list_files().await;
                None
            }
            Command::WebSearch { query } => {
                state.response = self.web_search(&query).await;
                None
            }
            Command::Conversation => Some(Route::Conversation),
        }
    }

    fn begin_schedule(&self, state: &mut ConversationState, with_meet: bool) {
        match &self.dialogs.schedule {
            Some(flow) => flow.begin(state, with_meet),
            None => state.response = NOT_CONFIGURED_CALENDAR.to_string(),
        }
    }

    async fn follow(&self, route: Route, session: &mut ConversationSession) -> Option<Route> {
        match route {
            Route::EmailReader => {
                let listing = self.read_emails(&mut session.state).await;
                session.state.response = if session.state.response.is_empty() {
                    listing
                } else {
                    format!("{}\n\n{listing}", session.state.response)
                };
                None
            }
            Route::Conversation => {
                session.state.response = self.converse(&session.history, &session.state.input).await;
                None
            }
        }
    }

    async fn read_emails(&self, state: &mut ConversationState) -> String {
        let Some(mail) = &self.services.mail else {
            return NOT_CONFIGURED_MAIL.to_string();
        };
        let search = EmailSearch::from_utterance(&state.input);
        let query = search.to_query();
        match mail.list_messages(&query, search.max_results).await {
            Ok(emails) => {
                info!(count = emails.len(), query = %query, "listed emails");
                let listing = format_listing(&emails);
                state.context.listed_emails = emails;
                listing
            }
            Err(err) => failure_text("leer tus correos", &err),
        }
    }

    async fn list_events(&self, input: &str) -> String {
        let Some(calendar) = &self.services.calendar else {
            return NOT_CONFIGURED_CALENDAR.to_string();
        };
        let (from, to) = event_window(input, Local::now().naive_local());
        match calendar.list_events(from, to, EVENT_LIST_LIMIT).await {
            Ok(events) => format_events(&events),
            Err(err) => failure_text("consultar tu calendario", &err),
        }
    }

    async fn availability(&self, input: &str) -> String {
        let Some(calendar) = &self.services.calendar else {
            return NOT_CONFIGURED_CALENDAR.to_string();
        };
        let Some(start) = find_datetime(input) else {
            return ASK_AVAILABILITY_TIME.to_string();
        };
        let duration = find_duration_minutes(input).unwrap_or(DEFAULT_DURATION_MINUTES);
        match check_availability(calendar.as_ref(), start, duration).await {
            Ok(availability) if availability.available => format!(
                "Estás disponible el {} durante {duration} minutos.",
                start.format("%Y-%m-%d %H:%M")
            ),
            Ok(availability) => {
                let mut out = format!(
                    "No estás disponible el {}. Tienes {} conflicto(s):",
                    start.format("%Y-%m-%d %H:%M"),
                    availability.conflicts.len()
                );
                for conflict in &availability.conflicts {
                    out.push_str(&format!("\n- {} ({} → {})", conflict.summary, conflict.start, conflict.end));
                }
                out
            }
            Err(err) => failure_text("revisar tu disponibilidad", &err),
        }
    }

    async fn generate_image(&self, prompt: &str, style: &str) -> String {
        let Some(images) = &self.services.images else {
            return NOT_CONFIGURED_IMAGES.to_string();
        };
        match images.generate(prompt, style).await {
            Ok(image) => format!(
                "¡Imagen generada! La guardé en {} ({:.1} s, modelo {}).",
                image.path.display(),
                image.generation_seconds,
                image.model
            ),
            Err(err) => failure_text("generar la imagen", &err),
        }
    }

    async fn upload(&self, path: Option<PathBuf>) -> String {
        let Some(drive) = &self.services.drive else {
            return NOT_CONFIGURED_DRIVE.to_string();
        };
        let Some(path) = path else {
            return ASK_UPLOAD_PATH.to_string();
        };
        let path = match self.confine_upload(&path).await {
            Ok(path) => path,
            Err(message) => return message,
        };
        match drive.upload_file(&path, None).await {
            Ok(file) => match file.web_view_link {
                Some(link) => format!("Archivo subido a Drive: {link}"),
                None => format!("Archivo subido a Drive con id {}.", file.id),
            },
            Err(err) => failure_text("subir el archivo", &err),
        }
    }

    /// Relative paths resolve against the upload root; anything that
    /// resolves outside it, symlinks included, is refused.
    async fn confine_upload(&self, path: &Path) -> std::result::Result<PathBuf, String> {
        let root = tokio::fs::canonicalize(&self.upload_root).await.map_err(|_| {
            format!(
                "La carpeta de archivos para Drive ({}) no existe.",
                self.upload_root.display()
            )
        })?;
        let candidate = if path.is_absolute() {
            path.to_path_buf()
        } else {
            root.join(path)
        };
        let resolved = tokio::fs::canonicalize(&candidate)
            .await
            .map_err(|_| format!("No encontré el archivo {}.", path.display()))?;
        if !resolved.starts_with(&root) {
            warn!(path = %resolved.display(), root = %root.display(), "upload outside the upload root refused");
            return Err(format!(
                "Solo puedo subir a Drive archivos que estén en {}.",
                root.display()
            ));
        }
        Ok(resolved)
    }

    async fn list_files(&self) -> String {
        let Some(drive) = &self.services.drive else {
            return NOT_CONFIGURED_DRIVE.to_string();
        };
        match drive.list_files(None).await {
            Ok(files) => format_files(&files),
            Err(err) => failure_text("listar tus archivos", &err),
        }
    }

    /// Results are summarized by the chat model when one is configured.
    async fn web_search(&self, query: &str) -> String {
        let Some(search) = &self.services.search else {
            return NOT_CONFIGURED_SEARCH.to_string();
        };
        if query.trim().is_empty() {
            return ASK_SEARCH_QUERY.to_string();
        }
        let results = match search.search(query, self.search_results).await {
            Ok(results) => results,
            Err(err) => return failure_text("buscar en internet", &err),
        };
        info!(provider = search.name(), count = results.len(), "web search done");
        let (Some(chat), false) = (&self.services.chat, results.is_empty()) else {
            return format_results(query, &results);
        };
        match chat
            .complete(ANALYSIS_SYSTEM_PROMPT, &[], &analysis_prompt(query, &results))
            .await
        {
            Ok(analysis) => analysis,
            Err(err) => {
                warn!(error = %err, "search analysis failed");
                format_results(query, &results)
            }
        }
    }

    async fn converse(&self, history: &[ChatTurn], input: &str) -> String {
        let Some(chat) = &self.services.chat else {
            return NOT_CONFIGURED_CHAT.to_string();
        };
        let system = format!(
            "{}\n\nFecha y hora actual: {} ({}).",
            self.system_prompt,
            Local::now().format("%Y-%m-%d %H:%M"),
            self.timezone
        );
        match chat.complete(&system, history, input).await {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, "conversation turn failed");
                CHAT_FAILED.to_string()
            }
        }
    }
}

fn failure_text(action: &str, err: &AvaBotError) -> String {
    warn!(action, error = %err, "handler failed");
    match err {
        AvaBotError::NoCredentials(_) => NO_GOOGLE_CREDENTIALS.to_string(),
        err if err.is_setup_error() => format!("No pude {action}: {err}"),
        _ => format!("Lo siento, hubo un problema al {action}."),
    }
}

/// "hoy" and "mañana" cover that single day; otherwise the next seven days.
pub fn event_window(input: &str, now: NaiveDateTime) -> (NaiveDateTime, NaiveDateTime) {
    let lowered = input.to_lowercase();
    let midnight = now.date().and_time(NaiveTime::MIN);
    if lowered.contains("mañana") || lowered.contains("tomorrow") {
        let start = midnight + TimeDelta::days(1);
        (start, start + TimeDelta::days(1))
    } else if lowered.contains("hoy") || lowered.contains("today") {
        (now, midnight + TimeDelta::days(1))
    } else {
        (now, now + TimeDelta::days(7))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(raw: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M").unwrap()
    }

    #[test]
    fn event_windows() {
        let now = at("2026-10-18 09:30");
        assert_eq!(
            event_window("¿qué tengo mañana?", now),
            (at("2026-10-19 00:00"), at("2026-10-20 00:00"))
        );
        assert_eq!(
            event_window("mis eventos de hoy", now),
            (now, at("2026-10-19 00:00"))
        );
        assert_eq!(event_window("mis eventos", now), (now, at("2026-10-25 09:30")));
    }

    #[test]
    fn history_keeps_the_latest_turns() {
        let mut session = ConversationSession::default();
        for i in 0..8 {
            session.remember(&format!("u{i}"), &format!("a{i}"));
        }
        assert_eq!(session.history.len(), MAX_HISTORY);
        assert_eq!(session.history[0].content, "u3");
        assert_eq!(session.history[MAX_HISTORY - 1].content, "a7");
    }

    #[test]
    fn missing_credentials_get_a_setup_hint() {
        let text = failure_text(
            "leer tus correos",
            &AvaBotError::NoCredentials("none".to_string()),
        );
        assert_eq!(text, NO_GOOGLE_CREDENTIALS);
        let text = failure_text(
            "leer tus correos",
            &AvaBotError::Upstream {
                status: 500,
                body: "x".to_string(),
            },
        );
        assert_eq!(text, "Lo siento, hubo un problema al leer tus correos.");
    }
}
