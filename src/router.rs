//! Keyword routing for utterances that arrive while no task is active.

use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;

use crate::adapters::together::detect_style;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    ReplyEmail,
    ReadEmails,
    ScheduleMeeting,
    CreateEvent,
    ListEvents,
    CheckAvailability,
    PaymentLink,
    GenerateImage { prompt: String, style: &'static str },
    UploadToDrive { path: Option<PathBuf> },
    ListDriveFiles,
    WebSearch { query: String },
    Conversation,
}

const REPLY: &[&str] = &["responde", "responder", "contesta", "contestar", "reply"];
const EMAIL: &[&str] = &["correo", "email", "e-mail", "mail", "bandeja", "inbox"];
const READ: &[&str] = &[
    "lee", "leer", "muestra", "mostrar", "revisa", "revisar", "ver ", "mis correos", "read",
    "show", "check",
];
const MEETING: &[&str] = &["meet", "reunión", "reunion", "videollamada", "meeting"];
const SCHEDULE: &[&str] = &[
    "agenda", "agendar", "programa", "programar", "crea", "crear", "schedule", "create",
];
const EVENT: &[&str] = &["evento", "cita", "calendario", "event", "appointment"];
const LIST_EVENTS: &[&str] = &[
    "mis eventos",
    "qué tengo",
    "que tengo",
    "mi agenda",
    "my events",
    "my calendar",
];
const AVAILABILITY: &[&str] = &["disponible", "disponibilidad", "libre", "available"];
const PAYMENT: &[&str] = &[
    "link de pago",
    "enlace de pago",
    "link para pagar",
    "cobro",
    "cobrar",
    "payment link",
];
const IMAGE_VERBS: &[&str] = &[
    "genera", "generar", "crea", "crear", "haz", "hacer", "dibuja", "generate", "create", "draw",
];
const IMAGE_NOUNS: &[&str] = &["imagen", "image", "picture", "ilustración", "ilustracion", "foto"];
const DRIVE: &[&str] = &["drive"];
const SEARCH: &[&str] = &[
    "busca", "búscame", "investiga", "en internet", "en google", "en la web", "search",
    "look up",
];
const UPLOAD: &[&str] = &["sube", "subir", "guarda", "guardar", "upload"];

fn contains_any(text: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| text.contains(needle))
}

fn image_prefix_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(?:por favor\s*,?\s*)?(?:genera|generar|crea|crear|haz|hacer|dibuja|generate|create|draw)(?:me)?\s+(?:una?\s+|an?\s+)?(?:imagen|image|picture|ilustraci[óo]n|foto)?\s*(?:del|de|con|of|with)?\s*",
        )
        .unwrap()
    })
}

fn path_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?:"([^"]+)"|((?:~|\.{0,2})?/?[\w.\-/]*\.[A-Za-z0-9]{1,5}))"#).unwrap())
}

fn search_prefix_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(?:por favor\s*,?\s*)?(?:b[úu]scame|buscar|busca|investigar|investiga|search|look\s+up)\s+(?:(?:en\s+(?:internet|google|la\s+web)|informaci[óo]n|info|noticias\s+sobre|sobre|acerca\s+de|the\s+web\s+for|online|for)\s+)*",
        )
        .unwrap()
    })
}

/// Drops the search verb and filler so only the topic is searched.
pub fn search_query(text: &str) -> String {
    let stripped = search_prefix_regex().replace(text, "");
    let stripped = stripped.trim().trim_end_matches(['.', '!', '?']).trim();
    if stripped.is_empty() {
        text.trim().to_string()
    } else {
        stripped.to_string()
    }
}

/// Strips the request verb so only the description reaches the model.
pub fn image_prompt(text: &str) -> String {
    let stripped = image_prefix_regex().replace(text, "");
    let stripped = stripped.trim().trim_end_matches(['.', '!', '?']);
    if stripped.is_empty() {
        text.trim().to_string()
    } else {
        stripped.to_string()
    }
}

pub fn find_path(text: &str) -> Option<PathBuf> {
    path_regex()
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| m.as_str().trim())
        .find(|candidate| !candidate.is_empty() && !candidate.contains('@'))
        .map(PathBuf::from)
}

/// Order matters: replying beats reading, meetings beat plain events, and
/// anything unmatched goes to the conversation model.
pub fn route(text: &str) -> Command {
    let lowered = text.to_lowercase();

    if contains_any(&lowered, REPLY) && contains_any(&lowered, EMAIL) {
        return Command::ReplyEmail;
    }
    if contains_any(&lowered, PAYMENT) {
        return Command::PaymentLink;
    }
    if contains_any(&lowered, IMAGE_VERBS) && contains_any(&lowered, IMAGE_NOUNS) {
        return Command::GenerateImage {
            prompt: image_prompt(text),
            style: detect_style(text),
        };
    }
    if contains_any(&lowered, DRIVE) {
        if contains_any(&lowered, UPLOAD) {
            return Command::UploadToDrive {
                path: find_path(text),
            };
        }
        return Command::ListDriveFiles;
    }
    if contains_any(&lowered, AVAILABILITY) {
        return Command::CheckAvailability;
    }
    if contains_any(&lowered, MEETING) && contains_any(&lowered, SCHEDULE) {
        return Command::ScheduleMeeting;
    }
    if contains_any(&lowered, LIST_EVENTS) {
        return Command::ListEvents;
    }
    if contains_any(&lowered, EVENT) {
        if contains_any(&lowered, SCHEDULE) {
            return Command::CreateEvent;
        }
        return Command::ListEvents;
    }
    if contains_any(&lowered, EMAIL) && (contains_any(&lowered, READ) || lowered.contains("correos")) {
        return Command::ReadEmails;
    }
    if contains_any(&lowered, SEARCH) && !contains_any(&lowered, EMAIL) {
        return Command::WebSearch {
            query: search_query(text),
        };
    }
    Command::Conversation
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_commands() {
        assert_eq!(route("Quiero responder un correo"), Command::ReplyEmail);
        assert_eq!(route("responde el correo 2"), Command::ReplyEmail);
        assert_eq!(route("muéstrame mis correos no leídos"), Command::ReadEmails);
        assert_eq!(route("lee mis emails de hoy"), Command::ReadEmails);
    }

    #[test]
    fn calendar_commands() {
        assert_eq!(
            route("agenda una reunión con ana@example.com el 2026-10-20 15:00"),
            Command::ScheduleMeeting
        );
        assert_eq!(route("crea un evento mañana"), Command::CreateEvent);
        assert_eq!(route("¿qué tengo en mi agenda?"), Command::ListEvents);
        assert_eq!(
            route("¿estoy disponible el 2026-10-20 15:00?"),
            Command::CheckAvailability
        );
    }

    #[test]
    fn payment_image_and_drive_commands() {
        assert_eq!(
            route("crea un link de pago por 150.000 para asesoría"),
            Command::PaymentLink
        );
        assert_eq!(
            route("Genera una imagen de un gato astronauta estilo anime"),
            Command::GenerateImage {
                prompt: "un gato astronauta estilo anime".to_string(),
                style: "anime",
            }
        );
        assert_eq!(
            route("sube /tmp/reporte.pdf a drive"),
            Command::UploadToDrive {
                path: Some(PathBuf::from("/tmp/reporte.pdf"))
            }
        );
        assert_eq!(route("lista mis archivos de drive"), Command::ListDriveFiles);
    }

    #[test]
    fn web_search_commands() {
        assert_eq!(
            route("Busca en internet las noticias de inteligencia artificial"),
            Command::WebSearch {
                query: "las noticias de inteligencia artificial".to_string()
            }
        );
        assert_eq!(
            route("búscame información sobre el clima en Bogotá?"),
            Command::WebSearch {
                query: "el clima en Bogotá".to_string()
            }
        );
        assert_eq!(
            route("search the web for rust async runtimes"),
            Command::WebSearch {
                query: "rust async runtimes".to_string()
            }
        );
        assert_eq!(route("busca correos de Ana"), Command::ReadEmails);
    }

    #[test]
    fn everything_else_is_conversation() {
        assert_eq!(route("hola, ¿cómo estás?"), Command::Conversation);
        assert_eq!(route("cuéntame un chiste"), Command::Conversation);
    }
}
