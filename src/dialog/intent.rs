use std::sync::OnceLock;

use chrono::NaiveDateTime;
use regex::Regex;

use super::engine::Intent;

pub const AFFIRMATIVE: [&str; 5] = ["sí", "si", "yes", "confirmar", "confirm"];
pub const NEGATIVE: [&str; 3] = ["no", "cancelar", "cancel"];

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

pub fn normalize(input: &str) -> String {
    input.trim().to_lowercase()
}

pub fn confirmation(input: &str) -> Intent {
    let normalized = normalize(input);
    if AFFIRMATIVE.contains(&normalized.as_str()) {
        Intent::Affirm
    } else if NEGATIVE.contains(&normalized.as_str()) {
        Intent::Deny
    } else {
        Intent::Unrecognized
    }
}

fn exact_selection_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:(?:n[úu]mero|correo|email)\s+)?#?(\d{1,3})$").unwrap()
    })
}

fn embedded_selection_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:n[úu]mero|correo|email)\s+#?(\d{1,3})\b").unwrap()
    })
}

fn in_range(raw: &str, listed: usize) -> Option<usize> {
    raw.parse::<usize>()
        .ok()
        .filter(|index| *index >= 1 && *index <= listed)
}

/// The whole utterance must name one listed position.
pub fn selection(input: &str, listed: usize) -> Intent {
    let normalized = normalize(input);
    exact_selection_regex()
        .captures(&normalized)
        .and_then(|caps| caps.get(1))
        .and_then(|m| in_range(m.as_str(), listed))
        .map(Intent::Pick)
        .unwrap_or(Intent::Unrecognized)
}

/// Finds "correo 2" / "número 2" inside a longer request.
pub fn selection_in(text: &str, listed: usize) -> Option<usize> {
    let normalized = normalize(text);
    embedded_selection_regex()
        .captures(&normalized)
        .and_then(|caps| caps.get(1))
        .and_then(|m| in_range(m.as_str(), listed))
}

pub fn free_text(input: &str) -> Intent {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        Intent::Blank
    } else {
        Intent::Content(trimmed.to_string())
    }
}

pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
}

fn datetime_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}(?::\d{2})?").unwrap()
    })
}

pub fn find_datetime(text: &str) -> Option<NaiveDateTime> {
    datetime_regex()
        .find_iter(text)
        .find_map(|m| parse_datetime(m.as_str()))
}

pub fn start_time(input: &str) -> Intent {
    if input.trim().is_empty() {
        return Intent::Blank;
    }
    parse_datetime(input)
        .map(Intent::Time)
        .unwrap_or(Intent::Unrecognized)
}

fn amount_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$?\s?(\d{1,3}(?:[.,]\d{3})+(?:[.,]\d{1,2})?|\d+(?:[.,]\d{1,2})?)")
            .unwrap()
    })
}

/// Parses a peso amount into cents. A trailing separator followed by one or
/// two digits is decimal; every other separator groups thousands.
pub fn parse_amount_cents(raw: &str) -> Option<u64> {
    let mut cleaned = normalize(raw);
    for noise in ["$", "cop", "pesos", "peso", " "] {
        cleaned = cleaned.replace(noise, "");
    }
    if cleaned.is_empty() || !cleaned.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',') {
        return None;
    }

    let (whole, fraction) = match cleaned.rfind(&['.', ','][..]) {
        Some(pos) if (1..=2).contains(&(cleaned.len() - pos - 1)) => {
            (&cleaned[..pos], &cleaned[pos + 1..])
        }
        _ => (cleaned.as_str(), ""),
    };

    let groups: Vec<&str> = whole.split(&['.', ','][..]).collect();
    if groups.len() > 1
        && (groups[0].is_empty()
            || groups[0].len() > 3
            || groups[1..].iter().any(|group| group.len() != 3))
    {
        return None;
    }
    let digits: String = groups.concat();
    let pesos: u64 = digits.parse().ok()?;
    let cents: u64 = match fraction.len() {
        0 => 0,
        1 => fraction.parse::<u64>().ok()? * 10,
        _ => fraction.parse().ok()?,
    };

    let total = pesos.checked_mul(100)?.checked_add(cents)?;
    (total > 0).then_some(total)
}

pub fn amount(input: &str) -> Intent {
    if input.trim().is_empty() {
        return Intent::Blank;
    }
    parse_amount_cents(input)
        .map(Intent::Amount)
        .unwrap_or(Intent::Unrecognized)
}

/// First amount mentioned in a longer request, with the text that follows it.
pub fn find_amount(text: &str) -> Option<(u64, &str)> {
    amount_regex().captures_iter(text).find_map(|caps| {
        let whole = caps.get(0)?;
        let cents = parse_amount_cents(caps.get(1)?.as_str())?;
        Some((cents, &text[whole.end()..]))
    })
}

pub fn format_cop(cents: u64) -> String {
    let pesos = (cents / 100).to_string();
    let mut grouped = String::new();
    for (index, digit) in pesos.chars().enumerate() {
        if index > 0 && (pesos.len() - index) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(digit);
    }
    match cents % 100 {
        0 => format!("${grouped}"),
        fraction => format!("${grouped},{fraction:02}"),
    }
}
