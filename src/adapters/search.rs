//! Web search: Tavily first, Google Custom Search when Tavily is missing or
//! fails.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{build_client, json_or_upstream, trim_base, DEFAULT_TIMEOUT};
use crate::error::{AvaBotError, Result};
use crate::interfaces::services::{SearchResult, SearchService};

pub const DEFAULT_TAVILY_BASE_URL: &str = "https://api.tavily.com";
pub const DEFAULT_GOOGLE_SEARCH_BASE_URL: &str = "https://www.googleapis.com";
pub const DEFAULT_GOOGLE_DAILY_LIMIT: u32 = 100;
const SNIPPET_CHARS: usize = 200;
const GOOGLE_MAX_NUM: u32 = 10;
const SUMMARY_SHOWN: usize = 3;

pub const ANALYSIS_SYSTEM_PROMPT: &str = "Eres Ava, una asistente especializada en análisis de \
información web. Proporciona análisis concisos y útiles.";

fn domain(url: &str) -> String {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    rest.split('/').next().unwrap_or_default().to_string()
}

fn truncate_snippet(text: &str) -> String {
    if text.chars().count() <= SNIPPET_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(SNIPPET_CHARS).collect();
    format!("{cut}...")
}

fn text_field(item: &Value, key: &str) -> Option<String> {
    item.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub struct TavilySearchClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl TavilySearchClient {
    pub fn new(api_key: &str, base_url: &str) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(AvaBotError::Config("TAVILY_API_KEY is empty".to_string()));
        }
        Ok(Self {
            base_url: trim_base(base_url),
            api_key: api_key.trim().to_string(),
            client: build_client(DEFAULT_TIMEOUT)?,
        })
    }
}

#[async_trait]
impl SearchService for TavilySearchClient {
    fn name(&self) -> &str {
        "tavily"
    }

    async fn search(&self, query: &str, max_results: u32) -> Result<Vec<SearchResult>> {
        info!(query, "tavily search");
        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "query": query,
                "search_depth": "basic",
                "include_answer": false,
                "include_raw_content": false,
                "max_results": max_results,
            }))
            .send()
            .await?;
        let body = json_or_upstream(response).await?;

        let results = body
            .get("results")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .take(max_results as usize)
                    .map(|item| {
                        let link = text_field(item, "url").unwrap_or_else(|| "#".to_string());
                        SearchResult {
                            title: text_field(item, "title")
                                .unwrap_or_else(|| "Sin título".to_string()),
                            snippet: text_field(item, "content")
                                .map(|content| truncate_snippet(&content))
                                .unwrap_or_else(|| "Sin descripción".to_string()),
                            display_link: domain(&link),
                            link,
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(results)
    }
}

/// Google Custom Search with a local per-day request budget.
pub struct GoogleSearchClient {
    base_url: String,
    api_key: String,
    cx: String,
    daily_limit: u32,
    usage: Mutex<(NaiveDate, u32)>,
    client: reqwest::Client,
}

impl GoogleSearchClient {
    pub fn new(api_key: &str, cx: &str, base_url: &str, daily_limit: u32) -> Result<Self> {
        if api_key.trim().is_empty() || cx.trim().is_empty() {
            return Err(AvaBotError::Config(
                "GOOGLE_API_KEY and GOOGLE_CX_ID are required for google search".to_string(),
            ));
        }
        Ok(Self {
            base_url: trim_base(base_url),
            api_key: api_key.trim().to_string(),
            cx: cx.trim().to_string(),
            daily_limit,
            usage: Mutex::new((Local::now().date_naive(), 0)),
            client: build_client(DEFAULT_TIMEOUT)?,
        })
    }

    /// Counts one request against today's budget; `false` once it is spent.
    fn take_budget(&self) -> bool {
        let Ok(mut usage) = self.usage.lock() else {
            return false;
        };
        let today = Local::now().date_naive();
        if usage.0 != today {
            *usage = (today, 0);
        }
        if usage.1 >= self.daily_limit {
            return false;
        }
        usage.1 += 1;
        true
    }
}

#[async_trait]
impl SearchService for GoogleSearchClient {
    fn name(&self) -> &str {
        "google"
    }

    async fn search(&self, query: &str, max_results: u32) -> Result<Vec<SearchResult>> {
        if !self.take_budget() {
            warn!(limit = self.daily_limit, "google search daily limit reached");
            return Err(AvaBotError::Runtime(
                "google search daily limit reached".to_string(),
            ));
        }
        info!(query, "google search");
        let num = max_results.clamp(1, GOOGLE_MAX_NUM).to_string();
        let response = self
            .client
            .get(format!("{}/customsearch/v1", self.base_url))
            .query(&[
                ("key", self.api_key.as_str()),
                ("cx", self.cx.as_str()),
                ("q", query),
                ("num", num.as_str()),
                ("hl", "es"),
                ("lr", "lang_es"),
            ])
            .send()
            .await?;
        let body = json_or_upstream(response).await?;

        let results = body
            .get("items")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .map(|item| {
                        let link = text_field(item, "link").unwrap_or_else(|| "#".to_string());
                        SearchResult {
                            title: text_field(item, "title")
                                .unwrap_or_else(|| "Sin título".to_string()),
                            snippet: text_field(item, "snippet")
                                .unwrap_or_else(|| "Sin descripción".to_string()),
                            display_link: text_field(item, "displayLink")
                                .unwrap_or_else(|| domain(&link)),
                            link,
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(results)
    }
}

/// Asks `primary` and switches to `fallback` when it errors.
pub struct FallbackSearch {
    primary: Arc<dyn SearchService>,
    fallback: Option<Arc<dyn SearchService>>,
}

impl FallbackSearch {
    pub fn new(primary: Arc<dyn SearchService>, fallback: Option<Arc<dyn SearchService>>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl SearchService for FallbackSearch {
    fn name(&self) -> &str {
        self.primary.name()
    }

    async fn search(&self, query: &str, max_results: u32) -> Result<Vec<SearchResult>> {
        match self.primary.search(query, max_results).await {
            Ok(results) => Ok(results),
            Err(err) => match &self.fallback {
                Some(fallback) => {
                    warn!(
                        primary = self.primary.name(),
                        fallback = fallback.name(),
                        error = %err,
                        "search provider failed, using fallback"
                    );
                    fallback.search(query, max_results).await
                }
                None => Err(err),
            },
        }
    }
}

/// Plain summary used when no model is available to analyze the results.
pub fn format_results(query: &str, results: &[SearchResult]) -> String {
    if results.is_empty() {
        return format!("No se encontraron resultados para '{query}'");
    }
    let mut out = format!(
        "Resumen de búsqueda: '{query}'\n\nEncontré {} resultados relevantes:\n",
        results.len()
    );
    for (i, result) in results.iter().take(SUMMARY_SHOWN).enumerate() {
        out.push_str(&format!(
            "\n{}. {}\n   {}\n   {}\n",
            i + 1,
            result.title,
            result.link,
            result.snippet
        ));
    }
    if results.len() > SUMMARY_SHOWN {
        out.push_str(&format!(
            "\n... y {} resultados más.",
            results.len() - SUMMARY_SHOWN
        ));
    }
    out
}

pub fn analysis_prompt(query: &str, results: &[SearchResult]) -> String {
    let mut context = String::new();
    for (i, result) in results.iter().take(5).enumerate() {
        context.push_str(&format!(
            "{}. {}\n   URL: {}\n   Descripción: {}\n\n",
            i + 1,
            result.title,
            result.link,
            result.snippet
        ));
    }
    format!(
        "Analiza estos resultados de búsqueda para la consulta: \"{query}\"\n\n\
RESULTADOS ENCONTRADOS:\n{context}\
Proporciona un resumen conciso de la información más relevante, los puntos clave \
y una conclusión útil. Responde en español, máximo 300 palabras."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(i: usize) -> SearchResult {
        SearchResult {
            title: format!("Título {i}"),
            link: format!("https://sitio{i}.example/nota"),
            snippet: "Resumen".to_string(),
            display_link: format!("sitio{i}.example"),
        }
    }

    #[test]
    fn domains_and_snippets() {
        assert_eq!(domain("https://www.rust-lang.org/learn"), "www.rust-lang.org");
        assert_eq!(domain("example.com/a"), "example.com");
        assert_eq!(truncate_snippet("corto"), "corto");
        let long = "á".repeat(250);
        let cut = truncate_snippet(&long);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), SNIPPET_CHARS + 3);
    }

    #[test]
    fn summary_shows_the_first_three() {
        let results: Vec<_> = (1..=5).map(result).collect();
        let text = format_results("rust", &results);
        assert!(text.contains("Encontré 5 resultados"));
        assert!(text.contains("3. Título 3"));
        assert!(!text.contains("Título 4"));
        assert!(text.ends_with("... y 2 resultados más."));
        assert_eq!(
            format_results("nada", &[]),
            "No se encontraron resultados para 'nada'"
        );
    }

    #[test]
    fn google_budget_resets_daily() {
        let client = GoogleSearchClient::new("key", "cx", "http://127.0.0.1:9", 2).unwrap();
        assert!(client.take_budget());
        assert!(client.take_budget());
        assert!(!client.take_budget());
        client.usage.lock().unwrap().0 = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        assert!(client.take_budget());
    }
}
