use std::path::PathBuf;
use std::time::Instant;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::Local;
use serde_json::json;
use tracing::info;

use super::{build_client, json_or_upstream, trim_base, IMAGE_TIMEOUT};
use crate::error::{AvaBotError, Result};
use crate::interfaces::services::{GeneratedImage, ImageGenerator};

pub const PROMPT_LIMIT: usize = 500;
const WIDTH: u32 = 1024;
const HEIGHT: u32 = 768;
const STEPS: u32 = 4;

pub fn style_suffix(style: &str) -> &'static str {
    match style.trim().to_lowercase().as_str() {
        "photorealistic" | "realista" | "fotorrealista" => {
            "photorealistic, high quality, detailed, professional photography, 8k resolution"
        }
        "artistic" | "artístico" | "artistico" => {
            "artistic, creative, beautiful composition, vibrant colors, masterpiece"
        }
        "anime" => "anime style, manga, japanese animation, detailed, colorful",
        "cyberpunk" => "cyberpunk style, neon lights, futuristic, dark atmosphere, high tech",
        "fantasy" | "fantasía" | "fantasia" => {
            "fantasy art, magical, mystical, epic, detailed illustration"
        }
        _ => "high quality, detailed, beautiful",
    }
}

/// Appends the style keywords, collapses whitespace and caps the length.
pub fn enhance_prompt(prompt: &str, style: &str) -> String {
    let combined = format!("{}, {}", prompt.trim(), style_suffix(style));
    let normalized = combined.split_whitespace().collect::<Vec<_>>().join(" ");
    normalized.chars().take(PROMPT_LIMIT).collect()
}

pub fn detect_style(text: &str) -> &'static str {
    let lowered = text.to_lowercase();
    [
        ("realista", "photorealistic"),
        ("photorealistic", "photorealistic"),
        ("artístic", "artistic"),
        ("artistic", "artistic"),
        ("anime", "anime"),
        ("cyberpunk", "cyberpunk"),
        ("fantasía", "fantasy"),
        ("fantasy", "fantasy"),
    ]
    .iter()
    .find(|(needle, _)| lowered.contains(needle))
    .map(|(_, style)| *style)
    .unwrap_or("default")
}

pub struct TogetherImageClient {
    api_key: String,
    base_url: String,
    model: String,
    output_dir: PathBuf,
    client: reqwest::Client,
}

impl TogetherImageClient {
    pub fn new(api_key: &str, base_url: &str, model: &str, output_dir: PathBuf) -> Result<Self> {
        Ok(Self {
            api_key: api_key.to_string(),
            base_url: trim_base(base_url),
            model: model.to_string(),
            output_dir,
            client: build_client(IMAGE_TIMEOUT)?,
        })
    }
}

#[async_trait]
impl ImageGenerator for TogetherImageClient {
    async fn generate(&self, prompt: &str, style: &str) -> Result<GeneratedImage> {
        let prompt_used = enhance_prompt(prompt, style);
        let started = Instant::now();
        info!(model = %self.model, style, "requesting image generation");

        let response = self
            .client
            .post(format!("{}/v1/images/generations", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "prompt": prompt_used,
                "width": WIDTH,
                "height": HEIGHT,
                "steps": STEPS,
                "n": 1,
                "response_format": "b64_json",
            }))
            .send()
            .await?;
        let body = json_or_upstream(response).await?;
        let encoded = body
            .pointer("/data/0/b64_json")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                AvaBotError::Serialization("image response without data[0].b64_json".to_string())
            })?;
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| AvaBotError::Serialization(e.to_string()))?;
        let generation_seconds = started.elapsed().as_secs_f64();

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| AvaBotError::Runtime(e.to_string()))?;
        let now = Local::now();
        let stem = format!("ava_generated_{}", now.format("%Y%m%d_%H%M%S_%3f"));
        let filename = format!("{stem}.png");
        let path = self.output_dir.join(&filename);
        let metadata_path = self.output_dir.join(format!("{stem}_meta.json"));

        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| AvaBotError::Runtime(e.to_string()))?;
        let metadata = json!({
            "prompt": prompt_used,
            "original_prompt": prompt,
            "style": style,
            "generated_at": now.to_rfc3339(),
            "model": self.model,
            "api": "together",
            "filename": filename,
            "size": format!("{WIDTH}x{HEIGHT}"),
            "generation_seconds": generation_seconds,
        });
        let metadata_text = serde_json::to_string_pretty(&metadata)?;
        tokio::fs::write(&metadata_path, metadata_text)
            .await
            .map_err(|e| AvaBotError::Runtime(e.to_string()))?;

        info!(path = %path.display(), seconds = generation_seconds, "image saved");
        Ok(GeneratedImage {
            path,
            metadata_path,
            prompt_used,
            model: self.model.clone(),
            generation_seconds,
        })
    }
}
