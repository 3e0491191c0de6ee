//! Image generation through an OpenAI-compatible images endpoint.

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use manlet_config::ArtConfig;
use tracing::{debug, error};

/// Turns a prompt into a hosted image.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Generate one image and return its URL.
    async fn generate(&self, prompt: &str) -> Result<String>;
}

pub struct OpenAiImageGenerator {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
    model: String,
    size: String,
    quality: String,
}

impl OpenAiImageGenerator {
    /// Fails when `api_key` is empty; art generation cannot start without it.
    pub fn new(api_key: String, config: &ArtConfig) -> Result<Self> {
        if api_key.trim().is_empty() {
            bail!(
                "Image generation needs an API key. \
                 Set art.apiKey in config.json or the OPENAI_API_KEY env var."
            );
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            client,
            api_key,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            size: config.size.clone(),
            quality: config.quality.clone(),
        })
    }

    fn request_body(&self, prompt: &str) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "n": 1,
            "size": self.size,
            "quality": self.quality,
        })
    }
}

#[async_trait]
impl ImageGenerator for OpenAiImageGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        debug!("Generating image with {} ({} chars of prompt)", self.model, prompt.len());
        let resp = self
            .client
            .post(format!("{}/images/generations", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&self.request_body(prompt))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            error!("Image generation failed ({status}): {body}");
            bail!("image API returned {status}");
        }

        let data: serde_json::Value = resp.json().await?;
        extract_image_url(&data)
    }
}

fn extract_image_url(data: &serde_json::Value) -> Result<String> {
    data.get("data")
        .and_then(|d| d.get(0))
        .and_then(|img| img.get("url"))
        .and_then(|u| u.as_str())
        .map(String::from)
        .ok_or_else(|| anyhow::anyhow!("no image URL in response"))
}
