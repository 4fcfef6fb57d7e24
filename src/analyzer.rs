//! Fishing spot analysis by a remote vision model.
//!
//! Talks to an OpenAI compatible chat-completions endpoint (OpenRouter by
//! default) with [`reqwest`]. The HTTP layer treats every [`Error`] as a
//! degraded answer, never as a failed request.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::AnalyzerConfig;

const PROMPT: &str = "You are an experienced fishing guide. Study this photo of a fishing spot and give an angler practical advice.

Cover each of these:
1. **Structure Analysis**: visible underwater structure, cover, vegetation and shoreline features
2. **Fish Habitat Assessment**: which species are likely to hold here and why
3. **Casting Recommendations**: where to cast and why
4. **Bait/Lure Suggestions**: baits or lures suited to this spot
5. **Technique Tips**: presentations that should work best
6. **Best Times**: time of day and weather when this spot fishes best
7. **Confidence Score**: rate the spot from 1 to 10

Keep it clear and actionable.";

const MAX_TOKENS: u32 = 1000;
const TEMPERATURE: f32 = 0.7;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("image analysis is not configured")]
    NotConfigured,

    #[error("Could not build HTTP client")]
    BuildClient(#[source] reqwest::Error),

    #[error("request to vision model failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("vision model returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("vision model returned no answer")]
    EmptyAnswer,
}

/// Turns an image into a textual fishing recommendation.
#[async_trait]
pub trait Analyze: Send + Sync {
    async fn analyze(&self, image: &[u8], content_type: &str) -> Result<String, Error>;
}

/// Stand-in used when no API key is configured; every call fails with
/// [`Error::NotConfigured`].
#[derive(Debug, Default, Clone, Copy)]
pub struct Disabled;

#[async_trait]
impl Analyze for Disabled {
    async fn analyze(&self, _image: &[u8], _content_type: &str) -> Result<String, Error> {
        Err(Error::NotConfigured)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage; 1],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: &'static str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

impl<'a> ChatRequest<'a> {
    fn for_image(model: &'a str, image: &[u8], content_type: &str) -> Self {
        let url = format!("data:{content_type};base64,{}", STANDARD.encode(image));

        Self {
            model,
            messages: [ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text { text: PROMPT },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url },
                    },
                ],
            }],
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl ChatResponse {
    fn into_answer(self) -> Result<String, Error> {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(Error::EmptyAnswer)
    }
}

/// Client for the vision model.
pub struct SpotAnalyzer {
    client: reqwest::Client,
    endpoint: Url,
    api_key: SecretString,
    model: String,
    site_url: String,
    site_name: String,
}

impl SpotAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(Error::BuildClient)?;

        Ok(Self {
            client,
            endpoint: config.chat_completions_url(),
            api_key: config.api_key,
            model: config.model,
            site_url: config.site_url,
            site_name: config.site_name,
        })
    }
}

#[async_trait]
impl Analyze for SpotAnalyzer {
    async fn analyze(&self, image: &[u8], content_type: &str) -> Result<String, Error> {
        let body = ChatRequest::for_image(&self.model, image, content_type);

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(self.api_key.expose_secret())
            .header("HTTP-Referer", &self.site_url)
            .header("X-Title", &self.site_name)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(Error::Api {
                status: status.as_u16(),
                body,
            });
        }

        response.json::<ChatResponse>().await?.into_answer()
    }
}
