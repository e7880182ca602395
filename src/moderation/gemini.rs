//! Gemini-backed moderator
//!
//! Sends content to the `generateContent` endpoint and expects a one-word
//! reply: `BAN` or `SAFE`. Any other reply is a malformed response.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{RelayError, Result};
use crate::moderation::{Moderator, Verdict};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", skip_deserializing)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(default)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Content,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: GeminiErrorDetail,
}

const TEXT_POLICY: &str = "You are a content safety filter for a public chat room. \
Decide whether the latest message, read together with the sender's earlier messages, \
involves child sexual exploitation or abuse, sexualisation of minors, grooming of \
children, or violence against children. Consider content that is encoded, obfuscated \
or split across several messages. Reply with exactly one word: BAN if any of these \
are present, SAFE otherwise.";

const IMAGE_POLICY: &str = "You are a content safety filter for a public chat room. \
Decide whether this image depicts child sexual exploitation or abuse, sexualisation of \
minors, or violence against children. Reply with exactly one word: BAN if so, SAFE otherwise.";

/// Client for the Gemini `generateContent` API
pub struct GeminiModerator {
    client: Client,
    api_key: String,
    endpoint: String,
    model: String,
}

impl GeminiModerator {
    pub fn new(api_key: String, endpoint: String, model: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_key,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model,
        })
    }

    fn text_part(text: String) -> Part {
        Part {
            text: Some(text),
            inline_data: None,
        }
    }

    async fn generate(&self, parts: Vec<Part>) -> Result<Verdict> {
        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);
        let request = GenerateContentRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts,
            }],
            generation_config: GenerationConfig {
                temperature: 0.0,
                max_output_tokens: 8,
            },
        };

        // The key travels in a header so it never appears in a request URL
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            if let Ok(error_response) = serde_json::from_str::<GeminiErrorResponse>(&error_text) {
                return Err(RelayError::ClassifierError(format!(
                    "Gemini API error ({}): {}",
                    status, error_response.error.message
                )));
            }
            return Err(RelayError::ClassifierError(format!(
                "Gemini API error: {} - {}",
                status, error_text
            )));
        }

        let body: GenerateContentResponse = response.json().await?;
        let reply = body
            .candidates
            .as_ref()
            .and_then(|c| c.first())
            .map(|c| {
                c.content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .ok_or_else(|| RelayError::ClassifierError("No candidates in classifier response".to_string()))?;

        debug!("Classifier replied {:?}", reply);
        parse_verdict(&reply)
    }
}

/// Interpret the model's one-word reply
pub fn parse_verdict(reply: &str) -> Result<Verdict> {
    let word = reply.trim().trim_end_matches('.').to_uppercase();
    match word.as_str() {
        "BAN" => Ok(Verdict::Block),
        "SAFE" => Ok(Verdict::Allow),
        _ => Err(RelayError::ClassifierError(format!(
            "Malformed classifier reply: {:?}",
            reply
        ))),
    }
}

/// Build the text prompt from the retained context (oldest first)
fn text_prompt(current: &str, context: &[String]) -> String {
    let mut prompt = String::from(TEXT_POLICY);
    let earlier: Vec<&String> = match context.split_last() {
        Some((last, rest)) if last == current => rest.iter().collect(),
        _ => context.iter().collect(),
    };
    if !earlier.is_empty() {
        prompt.push_str("\n\nEarlier messages from the same sender, oldest first:\n");
        for (i, text) in earlier.iter().enumerate() {
            prompt.push_str(&format!("{}. \"{}\"\n", i + 1, text));
        }
    }
    prompt.push_str(&format!("\nLatest message: \"{}\"", current));
    prompt
}

/// Guess an image MIME type from its leading bytes
pub fn sniff_mime_type(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if bytes.starts_with(b"GIF8") {
        "image/gif"
    } else if bytes.starts_with(b"BM") {
        "image/bmp"
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "application/octet-stream"
    }
}

#[async_trait]
impl Moderator for GeminiModerator {
    async fn classify_text(&self, current: &str, context: &[String]) -> Result<Verdict> {
        self.generate(vec![Self::text_part(text_prompt(current, context))]).await
    }

    async fn classify_image(&self, bytes: &[u8]) -> Result<Verdict> {
        let image = Part {
            text: None,
            inline_data: Some(InlineData {
                mime_type: sniff_mime_type(bytes).to_string(),
                data: BASE64.encode(bytes),
            }),
        };
        self.generate(vec![Self::text_part(IMAGE_POLICY.to_string()), image]).await
    }
}
