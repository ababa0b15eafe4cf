//! Secondary email strategy, tried only when regex and `mailto:` found nothing on a page.
//!
//! The shipped implementation asks an OpenRouter-compatible chat completion endpoint to
//! read the markup. A configuration-class failure (bad key, unknown model, no credit)
//! flips a run-wide switch so no other worker wastes a request on it.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, error, warn};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::config::LlmSettings;
use crate::emails::{extract_from_text, is_valid_email};
use crate::error::Result;

const INSTRUCTION: &str = "Extract all email addresses from the content that appear to be contact emails. \
Format your response as a JSON object with the key 'emails' (array of email addresses). \
Respond with JSON only.";

/// What a secondary strategy produced: either a structured list or free text that still
/// has to go through the email regex.
#[derive(Debug, Clone, PartialEq)]
pub enum SecondaryOutput {
    Structured(Vec<String>),
    Text(String),
}

impl SecondaryOutput {
    /// Candidates after the same validity filter the regex path uses.
    pub fn into_candidates(self) -> BTreeSet<String> {
        match self {
            SecondaryOutput::Structured(list) => list
                .into_iter()
                .map(|e| e.trim().to_lowercase())
                .filter(|e| is_valid_email(e))
                .collect(),
            SecondaryOutput::Text(text) => extract_from_text(&text),
        }
    }
}

pub trait SecondaryExtractor {
    fn extract(&self, url: &str, html: &str) -> Option<SecondaryOutput>;
}

/// Shared across workers. Once tripped it stays tripped for the rest of the run.
#[derive(Debug, Clone, Default)]
pub struct KillSwitch(Arc<AtomicBool>);

impl KillSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_tripped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Returns true only for the caller that actually tripped it.
    pub fn trip(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatContent,
}

#[derive(Deserialize)]
struct ChatContent {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ExtractedEmails {
    #[serde(default)]
    emails: Vec<String>,
}

#[derive(Debug)]
enum AttemptError {
    Configuration(String),
    Transient(String),
}

/// Configuration-class statuses: retrying cannot help.
fn is_configuration_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 401 | 402 | 403 | 404)
}

/// Parses the model's answer. Fenced or not, JSON with an `emails` array is structured;
/// anything else is treated as text.
pub fn parse_model_answer(content: &str) -> SecondaryOutput {
    let trimmed = content.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.trim_end().trim_end_matches("```").trim())
        .unwrap_or(trimmed);

    match serde_json::from_str::<ExtractedEmails>(unfenced) {
        Ok(parsed) => SecondaryOutput::Structured(parsed.emails),
        Err(_) => SecondaryOutput::Text(content.to_string()),
    }
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub struct LlmExtractor {
    client: Client,
    settings: LlmSettings,
    kill_switch: KillSwitch,
}

impl LlmExtractor {
    /// Builds a worker-local client; the kill switch is the only shared piece.
    pub fn new(settings: LlmSettings, kill_switch: KillSwitch) -> Result<Self> {
        let client = Client::builder().timeout(settings.timeout).build()?;
        Ok(LlmExtractor { client, settings, kill_switch })
    }

    fn attempt(&self, html: &str) -> std::result::Result<String, AttemptError> {
        let body = ChatRequest {
            model: &self.settings.model,
            messages: vec![
                ChatMessage { role: "system", content: INSTRUCTION },
                ChatMessage { role: "user", content: truncate_chars(html, self.settings.max_input_chars) },
            ],
            temperature: 0.0,
        };

        let endpoint = format!("{}/chat/completions", self.settings.base_url.trim_end_matches('/'));
        let resp = self.client
            .post(&endpoint)
            .bearer_auth(&self.settings.api_key)
            .json(&body)
            .send()
            .map_err(|e| AttemptError::Transient(e.to_string()))?;

        let status = resp.status();
        if is_configuration_status(status) {
            let detail = resp.text().unwrap_or_default();
            return Err(AttemptError::Configuration(format!("HTTP {} {}", status, detail.trim())));
        }
        if !status.is_success() {
            return Err(AttemptError::Transient(format!("HTTP {}", status)));
        }

        let parsed: ChatResponse = resp
            .json()
            .map_err(|e| AttemptError::Transient(format!("bad response body: {}", e)))?;

        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}

impl SecondaryExtractor for LlmExtractor {
    fn extract(&self, url: &str, html: &str) -> Option<SecondaryOutput> {
        if self.kill_switch.is_tripped() {
            return None;
        }
        if self.settings.api_key.trim().is_empty() {
            if self.kill_switch.trip() {
                error!("LLM extraction disabled for this run: no API key configured. Falling back to regex extraction only.");
            }
            return None;
        }

        let attempts = self.settings.attempts.max(1);
        for attempt in 1..=attempts {
            match self.attempt(html) {
                Ok(content) => {
                    debug!("LLM answered for {} ({} chars)", url, content.len());
                    return Some(parse_model_answer(&content));
                }
                Err(AttemptError::Configuration(reason)) => {
                    if self.kill_switch.trip() {
                        error!("LLM extraction disabled for this run: {}. Falling back to regex extraction only.", reason);
                    }
                    return None;
                }
                Err(AttemptError::Transient(reason)) => {
                    warn!("LLM extraction attempt {}/{} for {} failed: {}", attempt, attempts, url, reason);
                }
            }
        }
        None
    }
}
