//! Script generation: story + discussion context → narration script.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ingest::truncate_chars;
use crate::model::{ContextEntry, Script, ScriptSection, Story};

const MAX_CONTEXT_COMMENTS: usize = 8;
const COMMENT_CHARS: usize = 200;
const TWEET_CHARS: usize = 300;

#[async_trait]
pub trait ScriptGenerator: Send + Sync {
    async fn generate(&self, story: &Story) -> Result<Script>;
}

const SYSTEM_PROMPT: &str = r#"You write scripts for a tech news YouTube Shorts channel.
Turn the story and its discussion into a punchy 30-45 second script.

Rules:
- The hook grabs attention in the first 3 seconds. Never open with "Hey guys" or "So today".
- Body sections are 5-10 seconds of narration each. Short sentences.
- Casual, opinionated tech commentary. Snarky but informative.
- If community reactions are provided, work the best takes in.
- screen_text is a short bold caption (1-6 words) reinforcing the narration.
- duration_hint is the estimated seconds for that section.
- The CTA is quick and natural.
- 60-100 words total, 3-5 body sections.

Respond with JSON in exactly this shape:
{"hook": "...", "body": [{"text": "...", "screen_text": "...", "duration_hint": 7.0}], "cta": "..."}"#;

/// User prompt: title, source, url, then whatever context the story carries.
pub fn build_prompt(story: &Story) -> String {
    let mut parts = vec![
        "Write a YouTube Shorts script about this tech news story.".to_string(),
        "Use the community reactions to make it feel authentic and plugged-in.".to_string(),
        String::new(),
        format!("Title: {}", story.title),
        format!("Source: {}", story.source),
        format!("URL: {}", story.url),
    ];

    let mut reactions: Vec<String> = Vec::new();
    for entry in &story.context {
        match entry {
            ContextEntry::Summary { text } => parts.push(format!("Summary: {text}")),
            ContextEntry::TweetText { text } => {
                parts.push(format!("Tweet: {}", truncate_chars(text, TWEET_CHARS)))
            }
            ContextEntry::Comments { entries, .. } => {
                reactions.extend(entries.iter().map(|c| {
                    format!(
                        "  - {}: {}",
                        c.author.as_deref().unwrap_or("anon"),
                        truncate_chars(&c.text, COMMENT_CHARS)
                    )
                }));
            }
            ContextEntry::Thread {
                subject,
                excerpt,
                replies,
            } => {
                if !subject.is_empty() || !excerpt.is_empty() {
                    parts.push(format!("Thread: {subject} {excerpt}").trim_end().to_string());
                }
                reactions.extend(
                    replies
                        .iter()
                        .map(|r| format!("  - anon: {}", truncate_chars(r, COMMENT_CHARS))),
                );
            }
        }
    }
    if !reactions.is_empty() {
        parts.push(String::new());
        parts.push("Community reactions:".to_string());
        parts.extend(reactions.into_iter().take(MAX_CONTEXT_COMMENTS));
    }
    parts.join("\n")
}

#[derive(Debug, Deserialize)]
struct ScriptJson {
    hook: String,
    body: Vec<SectionJson>,
    cta: String,
}

#[derive(Debug, Deserialize)]
struct SectionJson {
    text: String,
    #[serde(default)]
    screen_text: String,
    #[serde(default)]
    duration_hint: Option<f64>,
}

/// Parse the model's JSON answer into a script.
pub fn parse_script_response(story_id: &str, content: &str) -> Result<Script> {
    let raw: ScriptJson = serde_json::from_str(content.trim()).context("script json")?;
    let sections: Vec<ScriptSection> = raw
        .body
        .into_iter()
        .filter(|s| !s.text.trim().is_empty())
        .map(|s| ScriptSection {
            text: s.text.trim().to_string(),
            screen_text: s.screen_text.trim().to_string(),
            duration_hint: s
                .duration_hint
                .filter(|d| d.is_finite() && *d > 0.0)
                .unwrap_or(7.0),
        })
        .collect();
    if sections.is_empty() {
        bail!("script has no body sections");
    }
    Ok(Script::assemble(story_id, raw.hook.trim(), sections, raw.cta.trim()))
}

/// OpenAI chat completions, JSON response format.
pub struct OpenAiScriptGenerator {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiScriptGenerator {
    pub fn new(http: reqwest::Client, base_url: &str, api_key: Option<String>, model: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl ScriptGenerator for OpenAiScriptGenerator {
    async fn generate(&self, story: &Story) -> Result<Script> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("OPENAI_API_KEY is not set"))?;

        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct ResponseFormat {
            #[serde(rename = "type")]
            kind: &'static str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            response_format: ResponseFormat,
            temperature: f32,
            max_tokens: u32,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: Option<String>,
        }

        let prompt = build_prompt(story);
        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                Msg {
                    role: "user",
                    content: &prompt,
                },
            ],
            response_format: ResponseFormat {
                kind: "json_object",
            },
            temperature: 0.9,
            max_tokens: 512,
        };

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&req)
            .send()
            .await
            .context("openai chat request")?
            .error_for_status()
            .context("openai chat status")?;
        let body: Resp = resp.json().await.context("openai chat body")?;
        let content = body
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .ok_or_else(|| anyhow!("openai returned no content"))?;
        let script = parse_script_response(&story.id, content)?;
        tracing::debug!(
            target: "pipeline",
            story_id = %story.short_id(),
            sections = script.sections.len(),
            chars = script.full_text.len(),
            "script generated"
        );
        Ok(script)
    }
}
