//! Platform publishing. YouTube Shorts via the Data API v3.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::ingest::truncate_chars;
use crate::model::{Script, Story};

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const UPLOAD_URL: &str =
    "https://www.googleapis.com/upload/youtube/v3/videos?uploadType=resumable&part=snippet,status";
const TITLE_MAX_CHARS: usize = 100;
const TITLE_BODY_CHARS: usize = 90;

#[derive(Debug, Error)]
pub enum PublishError {
    /// Network hiccup, rate limit, expired token. Worth retrying.
    #[error("transient publish failure: {0:#}")]
    Transient(anyhow::Error),
    /// The platform (or our own config) said no. Retrying will not help.
    #[error("publish rejected: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for PublishError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => classify_status(status, &e.to_string()),
            None => PublishError::Transient(e.into()),
        }
    }
}

/// 5xx, 408, 429 and 401 are worth another attempt; other 4xx are final.
pub fn classify_status(status: StatusCode, body: &str) -> PublishError {
    let detail = format!("HTTP {status}: {}", truncate_chars(body.trim(), 300));
    let transient = status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::UNAUTHORIZED;
    if transient {
        PublishError::Transient(anyhow!(detail))
    } else {
        PublishError::Rejected(detail)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishRequest {
    pub video: PathBuf,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
}

impl PublishRequest {
    pub fn for_story(story: &Story, script: Option<&Script>, video: &Path) -> Self {
        let mut title = format!("{} #Shorts", truncate_chars(story.title.trim(), TITLE_BODY_CHARS));
        title = truncate_chars(&title, TITLE_MAX_CHARS);

        let mut description = String::new();
        if let Some(hook) = script.map(|s| s.hook.trim()).filter(|h| !h.is_empty()) {
            description.push_str(hook);
            description.push_str("\n\n");
        }
        description.push_str(&format!("Source: {}\n\n#tech #news #shorts", story.url));

        Self {
            video: video.to_path_buf(),
            title,
            description,
            tags: vec![
                "tech".into(),
                "news".into(),
                "shorts".into(),
                story.source.as_str().into(),
            ],
        }
    }
}

#[async_trait]
pub trait Publisher: Send + Sync {
    fn platform(&self) -> &'static str;
    /// Returns the platform's id for the uploaded video.
    async fn publish(&self, req: &PublishRequest) -> Result<String, PublishError>;
}

#[derive(Debug, Clone, Default)]
pub struct YouTubeCredentials {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
}

pub struct YouTubePublisher {
    http: reqwest::Client,
    creds: YouTubeCredentials,
    category_id: String,
    privacy: String,
}

impl YouTubePublisher {
    pub fn new(
        http: reqwest::Client,
        creds: YouTubeCredentials,
        category_id: &str,
        privacy: &str,
    ) -> Self {
        Self {
            http,
            creds,
            category_id: category_id.to_string(),
            privacy: privacy.to_string(),
        }
    }

    async fn access_token(&self) -> Result<String, PublishError> {
        let (Some(id), Some(secret), Some(refresh)) = (
            self.creds.client_id.as_deref(),
            self.creds.client_secret.as_deref(),
            self.creds.refresh_token.as_deref(),
        ) else {
            return Err(PublishError::Rejected(
                "YouTube credentials are not configured".into(),
            ));
        };

        #[derive(Deserialize)]
        struct TokenResp {
            access_token: String,
        }

        let resp = self
            .http
            .post(TOKEN_URL)
            .form(&[
                ("client_id", id),
                ("client_secret", secret),
                ("refresh_token", refresh),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            // A revoked refresh token comes back as 400 invalid_grant: permanent.
            return Err(classify_status(status, &body));
        }
        let token: TokenResp = resp.json().await?;
        Ok(token.access_token)
    }
}

#[async_trait]
impl Publisher for YouTubePublisher {
    fn platform(&self) -> &'static str {
        "youtube"
    }

    async fn publish(&self, req: &PublishRequest) -> Result<String, PublishError> {
        let token = self.access_token().await?;
        let bytes = tokio::fs::read(&req.video)
            .await
            .with_context(|| format!("read {}", req.video.display()))
            .map_err(|e| PublishError::Rejected(format!("{e:#}")))?;

        let metadata = json!({
            "snippet": {
                "title": req.title,
                "description": req.description,
                "tags": req.tags,
                "categoryId": self.category_id,
            },
            "status": {
                "privacyStatus": self.privacy,
                "madeForKids": false,
                "selfDeclaredMadeForKids": false,
            }
        });

        let init = self
            .http
            .post(UPLOAD_URL)
            .bearer_auth(&token)
            .header("X-Upload-Content-Type", "video/mp4")
            .header("X-Upload-Content-Length", bytes.len().to_string())
            .json(&metadata)
            .send()
            .await?;
        let status = init.status();
        if !status.is_success() {
            let body = init.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }
        let session = init
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| PublishError::Transient(anyhow!("upload session has no Location")))?;

        #[derive(Deserialize)]
        struct VideoResp {
            id: String,
        }

        let put = self
            .http
            .put(&session)
            .bearer_auth(&token)
            .header(reqwest::header::CONTENT_TYPE, "video/mp4")
            .body(bytes)
            .send()
            .await?;
        let status = put.status();
        if !status.is_success() {
            let body = put.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }
        let video: VideoResp = put.json().await?;
        if video.id.trim().is_empty() {
            return Err(PublishError::Transient(anyhow!("upload returned an empty id")));
        }
        tracing::info!(target: "pipeline", video_id = %video.id, "youtube upload complete");
        Ok(video.id)
    }
}
