pub mod fourchan;
pub mod hackernews;
pub mod rss;

use std::sync::Arc;
use std::time::Duration;

use crate::config::SourcesConfig;
use crate::ingest::types::SourceProvider;

use fourchan::FourChanProvider;
use hackernews::HackerNewsProvider;
use rss::FeedProvider;

const USER_AGENT: &str = concat!("story-reel/", env!("CARGO_PKG_VERSION"));

/// Shared HTTP client for all providers.
pub fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()?)
}

/// Instantiate every enabled provider, in a fixed order.
pub fn from_config(cfg: &SourcesConfig, client: reqwest::Client) -> Vec<Arc<dyn SourceProvider>> {
    let mut out: Vec<Arc<dyn SourceProvider>> = Vec::new();
    if cfg.hackernews.enabled {
        out.push(Arc::new(HackerNewsProvider::from_config(&cfg.hackernews, client.clone())));
    }
    if cfg.reddit.enabled {
        out.push(Arc::new(FeedProvider::reddit(&cfg.reddit, client.clone())));
    }
    if cfg.techcrunch.enabled {
        out.push(Arc::new(FeedProvider::techcrunch(&cfg.techcrunch, client.clone())));
    }
    if cfg.x.enabled {
        out.push(Arc::new(FeedProvider::nitter(&cfg.x, client.clone())));
    }
    if cfg.fourchan.enabled {
        out.push(Arc::new(FourChanProvider::from_config(&cfg.fourchan, client)));
    }
    out
}
