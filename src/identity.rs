//! # Canonical Identity
//!
//! A story's id is the SHA-256 of its canonical URL. The same link reported
//! by two sources (with different tracking parameters, `www.` prefixes or
//! `http`/`https` schemes) maps to one id, which is what lets ingestion merge
//! duplicates and re-ingest without creating a second record.
//!
//! Canonical form (applied before hashing):
//! - scheme lowercased, `http` folded into `https`
//! - host lowercased, leading `www.` removed, default port dropped
//! - fragment dropped
//! - tracking parameters (`utm_*`, `fbclid`, `gclid`, ...) removed,
//!   remaining parameters sorted by key
//! - trailing `/` removed from non-root paths
//!
//! Strings that do not parse as URLs are hashed as-is (trimmed); identity only
//! needs byte-stable input.

use sha2::{Digest, Sha256};
use url::Url;

/// Length of the display/short form of an id (also the artifact dir name).
pub const SHORT_ID_LEN: usize = 12;

const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_cid", "mc_eid", "igshid", "ref", "ref_src"];

/// Compute the story id for a URL.
pub fn story_id(url: &str) -> String {
    let canonical = canonical_url(url);
    let digest = Sha256::digest(canonical.as_bytes());
    let mut out = String::with_capacity(64);
    for b in digest.iter() {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// First `SHORT_ID_LEN` chars of an id.
pub fn short_id(id: &str) -> &str {
    let end = id
        .char_indices()
        .nth(SHORT_ID_LEN)
        .map(|(i, _)| i)
        .unwrap_or(id.len());
    &id[..end]
}

/// Canonical string form used as hash input.
pub fn canonical_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(mut url) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };
    if url.cannot_be_a_base() {
        return url.to_string();
    }

    if url.scheme() == "http" {
        // http -> https is always allowed for special schemes.
        let _ = url.set_scheme("https");
    }

    if let Some(host) = url.host_str() {
        let host = host.to_ascii_lowercase();
        let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
        let _ = url.set_host(Some(&host));
    }
    if matches!(url.port(), Some(80) | Some(443)) {
        let _ = url.set_port(None);
    }

    url.set_fragment(None);

    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if params.is_empty() {
        url.set_query(None);
    } else {
        params.sort_by(|a, b| a.0.cmp(&b.0));
        url.query_pairs_mut().clear().extend_pairs(params.iter());
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    url.to_string()
}

fn is_tracking_param(key: &str) -> bool {
    let k = key.to_ascii_lowercase();
    k.starts_with("utm_") || TRACKING_PARAMS.contains(&k.as_str())
}
