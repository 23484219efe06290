pub mod api;
pub mod auth;
pub mod browser;
pub mod config;
pub mod output;
pub mod ratelimit;
pub mod store;
pub mod summarize;
pub mod transcript;
pub mod youtube;

use eyre::{Result, WrapErr, eyre};
use regex::Regex;
use reqwest::Url;
use serde::Serialize;

/// A single captioned segment
#[derive(Debug, Clone, Serialize)]
pub struct Segment {
    pub text: String,
    pub start: f64,
    pub duration: f64,
}

/// Which cascade strategy produced a transcript
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptMethod {
    CaptionsApi,
    WatchPage,
    Browser,
}

/// Transcript text for a video, flattened to a single string
#[derive(Debug, Clone, Serialize)]
pub struct Transcript {
    pub video_id: String,
    pub language: Option<String>,
    pub method: TranscriptMethod,
    pub text: String,
}

impl std::fmt::Display for TranscriptMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TranscriptMethod::CaptionsApi => write!(f, "captions-api"),
            TranscriptMethod::WatchPage => write!(f, "watch-page"),
            TranscriptMethod::Browser => write!(f, "browser"),
        }
    }
}

/// Join caption segments into the flat text handed to the summarizer
pub fn join_segments(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|s| s.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Extract the video ID from a YouTube link.
///
/// Checked in order: bare 11-character ID, `v=` query parameter, `youtu.be/<id>`,
/// `/live/<id>`, `/embed/<id>`, `/shorts/<id>`, and finally any path segment
/// that starts with 11 ID characters.
pub fn extract_video_id(link: &str) -> Result<String> {
    let link = link.trim();

    if Regex::new(r"^[a-zA-Z0-9_-]{11}$")?.is_match(link) {
        return Ok(link.to_string());
    }

    let url = parse_link(link)?;
    let host = url.host_str().unwrap_or_default();
    let path = url.path();
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    let mut video_id = url
        .query_pairs()
        .find(|(k, v)| k == "v" && !v.is_empty())
        .map(|(_, v)| v.into_owned());

    if video_id.is_none() {
        video_id = if host.contains("youtu.be") {
            segments.first().map(|s| s.to_string())
        } else if path.contains("/live/") {
            segment_after(&segments, "live")
        } else if path.contains("embed") {
            segment_after(&segments, "embed")
        } else if path.contains("/shorts/") {
            segment_after(&segments, "shorts")
        } else {
            None
        };
    }

    let video_id = video_id.filter(|id| !id.is_empty());
    if let Some(id) = video_id {
        return Ok(id);
    }

    let id_prefix = Regex::new(r"^[A-Za-z0-9_-]{11}")?;
    segments
        .iter()
        .find(|part| id_prefix.is_match(part))
        .map(|part| part.to_string())
        .ok_or_else(|| eyre!("Could not extract video ID from URL: {link}"))
}

/// True when the link looks like a live stream
pub fn is_live_stream(link: &str) -> bool {
    link.contains("/live/") || link.contains("live=")
}

fn parse_link(link: &str) -> Result<Url> {
    let absolute = if link.contains("://") {
        link.to_string()
    } else {
        format!("https://{link}")
    };
    Url::parse(&absolute).wrap_err_with(|| format!("could not parse link: {link}"))
}

fn segment_after(segments: &[&str], marker: &str) -> Option<String> {
    let idx = segments.iter().position(|s| *s == marker)?;
    segments.get(idx + 1).map(|s| s.to_string())
}
