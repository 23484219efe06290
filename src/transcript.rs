//! Transcript acquisition cascade.
//!
//! Strategies run in priority order and the first non-empty transcript wins.
//! Failures are logged and swallowed; only exhaustion is reported to the caller.

use std::time::Duration;

use async_trait::async_trait;
use log::{error, info, warn};
use thiserror::Error;

use crate::browser::HeadlessBrowser;
use crate::config::TranscriptConfig;
use crate::youtube::{CaptionsApi, WatchPage};
use crate::{Transcript, TranscriptMethod};

#[derive(Debug, Error)]
pub enum TranscriptError {
    #[error("Transcript not available for video {video_id} after trying all methods")]
    Unavailable { video_id: String },
}

/// One way of getting a transcript for a video
#[async_trait]
pub trait TranscriptStrategy: Send + Sync {
    fn method(&self) -> TranscriptMethod;

    async fn fetch(&self, video_id: &str) -> eyre::Result<Transcript>;
}

pub struct TranscriptCascade {
    strategies: Vec<Box<dyn TranscriptStrategy>>,
}

impl TranscriptCascade {
    pub fn new(strategies: Vec<Box<dyn TranscriptStrategy>>) -> Self {
        Self { strategies }
    }

    /// Captions API, then the watch page scrape, then the headless browser (if enabled)
    pub fn from_config(client: &reqwest::Client, config: &TranscriptConfig) -> Self {
        let langs = config.preferred_langs.clone();
        let mut strategies: Vec<Box<dyn TranscriptStrategy>> = vec![
            Box::new(CaptionsApi::new(client.clone(), langs.clone())),
            Box::new(WatchPage::new(client.clone(), langs)),
        ];
        if config.browser_enabled {
            strategies.push(Box::new(HeadlessBrowser::new(
                config.browser.clone(),
                Duration::from_secs(config.browser_timeout_secs),
            )));
        }
        Self::new(strategies)
    }

    pub fn methods(&self) -> Vec<TranscriptMethod> {
        self.strategies.iter().map(|s| s.method()).collect()
    }

    pub async fn fetch(&self, video_id: &str) -> Result<Transcript, TranscriptError> {
        for strategy in &self.strategies {
            let method = strategy.method();
            info!("Attempting {method} for video ID {video_id}");
            match strategy.fetch(video_id).await {
                Ok(transcript) if !transcript.text.trim().is_empty() => {
                    info!(
                        "Transcript fetched with {method} ({} chars): {}...",
                        transcript.text.chars().count(),
                        preview(&transcript.text, 50)
                    );
                    return Ok(transcript);
                }
                Ok(_) => warn!("{method} returned an empty transcript for {video_id}"),
                Err(e) => error!("{method} failed for {video_id}: {e:#}"),
            }
        }

        Err(TranscriptError::Unavailable {
            video_id: video_id.to_string(),
        })
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
