use serde::Serialize;

use crate::summarize::{Model, Summary};
use crate::{Transcript, TranscriptMethod};

/// Result of a one-shot summarization from the command line
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub video_id: String,
    pub link: String,
    pub model: Model,
    pub method: TranscriptMethod,
    pub language: Option<String>,
    pub transcript_chars: usize,
    pub chunks_total: usize,
    pub chunks_summarized: usize,
    pub rate_limited: bool,
    pub summary: String,
}

impl Report {
    pub fn new(link: &str, model: Model, transcript: &Transcript, summary: Summary) -> Self {
        Self {
            video_id: transcript.video_id.clone(),
            link: link.to_string(),
            model,
            method: transcript.method,
            language: transcript.language.clone(),
            transcript_chars: transcript.text.chars().count(),
            chunks_total: summary.chunks_total,
            chunks_summarized: summary.chunks_summarized,
            rate_limited: summary.rate_limited,
            summary: summary.text,
        }
    }
}

/// Render just the summary text
pub fn render_text(report: &Report) -> String {
    report.summary.clone()
}

/// Render the full report as pretty JSON
pub fn render_json(report: &Report) -> String {
    serde_json::to_string_pretty(report).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
}

/// Extraction and chunk details for verbose mode
pub fn render_details(report: &Report) -> String {
    format!(
        "Video: {}\nSource: {}\nLanguage: {}\nTranscript: {} chars\nModel: {}\nChunks: {}/{}{}",
        report.video_id,
        report.method,
        report.language.as_deref().unwrap_or("unknown"),
        report.transcript_chars,
        report.model,
        report.chunks_summarized,
        report.chunks_total,
        if report.rate_limited { " (stopped by rate limit)" } else { "" },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_report() -> Report {
        let transcript = Transcript {
            video_id: "dQw4w9WgXcQ".to_string(),
            language: Some("en".to_string()),
            method: TranscriptMethod::WatchPage,
            text: "never gonna give you up".to_string(),
        };
        let summary = Summary {
            text: "A song about commitment.".to_string(),
            chunks_total: 1,
            chunks_summarized: 1,
            rate_limited: false,
        };
        Report::new("https://youtu.be/dQw4w9WgXcQ", Model::Mistral, &transcript, summary)
    }

    #[test]
    fn test_render_text() {
        assert_eq!(render_text(&sample_report()), "A song about commitment.");
    }

    #[test]
    fn test_render_json() {
        let json: serde_json::Value = serde_json::from_str(&render_json(&sample_report())).unwrap();
        assert_eq!(json["video_id"], "dQw4w9WgXcQ");
        assert_eq!(json["model"], "mistral");
        assert_eq!(json["method"], "watch_page");
        assert_eq!(json["transcript_chars"], 23);
        assert_eq!(json["rate_limited"], false);
    }

    #[test]
    fn test_render_details() {
        let details = render_details(&sample_report());
        assert!(details.contains("Source: watch-page"));
        assert!(details.contains("Chunks: 1/1"));
        assert!(!details.contains("rate limit"));
    }
}
