use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use eyre::{Result, bail};
use log::debug;
use regex::Regex;

use crate::transcript::TranscriptStrategy;
use crate::youtube::{USER_AGENT, watch_url};
use crate::{Transcript, TranscriptMethod};

/// How long the page gets to run scripts before the DOM is dumped (ms)
const VIRTUAL_TIME_BUDGET_MS: u32 = 10_000;

/// Last resort: render the watch page in a headless browser and read the caption overlay
pub struct HeadlessBrowser {
    binary: String,
    timeout: Duration,
}

impl HeadlessBrowser {
    pub fn new(binary: String, timeout: Duration) -> Self {
        Self { binary, timeout }
    }

    fn args(&self, url: &str) -> Vec<String> {
        vec![
            "--headless=new".to_string(),
            "--disable-gpu".to_string(),
            "--no-sandbox".to_string(),
            "--mute-audio".to_string(),
            "--autoplay-policy=no-user-gesture-required".to_string(),
            format!("--user-agent={USER_AGENT}"),
            format!("--virtual-time-budget={VIRTUAL_TIME_BUDGET_MS}"),
            "--dump-dom".to_string(),
            url.to_string(),
        ]
    }

    async fn dump_dom(&self, url: &str) -> Result<String> {
        debug!("Rendering {url} with {}", self.binary);

        let child = tokio::process::Command::new(&self.binary)
            .args(self.args(url))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                bail!("{} not found; install Chromium or disable the browser fallback", self.binary);
            }
            Ok(Err(e)) => bail!("failed to run {}: {e}", self.binary),
            Err(_) => bail!("{} timed out after {:?}", self.binary, self.timeout),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("{} exited with status {}: {}", self.binary, output.status, stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl TranscriptStrategy for HeadlessBrowser {
    fn method(&self) -> TranscriptMethod {
        TranscriptMethod::Browser
    }

    async fn fetch(&self, video_id: &str) -> Result<Transcript> {
        let dom = self.dump_dom(&watch_url(video_id)).await?;
        let text = extract_caption_segments(&dom)?;
        if text.is_empty() {
            bail!("no captions found in rendered page for {video_id}");
        }

        Ok(Transcript {
            video_id: video_id.to_string(),
            language: None,
            method: TranscriptMethod::Browser,
            text,
        })
    }
}

/// Collect the text of every `ytp-caption-segment` element in a DOM dump
fn extract_caption_segments(dom: &str) -> Result<String> {
    let segment_re = Regex::new(r#"(?s)<span[^>]*class="[^"]*\bytp-caption-segment\b[^"]*"[^>]*>(.*?)</span>"#)?;
    let tag_re = Regex::new(r"<[^>]+>")?;

    let parts: Vec<String> = segment_re
        .captures_iter(dom)
        .map(|caps| {
            let inner = tag_re.replace_all(&caps[1], "");
            let decoded = html_escape::decode_html_entities(&inner);
            decoded.split_whitespace().collect::<Vec<_>>().join(" ")
        })
        .filter(|t| !t.is_empty())
        .collect();

    Ok(parts.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_caption_segments() {
        let dom = r#"<div class="caption-window"><span class="captions-text">
<span class="ytp-caption-segment" style="display: inline-block;">never gonna</span>
<span class="ytp-caption-segment">give you &amp; up</span>
<span class="other">ignored</span></span></div>"#;
        assert_eq!(extract_caption_segments(dom).unwrap(), "never gonna give you & up");
    }

    #[test]
    fn test_extract_caption_segments_none() {
        let dom = "<html><body><div id=\"player\"></div></body></html>";
        assert_eq!(extract_caption_segments(dom).unwrap(), "");
    }

    #[test]
    fn test_args_end_with_url() {
        let browser = HeadlessBrowser::new("chromium".to_string(), Duration::from_secs(5));
        let args = browser.args("https://www.youtube.com/watch?v=dQw4w9WgXcQ");
        assert!(args.contains(&"--dump-dom".to_string()));
        assert_eq!(args.last().unwrap(), "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
    }

    #[tokio::test]
    async fn test_missing_binary_is_an_error() {
        let browser = HeadlessBrowser::new(
            "ytsum-no-such-browser-binary".to_string(),
            Duration::from_secs(5),
        );
        let err = browser.fetch("dQw4w9WgXcQ").await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
