use async_trait::async_trait;
use eyre::{Result, WrapErr, bail, eyre};
use log::debug;
use regex::Regex;
use serde::Deserialize;

use crate::transcript::TranscriptStrategy;
use crate::{Segment, Transcript, TranscriptMethod, join_segments};

pub const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

#[derive(Debug, Deserialize)]
struct PlayerResponse {
    captions: Option<CaptionsData>,
}

#[derive(Debug, Deserialize)]
struct CaptionsData {
    #[serde(rename = "playerCaptionsTracklistRenderer")]
    player_captions_tracklist_renderer: Option<CaptionTracklistRenderer>,
}

#[derive(Debug, Deserialize)]
struct CaptionTracklistRenderer {
    #[serde(rename = "captionTracks")]
    caption_tracks: Option<Vec<CaptionTrack>>,
}

#[derive(Debug, Clone, Deserialize)]
struct CaptionTrack {
    #[serde(rename = "baseUrl")]
    base_url: String,
    #[serde(rename = "languageCode")]
    language_code: String,
}

impl PlayerResponse {
    fn into_tracks(self) -> Vec<CaptionTrack> {
        self.captions
            .and_then(|c| c.player_captions_tracklist_renderer)
            .and_then(|r| r.caption_tracks)
            .unwrap_or_default()
    }
}

pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={video_id}")
}

/// Captions via the InnerTube player endpoint and timed-text XML
pub struct CaptionsApi {
    client: reqwest::Client,
    langs: Vec<String>,
}

impl CaptionsApi {
    pub fn new(client: reqwest::Client, langs: Vec<String>) -> Self {
        Self { client, langs }
    }
}

#[async_trait]
impl TranscriptStrategy for CaptionsApi {
    fn method(&self) -> TranscriptMethod {
        TranscriptMethod::CaptionsApi
    }

    async fn fetch(&self, video_id: &str) -> Result<Transcript> {
        let page_html = fetch_watch_page(&self.client, video_id).await?;
        let api_key = extract_api_key(&page_html)?;
        debug!("Extracted InnerTube API key: {api_key}");

        let player_url = format!("https://www.youtube.com/youtubei/v1/player?key={api_key}&prettyPrint=false");
        let hl = self.langs.first().map(String::as_str).unwrap_or("en");

        let body = serde_json::json!({
            "context": {
                "client": {
                    "hl": hl,
                    "gl": "US",
                    "clientName": "WEB",
                    "clientVersion": "2.20241126.01.00"
                }
            },
            "videoId": video_id
        });

        let resp: PlayerResponse = self
            .client
            .post(&player_url)
            .header("User-Agent", USER_AGENT)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let tracks = resp.into_tracks();
        let track = pick_track(&tracks, &self.langs).ok_or_else(|| eyre!("no captions available for video {video_id}"))?;
        debug!("Using caption track: lang={}", track.language_code);

        let caption_xml = self
            .client
            .get(&track.base_url)
            .header("User-Agent", USER_AGENT)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let segments = parse_caption_xml(&caption_xml)?;

        Ok(Transcript {
            video_id: video_id.to_string(),
            language: Some(track.language_code.clone()),
            method: TranscriptMethod::CaptionsApi,
            text: join_segments(&segments),
        })
    }
}

/// Captions scraped from the player response embedded in the watch page, fetched as WebVTT
pub struct WatchPage {
    client: reqwest::Client,
    langs: Vec<String>,
}

impl WatchPage {
    pub fn new(client: reqwest::Client, langs: Vec<String>) -> Self {
        Self { client, langs }
    }
}

#[async_trait]
impl TranscriptStrategy for WatchPage {
    fn method(&self) -> TranscriptMethod {
        TranscriptMethod::WatchPage
    }

    async fn fetch(&self, video_id: &str) -> Result<Transcript> {
        let page_html = fetch_watch_page(&self.client, video_id).await?;
        let tracks = extract_player_response(&page_html)?.into_tracks();
        debug!(
            "Available caption languages: {:?}",
            tracks.iter().map(|t| t.language_code.as_str()).collect::<Vec<_>>()
        );

        let track = pick_track(&tracks, &self.langs).ok_or_else(|| eyre!("no usable captions found for {video_id}"))?;
        let vtt_url = format!("{}&fmt=vtt", track.base_url);

        let vtt = self
            .client
            .get(&vtt_url)
            .header("User-Agent", USER_AGENT)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        Ok(Transcript {
            video_id: video_id.to_string(),
            language: Some(track.language_code.clone()),
            method: TranscriptMethod::WatchPage,
            text: vtt_to_text(&vtt),
        })
    }
}

async fn fetch_watch_page(client: &reqwest::Client, video_id: &str) -> Result<String> {
    let url = watch_url(video_id);
    debug!("Fetching watch page: {url}");

    let html = client
        .get(&url)
        .header("User-Agent", USER_AGENT)
        .header("Accept-Language", "en-US,en;q=0.9")
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    Ok(html)
}

/// Preferred languages in order, otherwise the first available track
fn pick_track<'a>(tracks: &'a [CaptionTrack], langs: &[String]) -> Option<&'a CaptionTrack> {
    langs
        .iter()
        .find_map(|lang| {
            let found = tracks.iter().find(|t| &t.language_code == lang);
            if found.is_none() {
                debug!("No {lang} transcript available");
            }
            found
        })
        .or_else(|| tracks.first())
}

fn extract_api_key(html: &str) -> Result<String> {
    let re = Regex::new(r#""INNERTUBE_API_KEY"\s*:\s*"([^"]+)""#)?;
    if let Some(caps) = re.captures(html) {
        return Ok(caps[1].to_string());
    }

    let re2 = Regex::new(r#"innertubeApiKey\s*[=:]\s*"([^"]+)""#)?;
    if let Some(caps) = re2.captures(html) {
        return Ok(caps[1].to_string());
    }

    bail!("could not extract InnerTube API key from watch page");
}

/// Parse the `ytInitialPlayerResponse = {...};` object out of the watch page HTML
fn extract_player_response(html: &str) -> Result<PlayerResponse> {
    // Match the assignment; bare mentions like `window["ytInitialPlayerResponse"] = null` come earlier
    let re = Regex::new(r"ytInitialPlayerResponse\s*=\s*\{")?;
    let m = re
        .find(html)
        .ok_or_else(|| eyre!("watch page has no ytInitialPlayerResponse object"))?;
    let brace = m.end() - 1;

    // Only the first JSON value is read; the trailing script text is ignored
    let mut stream = serde_json::Deserializer::from_str(&html[brace..]).into_iter::<PlayerResponse>();
    stream
        .next()
        .ok_or_else(|| eyre!("ytInitialPlayerResponse is empty"))?
        .wrap_err("could not parse ytInitialPlayerResponse")
}

fn parse_caption_xml(xml: &str) -> Result<Vec<Segment>> {
    use quick_xml::Reader;
    use quick_xml::events::Event;

    let mut reader = Reader::from_str(xml);
    let mut segments = Vec::new();
    let mut current_start: Option<f64> = None;
    let mut current_dur: Option<f64> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"text" => {
                let mut start = None;
                let mut dur = None;
                for attr in e.attributes().flatten() {
                    match attr.key.as_ref() {
                        b"start" => {
                            start = String::from_utf8_lossy(&attr.value).parse::<f64>().ok();
                        }
                        b"dur" => {
                            dur = String::from_utf8_lossy(&attr.value).parse::<f64>().ok();
                        }
                        _ => {}
                    }
                }
                current_start = start;
                current_dur = dur;
            }
            Ok(Event::Text(ref e)) => {
                if let (Some(start), Some(dur)) = (current_start.take(), current_dur.take()) {
                    let raw_text = e.unescape().unwrap_or_default().to_string();
                    let text = html_escape::decode_html_entities(&raw_text).to_string();
                    if !text.is_empty() {
                        segments.push(Segment {
                            text,
                            start,
                            duration: dur,
                        });
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => bail!("error parsing caption XML: {e}"),
            _ => {}
        }
    }

    Ok(segments)
}

/// Flatten WebVTT cues into a single line of text.
///
/// Header, blank, cue-number and timing lines are dropped, inline tags are
/// stripped, and consecutive duplicate lines from rolling captions collapse.
fn vtt_to_text(vtt: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut in_header = true;

    for line in vtt.lines() {
        let line = line.trim();
        if line.is_empty() {
            in_header = false;
            continue;
        }
        if in_header || line.contains("-->") || line.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }

        let cleaned = strip_tags(line);
        let cleaned = html_escape::decode_html_entities(&cleaned);
        let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
        if cleaned.is_empty() || lines.last() == Some(&cleaned) {
            continue;
        }
        lines.push(cleaned);
    }

    lines.join(" ")
}

fn strip_tags(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_tag = false;
    for c in line.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}
