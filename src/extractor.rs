use std::{io::ErrorKind, path::PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::{
    process::Command,
    time::{Duration, timeout},
};
use tracing::debug;

use crate::{credentials::AuthHeaderSet, formats::FormatDescriptor};

const WATCH_URL: &str = "https://www.youtube.com/watch?v=";

/// How hard the extractor should be steered towards browser-friendly streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMode {
    /// Web and android player clients, DASH and HLS manifests skipped.
    Preferred,
    /// Extractor defaults.
    Relaxed,
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub video_id: String,
    pub mode: ExtractionMode,
    pub auth: Option<AuthHeaderSet>,
    pub cookie_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaInfo {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub formats: Vec<FormatDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamFetchError {
    #[error("video not found: {0}")]
    NotFound(String),
    #[error("video is restricted: {0}")]
    Restricted(String),
    #[error("extractor timed out after {0}s")]
    Timeout(u64),
    #[error("extractor binary is not installed: {0}")]
    ToolMissing(String),
    #[error("extractor returned unreadable metadata: {0}")]
    Malformed(String),
    #[error("extractor failed: {0}")]
    Other(String),
}

impl UpstreamFetchError {
    /// Whether a relaxed re-fetch has a chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Restricted(_) | Self::Other(_))
    }
}

/// The external collaborator that turns a media id into format descriptors.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<MediaInfo, UpstreamFetchError>;
}

#[derive(Debug, Clone)]
pub struct YtDlp {
    binary: String,
    timeout: Duration,
}

impl YtDlp {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    fn build_args(request: &FetchRequest) -> Vec<String> {
        let mut args = vec![
            "-J".to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--skip-download".to_string(),
            "--add-header".to_string(),
            "Accept-Language:en-US,en;q=0.9".to_string(),
            "--add-header".to_string(),
            "Referer:https://www.youtube.com/".to_string(),
        ];

        match &request.auth {
            Some(auth) => {
                args.push("--user-agent".to_string());
                args.push(auth.user_agent.clone());
                args.push("--add-header".to_string());
                args.push(format!("Authorization:{}", auth.authorization));
                args.push("--add-header".to_string());
                args.push(format!("X-Origin:{}", auth.origin));
            }
            None => {
                args.push("--add-header".to_string());
                args.push("Origin:https://www.youtube.com".to_string());
            }
        }

        if let Some(cookie_file) = &request.cookie_file {
            args.push("--cookies".to_string());
            args.push(cookie_file.to_string_lossy().into_owned());
        }

        if request.mode == ExtractionMode::Preferred {
            args.push("--extractor-args".to_string());
            args.push("youtube:player_client=web,android;skip=dash,hls".to_string());
        }

        args.push(format!("{WATCH_URL}{}", request.video_id));
        args
    }

    async fn run(&self, args: Vec<String>) -> Result<std::process::Output, UpstreamFetchError> {
        let command_future = Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output();
        let output = timeout(self.timeout, command_future)
            .await
            .map_err(|_| UpstreamFetchError::Timeout(self.timeout.as_secs()))?
            .map_err(|error| {
                if error.kind() == ErrorKind::NotFound {
                    UpstreamFetchError::ToolMissing(self.binary.clone())
                } else {
                    UpstreamFetchError::Other(format!("could not run {}: {error}", self.binary))
                }
            })?;

        if !output.status.success() {
            return Err(classify_failure(&output.stderr));
        }

        Ok(output)
    }
}

#[async_trait]
impl MetadataSource for YtDlp {
    async fn fetch(&self, request: &FetchRequest) -> Result<MediaInfo, UpstreamFetchError> {
        debug!(
            video_id = %request.video_id,
            mode = ?request.mode,
            authenticated = request.auth.is_some(),
            "Running yt-dlp"
        );
        let output = self.run(Self::build_args(request)).await?;
        parse_media_info(&output.stdout)
    }
}

pub fn parse_media_info(stdout: &[u8]) -> Result<MediaInfo, UpstreamFetchError> {
    // `-J` prints `null` when extraction was skipped.
    let info: Option<MediaInfo> = serde_json::from_slice(stdout)
        .map_err(|error| UpstreamFetchError::Malformed(error.to_string()))?;
    info.ok_or_else(|| UpstreamFetchError::NotFound("extractor returned no metadata".to_string()))
}

fn last_error_line(stderr: &[u8]) -> String {
    String::from_utf8_lossy(stderr)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .unwrap_or("yt-dlp could not complete the request")
        .to_string()
}

pub fn classify_failure(stderr: &[u8]) -> UpstreamFetchError {
    let message = last_error_line(stderr);
    let lower = message.to_ascii_lowercase();

    if lower.contains("video unavailable")
        || lower.contains("private video")
        || lower.contains("has been removed")
        || lower.contains("incomplete youtube id")
        || lower.contains("unsupported url")
        || lower.contains("is not a valid url")
    {
        UpstreamFetchError::NotFound(message)
    } else if lower.contains("sign in to confirm your age")
        || lower.contains("age-restricted")
        || lower.contains("not available in your country")
        || lower.contains("geo restrict")
        || lower.contains("members-only")
        || lower.contains("sign in to confirm you")
    {
        UpstreamFetchError::Restricted(message)
    } else {
        UpstreamFetchError::Other(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(mode: ExtractionMode, auth: Option<AuthHeaderSet>) -> FetchRequest {
        FetchRequest {
            video_id: "dQw4w9WgXcQ".to_string(),
            mode,
            auth,
            cookie_file: Some(PathBuf::from("/tmp/cookies.txt")),
        }
    }

    #[test]
    fn preferred_mode_skips_segmented_manifests() {
        let args = YtDlp::build_args(&request(ExtractionMode::Preferred, None));

        assert!(args.contains(&"youtube:player_client=web,android;skip=dash,hls".to_string()));
        assert!(args.contains(&"--cookies".to_string()));
        assert_eq!(
            args.last().map(String::as_str),
            Some("https://www.youtube.com/watch?v=dQw4w9WgXcQ")
        );
    }

    #[test]
    fn relaxed_mode_drops_extractor_args() {
        let args = YtDlp::build_args(&request(ExtractionMode::Relaxed, None));
        assert!(!args.contains(&"--extractor-args".to_string()));
    }

    #[test]
    fn authenticated_requests_forward_signed_headers() {
        let auth = AuthHeaderSet {
            cookie: "SAPISID=abc".to_string(),
            authorization: "SAPISIDHASH 1000_ff".to_string(),
            user_agent: "agent".to_string(),
            origin: "https://music.youtube.com".to_string(),
        };
        let args = YtDlp::build_args(&request(ExtractionMode::Preferred, Some(auth)));

        assert!(args.contains(&"Authorization:SAPISIDHASH 1000_ff".to_string()));
        assert!(args.contains(&"X-Origin:https://music.youtube.com".to_string()));
        assert!(args.contains(&"agent".to_string()));
    }

    #[test]
    fn classifies_extractor_errors() {
        assert!(matches!(
            classify_failure(b"WARNING: x\nERROR: [youtube] abc: Video unavailable\n"),
            UpstreamFetchError::NotFound(_)
        ));
        assert!(matches!(
            classify_failure(b"ERROR: [youtube] abc: Sign in to confirm your age."),
            UpstreamFetchError::Restricted(_)
        ));
        assert_eq!(
            classify_failure(b"ERROR: HTTP Error 503: Service Unavailable"),
            UpstreamFetchError::Other("ERROR: HTTP Error 503: Service Unavailable".to_string())
        );
        assert!(matches!(classify_failure(b""), UpstreamFetchError::Other(_)));
    }

    #[test]
    fn parses_metadata_and_null_output() {
        let info = parse_media_info(
            br#"{"title":"Song","duration":212.0,"thumbnail":"https://i.ytimg.com/x.jpg",
                "formats":[{"format_id":"18","ext":"mp4","acodec":"mp4a","vcodec":"avc1","url":"https://v/18"}]}"#,
        )
        .unwrap();
        assert_eq!(info.title.as_deref(), Some("Song"));
        assert_eq!(info.formats.len(), 1);

        assert!(matches!(parse_media_info(b"null"), Err(UpstreamFetchError::NotFound(_))));
        assert!(matches!(parse_media_info(b"not json"), Err(UpstreamFetchError::Malformed(_))));
    }

    #[tokio::test]
    async fn missing_binary_is_reported() {
        let extractor = YtDlp::new("aureum-no-such-extractor", Duration::from_secs(5));
        let result = extractor
            .fetch(&request(ExtractionMode::Relaxed, None))
            .await;
        assert!(matches!(result, Err(UpstreamFetchError::ToolMissing(_))));
    }
}
