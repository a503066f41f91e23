use serde::Serialize;

/// One search hit as returned to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Track {
    #[serde(rename = "videoId")]
    pub video_id: String,
    pub title: String,
    pub artists: String,
    pub thumbnail: String,
    pub duration: String,
    pub duration_seconds: u64,
}

impl Track {
    /// `duration_seconds` is always derived from `duration`.
    pub fn new(
        video_id: impl Into<String>,
        title: impl Into<String>,
        artists: &[String],
        thumbnail: impl Into<String>,
        duration: impl Into<String>,
    ) -> Self {
        let duration = duration.into();
        Self {
            video_id: video_id.into(),
            title: title.into(),
            artists: artists.join(", "),
            thumbnail: thumbnail.into(),
            duration_seconds: parse_duration_seconds(&duration),
            duration,
        }
    }
}

/// Parses `M:SS` or `H:MM:SS`. Anything else yields 0.
pub fn parse_duration_seconds(value: &str) -> u64 {
    let parts = value
        .trim()
        .split(':')
        .map(|part| part.trim().parse::<u64>().ok())
        .collect::<Option<Vec<_>>>();

    match parts.as_deref() {
        Some(&[minutes, seconds]) => minutes.saturating_mul(60).saturating_add(seconds),
        Some(&[hours, minutes, seconds]) => hours
            .saturating_mul(3600)
            .saturating_add(minutes.saturating_mul(60))
            .saturating_add(seconds),
        _ => 0,
    }
}

pub fn looks_like_duration(value: &str) -> bool {
    let value = value.trim();
    value.contains(':')
        && value
            .split(':')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
}
