use std::cmp::Ordering;

use serde::Deserialize;
use thiserror::Error;

const NO_TRACK: &str = "none";

/// One candidate stream as advertised by the extractor.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FormatDescriptor {
    #[serde(default)]
    pub format_id: String,
    #[serde(default)]
    pub ext: Option<String>,
    #[serde(default)]
    pub acodec: Option<String>,
    #[serde(default)]
    pub vcodec: Option<String>,
    #[serde(default, alias = "tbr")]
    pub bitrate: Option<f64>,
    #[serde(default)]
    pub abr: Option<f64>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub protocol: Option<String>,
}

impl FormatDescriptor {
    pub fn has_audio(&self) -> bool {
        matches!(self.acodec.as_deref(), Some(value) if !value.is_empty() && value != NO_TRACK)
    }

    pub fn has_video(&self) -> bool {
        matches!(self.vcodec.as_deref(), Some(value) if !value.is_empty() && value != NO_TRACK)
    }

    pub fn has_combined_tracks(&self) -> bool {
        self.has_audio() && self.has_video()
    }

    pub fn playable_url(&self) -> Option<&str> {
        self.url.as_deref().filter(|url| !url.trim().is_empty())
    }

    /// Total bitrate, falling back to the audio bitrate. Absent, null, zero and NaN all rank as 0.
    pub fn effective_bitrate(&self) -> f64 {
        self.bitrate
            .filter(|value| value.is_finite() && *value > 0.0)
            .or(self.abr.filter(|value| value.is_finite() && *value > 0.0))
            .unwrap_or_default()
    }

    pub fn effective_height(&self) -> u32 {
        self.height.unwrap_or_default()
    }

    pub fn is_progressive(&self) -> bool {
        matches!(self.protocol.as_deref(), None | Some("https") | Some("http") | Some(""))
    }

    pub fn container_is(&self, allowed: &str) -> bool {
        self.ext
            .as_deref()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(allowed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackRequirement {
    Any,
    Audio,
    AudioAndVideo,
}

impl TrackRequirement {
    fn accepts(self, format: &FormatDescriptor) -> bool {
        match self {
            Self::Any => true,
            Self::Audio => format.has_audio(),
            Self::AudioAndVideo => format.has_combined_tracks(),
        }
    }
}

/// Sort keys, each ranked descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankKey {
    CombinedTracks,
    HasAudio,
    Bitrate,
    Height,
}

impl RankKey {
    fn compare(self, a: &FormatDescriptor, b: &FormatDescriptor) -> Ordering {
        match self {
            Self::CombinedTracks => a.has_combined_tracks().cmp(&b.has_combined_tracks()),
            Self::HasAudio => a.has_audio().cmp(&b.has_audio()),
            Self::Bitrate => a
                .effective_bitrate()
                .partial_cmp(&b.effective_bitrate())
                .unwrap_or(Ordering::Equal),
            Self::Height => a.effective_height().cmp(&b.effective_height()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectionPolicy {
    pub name: &'static str,
    /// `None` accepts every container.
    pub containers: Option<Vec<String>>,
    pub tracks: TrackRequirement,
    pub progressive_only: bool,
    pub ranking: Vec<RankKey>,
}

impl SelectionPolicy {
    pub fn is_eligible(&self, format: &FormatDescriptor) -> bool {
        if format.playable_url().is_none() {
            return false;
        }

        if let Some(containers) = &self.containers
            && !containers
                .iter()
                .any(|container| format.container_is(container))
        {
            return false;
        }

        if self.progressive_only && !format.is_progressive() {
            return false;
        }

        self.tracks.accepts(format)
    }

    fn compare(&self, a: &FormatDescriptor, b: &FormatDescriptor) -> Ordering {
        self.ranking
            .iter()
            .map(|key| key.compare(a, b))
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}

/// Progressive audio+video in MP4, then WebM, then anything with audio, then anything at all.
pub fn default_policy_chain() -> Vec<SelectionPolicy> {
    vec![
        SelectionPolicy {
            name: "progressive-mp4",
            containers: Some(vec!["mp4".to_string()]),
            tracks: TrackRequirement::AudioAndVideo,
            progressive_only: true,
            ranking: vec![RankKey::Height, RankKey::Bitrate],
        },
        SelectionPolicy {
            name: "progressive-webm",
            containers: Some(vec!["webm".to_string()]),
            tracks: TrackRequirement::AudioAndVideo,
            progressive_only: true,
            ranking: vec![RankKey::Height, RankKey::Bitrate],
        },
        SelectionPolicy {
            name: "any-container-with-audio",
            containers: None,
            tracks: TrackRequirement::Audio,
            progressive_only: true,
            ranking: vec![RankKey::CombinedTracks, RankKey::Bitrate, RankKey::Height],
        },
        SelectionPolicy {
            name: "best-effort",
            containers: None,
            tracks: TrackRequirement::Any,
            progressive_only: false,
            ranking: vec![
                RankKey::CombinedTracks,
                RankKey::HasAudio,
                RankKey::Bitrate,
                RankKey::Height,
            ],
        },
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no format satisfies the selection policy")]
pub struct NoEligibleFormat;

/// Picks the best eligible format under `policy`. Ties keep the earliest format in `formats`.
pub fn select_format<'a>(
    formats: &'a [FormatDescriptor],
    policy: &SelectionPolicy,
) -> Result<&'a FormatDescriptor, NoEligibleFormat> {
    formats
        .iter()
        .filter(|format| policy.is_eligible(format))
        .fold(None, |best: Option<&FormatDescriptor>, candidate| match best {
            Some(current) if policy.compare(candidate, current) != Ordering::Greater => {
                Some(current)
            }
            _ => Some(candidate),
        })
        .ok_or(NoEligibleFormat)
}
