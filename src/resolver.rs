use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    cookies::CookieSnapshot,
    credentials::{AuthHeaderSet, derive_auth_headers},
    extractor::{ExtractionMode, FetchRequest, MediaInfo, MetadataSource, UpstreamFetchError},
    formats::{FormatDescriptor, SelectionPolicy, select_format},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Credential,
    Fetch,
    Selection,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error(transparent)]
    Fetch(#[from] UpstreamFetchError),
    #[error("no playable stream found")]
    NoEligibleFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionErrorKind {
    NotFound,
    Restricted,
    NoEligibleFormat,
    Timeout,
    ToolMissing,
    Upstream,
}

impl ResolutionError {
    pub fn kind(&self) -> ResolutionErrorKind {
        match self {
            Self::NoEligibleFormat => ResolutionErrorKind::NoEligibleFormat,
            Self::Fetch(UpstreamFetchError::NotFound(_)) => ResolutionErrorKind::NotFound,
            Self::Fetch(UpstreamFetchError::Restricted(_)) => ResolutionErrorKind::Restricted,
            Self::Fetch(UpstreamFetchError::Timeout(_)) => ResolutionErrorKind::Timeout,
            Self::Fetch(UpstreamFetchError::ToolMissing(_)) => ResolutionErrorKind::ToolMissing,
            Self::Fetch(UpstreamFetchError::Malformed(_) | UpstreamFetchError::Other(_)) => {
                ResolutionErrorKind::Upstream
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedStream {
    pub video_id: String,
    pub stream_url: String,
    pub title: String,
    pub duration: u64,
    pub thumbnail: String,
    pub policy: &'static str,
    pub authenticated: bool,
}

/// Signing time in Unix seconds.
type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Sequences credential derivation, metadata fetch and format selection for one request.
pub struct Resolver {
    source: Arc<dyn MetadataSource>,
    origin: String,
    policies: Vec<SelectionPolicy>,
    clock: Clock,
}

impl Resolver {
    pub fn new(
        source: Arc<dyn MetadataSource>,
        origin: impl Into<String>,
        policies: Vec<SelectionPolicy>,
    ) -> Self {
        Self {
            source,
            origin: origin.into(),
            policies,
            clock: Arc::new(|| Utc::now().timestamp()),
        }
    }

    pub fn with_clock(mut self, clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Signs with a fresh timestamp on every call; headers are never reused across fetches.
    fn credentials(&self, cookies: Option<&CookieSnapshot>) -> Option<AuthHeaderSet> {
        let cookies = cookies?;
        debug!(phase = ?Phase::Credential, "Deriving session credentials");
        match derive_auth_headers(&cookies.jar, &self.origin, (self.clock)()) {
            Ok(headers) => Some(headers),
            Err(error) => {
                warn!("{error}; continuing unauthenticated");
                None
            }
        }
    }

    async fn fetch(
        &self,
        video_id: &str,
        mode: ExtractionMode,
        auth: Option<&AuthHeaderSet>,
        cookies: Option<&CookieSnapshot>,
    ) -> Result<MediaInfo, UpstreamFetchError> {
        debug!(phase = ?Phase::Fetch, ?mode, "Fetching media metadata");
        let request = FetchRequest {
            video_id: video_id.to_string(),
            mode,
            auth: auth.cloned(),
            cookie_file: cookies.map(|snapshot| snapshot.path.clone()),
        };
        self.source.fetch(&request).await
    }

    fn select<'a>(
        &self,
        formats: &'a [FormatDescriptor],
    ) -> Option<(&'static str, &'a FormatDescriptor)> {
        debug!(phase = ?Phase::Selection, candidates = formats.len(), "Selecting stream");
        self.policies.iter().find_map(|policy| {
            select_format(formats, policy)
                .ok()
                .map(|format| (policy.name, format))
        })
    }

    /// Resolves `video_id` to one playable URL. `cookies` switches on authenticated mode.
    pub async fn resolve(
        &self,
        video_id: &str,
        cookies: Option<&CookieSnapshot>,
    ) -> Result<ResolvedStream, ResolutionError> {
        let result = self.run(video_id, cookies).await;
        match &result {
            Ok(stream) => debug!(
                phase = ?Phase::Done,
                video_id,
                policy = stream.policy,
                authenticated = stream.authenticated,
                "Stream resolved"
            ),
            Err(error) => warn!(phase = ?Phase::Failed, video_id, "Stream resolution failed: {error}"),
        }
        result
    }

    async fn run(
        &self,
        video_id: &str,
        cookies: Option<&CookieSnapshot>,
    ) -> Result<ResolvedStream, ResolutionError> {
        let mut auth = self.credentials(cookies);

        let mut mode = ExtractionMode::Preferred;
        let mut info = match self.fetch(video_id, mode, auth.as_ref(), cookies).await {
            Ok(info) => info,
            Err(error) if error.is_retryable() => {
                info!("Retrying {video_id} with relaxed extraction after: {error}");
                mode = ExtractionMode::Relaxed;
                auth = self.credentials(cookies);
                self.fetch(video_id, mode, auth.as_ref(), cookies).await?
            }
            Err(error) => return Err(error.into()),
        };

        if self.select(&info.formats).is_none() && mode == ExtractionMode::Preferred {
            info!("No eligible format for {video_id}; retrying with relaxed extraction");
            auth = self.credentials(cookies);
            match self
                .fetch(video_id, ExtractionMode::Relaxed, auth.as_ref(), cookies)
                .await
            {
                Ok(relaxed) => info = relaxed,
                Err(error) => {
                    warn!("Relaxed re-fetch of {video_id} failed: {error}");
                    return Err(ResolutionError::NoEligibleFormat);
                }
            }
        }

        let (policy, format) = self
            .select(&info.formats)
            .ok_or(ResolutionError::NoEligibleFormat)?;
        debug!(format_id = %format.format_id, policy, "Selected format");
        let stream_url = format
            .playable_url()
            .ok_or(ResolutionError::NoEligibleFormat)?
            .to_string();

        Ok(ResolvedStream {
            video_id: video_id.to_string(),
            stream_url,
            title: info.title.unwrap_or_default(),
            duration: info
                .duration
                .filter(|value| value.is_finite() && *value > 0.0)
                .map(|value| value.round() as u64)
                .unwrap_or_default(),
            thumbnail: info.thumbnail.unwrap_or_default(),
            policy,
            authenticated: auth.is_some(),
        })
    }
}
