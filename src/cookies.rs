use std::{
    collections::BTreeMap,
    ffi::OsString,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use thiserror::Error;
use tracing::{debug, info, warn};

const NETSCAPE_FIELD_COUNT: usize = 7;
const HTTP_ONLY_PREFIX: &str = "#HttpOnly_";

static STAGING_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Cookies exported from a browser session, keyed by name.
///
/// Iterates in ascending name order so that anything rendered from the jar is stable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieJar {
    entries: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cookie record on line {line} has {fields} field(s), expected at least 7")]
pub struct MalformedCookieRecord {
    pub line: usize,
    pub fields: usize,
}

#[derive(Debug, Default)]
pub struct ParsedCookies {
    pub jar: CookieJar,
    pub malformed: Vec<MalformedCookieRecord>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps the first value seen for a name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.entry(name.into()).or_insert_with(|| value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Renders the jar as a `Cookie` request header value. Values are joined verbatim.
    pub fn header_value(&self) -> String {
        self.iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Parses the Netscape cookie-file format. Lines that do not carry enough tab-separated
    /// fields are skipped and reported back instead of failing the whole file.
    pub fn parse_netscape(content: &str) -> ParsedCookies {
        let mut parsed = ParsedCookies::default();

        for (index, raw_line) in content.lines().enumerate() {
            let line = raw_line.trim_end_matches(['\r', '\n']);
            let line = line.strip_prefix(HTTP_ONLY_PREFIX).unwrap_or(line);

            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }

            let fields = line.split('\t').collect::<Vec<_>>();
            if fields.len() < NETSCAPE_FIELD_COUNT {
                parsed.malformed.push(MalformedCookieRecord {
                    line: index + 1,
                    fields: fields.len(),
                });
                continue;
            }

            let name = fields[5].trim();
            if name.is_empty() {
                parsed.malformed.push(MalformedCookieRecord {
                    line: index + 1,
                    fields: fields.len(),
                });
                continue;
            }

            parsed.jar.insert(name, fields[6].trim());
        }

        parsed
    }
}

impl<K, V> FromIterator<(K, V)> for CookieJar
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut jar = CookieJar::new();
        for (name, value) in iter {
            jar.insert(name, value);
        }
        jar
    }
}

/// A jar loaded for one request, together with the file `yt-dlp` should read it from.
#[derive(Debug, Clone)]
pub struct CookieSnapshot {
    pub jar: CookieJar,
    pub path: PathBuf,
}

/// Read-only cookie file plus the writable scratch copy handed to the extractor.
#[derive(Debug, Clone)]
pub struct CookieSource {
    source: PathBuf,
    scratch: PathBuf,
}

impl CookieSource {
    pub fn new(source: impl Into<PathBuf>, scratch: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            scratch: scratch.into(),
        }
    }

    pub fn source_path(&self) -> &Path {
        &self.source
    }

    pub async fn is_available(&self) -> bool {
        tokio::fs::try_exists(&self.source).await.unwrap_or(false)
    }

    /// Copies the source into the scratch location unless a copy already exists.
    /// Returns `None` when no usable cookie file can be provided.
    pub async fn ensure_scratch_copy(&self) -> Option<PathBuf> {
        if !self.is_available().await {
            warn!("No cookies file at {}", self.source.display());
            return None;
        }

        match tokio::fs::try_exists(&self.scratch).await {
            Ok(true) => return Some(self.scratch.clone()),
            Ok(false) => {}
            Err(error) => {
                warn!(
                    "Could not inspect cookie scratch file {}: {error}",
                    self.scratch.display()
                );
                return None;
            }
        }

        if let Some(parent) = self.scratch.parent()
            && let Err(error) = tokio::fs::create_dir_all(parent).await
            && error.kind() != ErrorKind::AlreadyExists
        {
            warn!(
                "Could not create cookie scratch directory {}: {error}",
                parent.display()
            );
            return None;
        }

        // Readers only ever see a complete file: copy beside the target, then rename over it.
        let staging = self.staging_path();
        if let Err(error) = tokio::fs::copy(&self.source, &staging).await {
            warn!("Failed to copy cookies file: {error}");
            let _ = tokio::fs::remove_file(&staging).await;
            return None;
        }

        match tokio::fs::rename(&staging, &self.scratch).await {
            Ok(()) => {
                info!("Copied cookies file -> {}", self.scratch.display());
                Some(self.scratch.clone())
            }
            Err(error) => {
                warn!("Failed to move cookies copy into place: {error}");
                let _ = tokio::fs::remove_file(&staging).await;
                None
            }
        }
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self
            .scratch
            .file_name()
            .map(OsString::from)
            .unwrap_or_else(|| OsString::from("cookies"));
        name.push(format!(
            ".{}.{}.partial",
            std::process::id(),
            STAGING_SEQUENCE.fetch_add(1, Ordering::Relaxed)
        ));
        self.scratch.with_file_name(name)
    }

    /// Loads the jar for one request. The scratch copy is parsed because that is the file
    /// the extractor will see.
    pub async fn load(&self) -> Option<CookieSnapshot> {
        let path = self.ensure_scratch_copy().await?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(error) => {
                warn!("Could not read cookies file {}: {error}", path.display());
                return None;
            }
        };

        let parsed = CookieJar::parse_netscape(&content);
        if parsed.jar.is_empty() {
            warn!("Cookies file {} holds no cookie records", path.display());
        }
        for record in &parsed.malformed {
            debug!("Skipped cookie record: {record}");
        }
        debug!(
            "Loaded {} cookie(s), skipped {} malformed record(s)",
            parsed.jar.len(),
            parsed.malformed.len()
        );

        Some(CookieSnapshot {
            jar: parsed.jar,
            path,
        })
    }
}
