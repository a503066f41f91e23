use chrono::Utc;
use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::cookies::CookieJar;

pub const DEFAULT_ORIGIN: &str = "https://music.youtube.com";
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Names under which the session secret may be stored, highest priority first.
pub const SESSION_COOKIE_ALIASES: [&str; 3] = ["SAPISID", "__Secure-3PAPISID", "__Secure-1PAPISID"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cookie jar has no session cookie (looked for SAPISID, __Secure-3PAPISID, __Secure-1PAPISID)")]
pub struct MissingCredentialError;

/// Headers that let a request act as the owner of a cookie jar.
///
/// The `authorization` value embeds the signing time and is only honoured for a short window,
/// so a set must be derived per request and never kept around.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthHeaderSet {
    pub cookie: String,
    pub authorization: String,
    pub user_agent: String,
    pub origin: String,
}

pub fn session_secret(jar: &CookieJar) -> Option<(&'static str, &str)> {
    SESSION_COOKIE_ALIASES.iter().find_map(|alias| {
        jar.get(alias)
            .filter(|value| !value.is_empty())
            .map(|value| (*alias, value))
    })
}

/// Computes the lowercase hex SHA-1 of `"{timestamp} {secret} {origin}"`.
pub fn sapisid_digest(timestamp: i64, secret: &str, origin: &str) -> String {
    let digest = Sha1::digest(format!("{timestamp} {secret} {origin}").as_bytes());
    format!("{digest:x}")
}

pub fn derive_auth_headers(
    jar: &CookieJar,
    origin: &str,
    timestamp: i64,
) -> Result<AuthHeaderSet, MissingCredentialError> {
    let (_, secret) = session_secret(jar).ok_or(MissingCredentialError)?;
    let digest = sapisid_digest(timestamp, secret, origin);

    Ok(AuthHeaderSet {
        cookie: jar.header_value(),
        authorization: format!("SAPISIDHASH {timestamp}_{digest}"),
        user_agent: USER_AGENT.to_string(),
        origin: origin.to_string(),
    })
}

pub fn derive_auth_headers_now(
    jar: &CookieJar,
    origin: &str,
) -> Result<AuthHeaderSet, MissingCredentialError> {
    derive_auth_headers(jar, origin, Utc::now().timestamp())
}
