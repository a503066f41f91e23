use chrono::Utc;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, ORIGIN, USER_AGENT};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

use crate::{
    credentials::{AuthHeaderSet, DEFAULT_ORIGIN, USER_AGENT as BROWSER_USER_AGENT},
    track::{Track, looks_like_duration},
};

const SEARCH_URL: &str = "https://music.youtube.com/youtubei/v1/search";
/// Restricts results to songs.
const SONGS_FILTER_PARAMS: &str = "EgWKAQIIAWoMEA4QChADEAQQCRAF";
const CONSENT_COOKIE: &str = "SOCS=CAI";
const ARTIST_PAGE_TYPE: &str = "MUSIC_PAGE_TYPE_ARTIST";
const MAX_CONTINUATION_PAGES: usize = 5;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("catalog answered with HTTP {0}")]
    Status(u16),
    #[error("catalog response could not be read: {0}")]
    Malformed(String),
}

impl CatalogError {
    /// Transport and status failures mean the catalog is unreachable rather than broken.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Status(_))
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct SearchPage {
    pub tracks: Vec<Track>,
    pub continuation: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CatalogClient {
    http: reqwest::Client,
}

impl CatalogClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        auth: Option<&AuthHeaderSet>,
    ) -> Result<Vec<Track>, CatalogError> {
        let body = search_body(query);
        let first = self.post(&[], &body, auth).await?;
        let mut page = parse_search_response(&first)?;
        let mut tracks = std::mem::take(&mut page.tracks);
        let mut pages = 1;

        while tracks.len() < limit && pages < MAX_CONTINUATION_PAGES {
            let Some(token) = page.continuation.take() else {
                break;
            };
            let params = [
                ("ctoken", token.as_str()),
                ("continuation", token.as_str()),
                ("type", "next"),
            ];
            let next = self.post(&params, &body, auth).await?;
            page = parse_continuation_response(&next);
            if page.tracks.is_empty() {
                break;
            }
            tracks.append(&mut page.tracks);
            pages += 1;
        }

        tracks.truncate(limit);
        debug!(query, results = tracks.len(), pages, "Catalog search finished");
        Ok(tracks)
    }

    async fn post(
        &self,
        params: &[(&str, &str)],
        body: &Value,
        auth: Option<&AuthHeaderSet>,
    ) -> Result<Value, CatalogError> {
        let mut request = self
            .http
            .post(SEARCH_URL)
            .query(&[("alt", "json"), ("prettyPrint", "false")])
            .query(params)
            .header(CONTENT_TYPE, "application/json")
            .header("X-Goog-AuthUser", "0")
            .json(body);

        request = match auth {
            Some(auth) => request
                .header(USER_AGENT, &auth.user_agent)
                .header(COOKIE, &auth.cookie)
                .header(AUTHORIZATION, &auth.authorization)
                .header(ORIGIN, &auth.origin)
                .header("X-Origin", &auth.origin),
            None => request
                .header(USER_AGENT, BROWSER_USER_AGENT)
                .header(COOKIE, CONSENT_COOKIE)
                .header(ORIGIN, DEFAULT_ORIGIN)
                .header("X-Origin", DEFAULT_ORIGIN),
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::Status(status.as_u16()));
        }

        response
            .json::<Value>()
            .await
            .map_err(|error| CatalogError::Malformed(error.to_string()))
    }
}

fn client_version() -> String {
    format!("1.{}.01.00", Utc::now().format("%Y%m%d"))
}

pub fn search_body(query: &str) -> Value {
    json!({
        "context": {
            "client": {
                "clientName": "WEB_REMIX",
                "clientVersion": client_version(),
                "hl": "en",
                "gl": "US"
            },
            "user": {}
        },
        "query": query,
        "params": SONGS_FILTER_PARAMS
    })
}

pub fn parse_search_response(response: &Value) -> Result<SearchPage, CatalogError> {
    let sections = response
        .pointer("/contents/tabbedSearchResultsRenderer/tabs/0/tabRenderer/content/sectionListRenderer/contents")
        .and_then(Value::as_array)
        .ok_or_else(|| CatalogError::Malformed("search response has no result sections".to_string()))?;

    let mut page = SearchPage::default();
    for shelf in sections.iter().filter_map(|section| section.get("musicShelfRenderer")) {
        let mut shelf_page = parse_shelf(shelf);
        page.tracks.append(&mut shelf_page.tracks);
        if page.continuation.is_none() {
            page.continuation = shelf_page.continuation;
        }
    }

    Ok(page)
}

pub fn parse_continuation_response(response: &Value) -> SearchPage {
    response
        .pointer("/continuationContents/musicShelfContinuation")
        .map(parse_shelf)
        .unwrap_or_default()
}

fn parse_shelf(shelf: &Value) -> SearchPage {
    let tracks = shelf
        .get("contents")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("musicResponsiveListItemRenderer"))
                .filter_map(parse_item)
                .collect()
        })
        .unwrap_or_default();

    let continuation = shelf
        .pointer("/continuations/0/nextContinuationData/continuation")
        .and_then(Value::as_str)
        .map(ToString::to_string);

    SearchPage {
        tracks,
        continuation,
    }
}

fn column_runs(item: &Value, index: usize) -> &[Value] {
    item.pointer(&format!(
        "/flexColumns/{index}/musicResponsiveListItemFlexColumnRenderer/text/runs"
    ))
    .and_then(Value::as_array)
    .map(Vec::as_slice)
    .unwrap_or_default()
}

fn run_text(run: &Value) -> Option<&str> {
    run.get("text").and_then(Value::as_str)
}

fn video_id(item: &Value) -> Option<String> {
    [
        "/playlistItemData/videoId",
        "/flexColumns/0/musicResponsiveListItemFlexColumnRenderer/text/runs/0/navigationEndpoint/watchEndpoint/videoId",
        "/overlay/musicItemThumbnailOverlayRenderer/content/musicPlayButtonRenderer/playNavigationEndpoint/watchEndpoint/videoId",
    ]
    .iter()
    .find_map(|pointer| item.pointer(pointer).and_then(Value::as_str))
    .filter(|id| !id.is_empty())
    .map(ToString::to_string)
}

fn is_artist_run(run: &Value) -> bool {
    let page_type = run
        .pointer("/navigationEndpoint/browseEndpoint/browseEndpointContextSupportedConfigs/browseEndpointContextMusicConfig/pageType")
        .and_then(Value::as_str);
    let browse_id = run
        .pointer("/navigationEndpoint/browseEndpoint/browseId")
        .and_then(Value::as_str);

    page_type == Some(ARTIST_PAGE_TYPE) || browse_id.is_some_and(|id| id.starts_with("UC"))
}

fn artists(byline: &[Value]) -> Vec<String> {
    let linked = byline
        .iter()
        .filter(|run| is_artist_run(run))
        .filter_map(run_text)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(ToString::to_string)
        .collect::<Vec<_>>();

    if !linked.is_empty() {
        return linked;
    }

    // Uploads without artist pages only carry a plain-text byline.
    byline
        .iter()
        .filter_map(run_text)
        .map(str::trim)
        .find(|text| !text.is_empty() && *text != "•" && !looks_like_duration(text))
        .map(|text| vec![text.to_string()])
        .unwrap_or_default()
}

fn largest_thumbnail(item: &Value) -> String {
    item.pointer("/thumbnail/musicThumbnailRenderer/thumbnail/thumbnails")
        .and_then(Value::as_array)
        .and_then(|thumbnails| {
            thumbnails
                .iter()
                .filter_map(|thumb| {
                    let url = thumb.get("url").and_then(Value::as_str)?;
                    let width = thumb.get("width").and_then(Value::as_u64).unwrap_or_default();
                    Some((width, url))
                })
                .rev()
                .max_by_key(|(width, _)| *width)
                .map(|(_, url)| url.to_string())
        })
        .unwrap_or_default()
}

fn parse_item(item: &Value) -> Option<Track> {
    let video_id = video_id(item)?;
    let title = column_runs(item, 0)
        .first()
        .and_then(run_text)
        .unwrap_or_default();
    let byline = column_runs(item, 1);
    let duration = byline
        .iter()
        .filter_map(run_text)
        .map(str::trim)
        .rfind(|text| looks_like_duration(text))
        .unwrap_or("0:00");

    Some(Track::new(
        video_id,
        title,
        &artists(byline),
        largest_thumbnail(item),
        duration,
    ))
}
