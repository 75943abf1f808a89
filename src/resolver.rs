//! Megacloud stream resolution.
//!
//! A HiAnime server id points at an embed page on the megacloud player
//! domain. The page carries the file id (`#megacloud-player[data-id]`) and a
//! nonce; both go to `getSources`, which answers with the HLS manifest,
//! subtitle tracks and intro/outro markers.

use std::{sync::LazyLock, time::Duration};

use reqwest::{Client, header};
use scraper::{Html, Selector};
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::ResolveError;
use crate::nonce::extract_nonce;
use crate::providers::AnimeProvider;
use crate::types::{StreamHeaders, StreamManifest, TimeInterval, Track, null_as_default};

pub const EMBED_USER_AGENT: &str = "Mozilla/5.0 (Linux; Android 10; K) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/137.0.0.0 Mobile Safari/537.36";
pub const MAX_EXTRACT_ATTEMPTS: u32 = 3;
pub const RETRY_DELAY: Duration = Duration::from_secs(1);
const SOURCES_PATH: &str = "embed-2/v3/e-1/getSources";

static PLAYER_CONTAINER: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("#megacloud-player").expect("valid CSS selector"));

pub trait StreamResolve {
    async fn resolve(&self, server_id: u64) -> Result<StreamManifest, ResolveError>;
}

pub struct MegacloudResolver<'a, P> {
    provider: &'a P,
    client: Client,
    retry_delay: Duration,
}

impl<'a, P: AnimeProvider> MegacloudResolver<'a, P> {
    pub fn new(provider: &'a P) -> anyhow::Result<Self> {
        let client = Client::builder().user_agent(EMBED_USER_AGENT).build()?;
        Ok(Self {
            provider,
            client,
            retry_delay: RETRY_DELAY,
        })
    }

    #[cfg(test)]
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    async fn fetch_embed_page(
        &self,
        iframe_url: &Url,
        origin: &str,
    ) -> Result<String, ResolveError> {
        let response = self
            .client
            .get(iframe_url.clone())
            .header(header::REFERER, origin)
            .send()
            .await
            .map_err(|err| ResolveError::fetch("embed page request failed", err))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ResolveError::SourceFetchFailed(format!(
                "embed page returned HTTP {status}"
            )));
        }
        response
            .text()
            .await
            .map_err(|err| ResolveError::fetch("failed to read embed page", err))
    }

    /// Bounded retry over the embed page. Falls through with partial values
    /// after the last attempt so the sources request reports the real error.
    async fn extract_handshake(&self, iframe_url: &Url, origin: &str) -> Handshake {
        let mut handshake = Handshake::default();

        for attempt in 1..=MAX_EXTRACT_ATTEMPTS {
            info!(attempt, max = MAX_EXTRACT_ATTEMPTS, "extracting embed handshake");
            match self.fetch_embed_page(iframe_url, origin).await {
                Ok(body) => {
                    let scan = scan_embed_page(&body);
                    if let Some(file_id) = &scan.file_id {
                        handshake.file_id.clone_from(file_id);
                    }
                    if let Some(nonce) = &scan.nonce {
                        handshake.nonce.clone_from(nonce);
                    }
                    match (scan.file_id.is_some(), scan.nonce.is_some()) {
                        (true, true) => {
                            debug!(file_id = %handshake.file_id, "handshake extracted");
                            return handshake;
                        }
                        (false, _) => warn!(attempt, "player container has no data-id"),
                        (true, false) => warn!(attempt, "could not find nonce in embed page"),
                    }
                }
                Err(err) => warn!(attempt, "{err}"),
            }

            if attempt < MAX_EXTRACT_ATTEMPTS {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        warn!(
            error = %ResolveError::ExtractionExhausted { attempts: MAX_EXTRACT_ATTEMPTS },
            file_id = %handshake.file_id,
            "continuing with partial handshake"
        );
        handshake
    }

    async fn fetch_sources(
        &self,
        sources_url: Url,
        iframe_url: &Url,
    ) -> Result<SourcesPayload, ResolveError> {
        debug!(url = %sources_url, "requesting stream sources");
        let response = self
            .client
            .get(sources_url)
            .header(header::ACCEPT, "*/*")
            .header("X-Requested-With", "application/json")
            .header(header::REFERER, iframe_url.as_str())
            .send()
            .await
            .map_err(|err| ResolveError::fetch("sources request failed", err))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| ResolveError::fetch("failed to read sources response", err))?;
        if !status.is_success() {
            return Err(ResolveError::SourceFetchFailed(format!(
                "sources endpoint returned HTTP {status}"
            )));
        }
        serde_json::from_str(&text)
            .map_err(|err| ResolveError::fetch("failed to decode sources response", err))
    }
}

impl<P: AnimeProvider> StreamResolve for MegacloudResolver<'_, P> {
    async fn resolve(&self, server_id: u64) -> Result<StreamManifest, ResolveError> {
        let descriptor = self
            .provider
            .fetch_embed(server_id)
            .await
            .map_err(|err| {
                ResolveError::fetch("failed to fetch server descriptor", format!("{err:#}"))
            })?;
        if descriptor.kind != "iframe" {
            return Err(ResolveError::NotIframe {
                kind: descriptor.kind,
            });
        }

        let iframe_url = Url::parse(&descriptor.link)
            .map_err(|err| ResolveError::fetch("invalid embed link", err))?;
        let origin = embed_origin(&iframe_url)?;
        debug!(server_id, iframe = %iframe_url, "resolving embed");

        let handshake = self.extract_handshake(&iframe_url, &origin).await;
        let sources_url = build_sources_url(&origin, &handshake)?;
        let payload = self.fetch_sources(sources_url, &iframe_url).await?;
        let manifest = accept_sources(payload, &origin)?;
        debug!(
            url = %manifest.url,
            hls = manifest.is_hls(),
            encrypted = manifest.encrypted,
            origin = %manifest.headers.origin,
            tracks = manifest.tracks.len(),
            default_track = manifest.tracks.iter().find(|t| t.default).map(|t| t.label.as_str()),
            "sources accepted"
        );
        Ok(manifest)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub file_id: String,
    pub nonce: String,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct EmbedScan {
    pub file_id: Option<String>,
    pub nonce: Option<String>,
}

pub fn scan_embed_page(body: &str) -> EmbedScan {
    let doc = Html::parse_document(body);
    let file_id = doc
        .select(&PLAYER_CONTAINER)
        .next()
        .and_then(|el| el.value().attr("data-id"))
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string);
    let nonce = extract_nonce(&doc.html());
    EmbedScan { file_id, nonce }
}

/// `scheme://host[:port]/` of the embed link; used as referer and origin.
pub fn embed_origin(iframe_url: &Url) -> Result<String, ResolveError> {
    let host = iframe_url.host_str().ok_or_else(|| {
        ResolveError::SourceFetchFailed(format!("embed link {iframe_url} has no host"))
    })?;
    Ok(match iframe_url.port() {
        Some(port) => format!("{}://{host}:{port}/", iframe_url.scheme()),
        None => format!("{}://{host}/", iframe_url.scheme()),
    })
}

pub fn build_sources_url(origin: &str, handshake: &Handshake) -> Result<Url, ResolveError> {
    let mut url = Url::parse(origin)
        .and_then(|base| base.join(SOURCES_PATH))
        .map_err(|err| ResolveError::fetch("invalid sources url", err))?;
    url.query_pairs_mut()
        .append_pair("id", &handshake.file_id)
        .append_pair("_k", &handshake.nonce);
    Ok(url)
}

/// Playable when not encrypted, or when the first source is HLS regardless of
/// the upstream flag; encrypted non-HLS payloads are rejected.
pub fn accept_sources(
    payload: SourcesPayload,
    origin: &str,
) -> Result<StreamManifest, ResolveError> {
    let encrypted = payload.encrypted || payload.sources.is_encoded();
    let Some(file) = payload.sources.first_file() else {
        return Err(ResolveError::SourceFetchFailed(String::from(
            "sources response has no entries",
        )));
    };

    if encrypted && !file.contains(".m3u8") {
        return Err(ResolveError::Encrypted);
    }

    Ok(StreamManifest {
        url: file.to_string(),
        headers: StreamHeaders {
            user_agent: EMBED_USER_AGENT.to_string(),
            referer: origin.to_string(),
            origin: origin.to_string(),
        },
        encrypted,
        tracks: payload.tracks,
        intro: payload.intro,
        outro: payload.outro,
    })
}

// --- Wire Structs ---

#[derive(Debug, Deserialize)]
pub struct SourcesPayload {
    #[serde(default, deserialize_with = "null_as_default")]
    sources: RawSources,
    #[serde(default, deserialize_with = "null_as_default")]
    tracks: Vec<Track>,
    #[serde(default, deserialize_with = "null_as_default")]
    encrypted: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    intro: TimeInterval,
    #[serde(default, deserialize_with = "null_as_default")]
    outro: TimeInterval,
}

/// Older embeds return the source list as one encrypted string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawSources {
    List(Vec<SourceFile>),
    Encoded(String),
}

impl Default for RawSources {
    fn default() -> Self {
        RawSources::List(Vec::new())
    }
}

impl RawSources {
    fn first_file(&self) -> Option<&str> {
        match self {
            RawSources::List(list) => list
                .first()
                .map(|s| s.file.as_str())
                .filter(|file| !file.is_empty()),
            RawSources::Encoded(blob) if !blob.is_empty() => Some(blob.as_str()),
            RawSources::Encoded(_) => None,
        }
    }

    fn is_encoded(&self) -> bool {
        matches!(self, RawSources::Encoded(_))
    }
}

#[derive(Debug, Deserialize)]
struct SourceFile {
    #[serde(default, deserialize_with = "null_as_default")]
    file: String,
}
