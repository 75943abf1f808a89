use std::path::PathBuf;

use anyhow::Result;

use crate::types::{Episode, SeriesInfo, ServerCandidate};

pub mod hianime;
pub mod jimaku;

pub const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0 Safari/537.36";

/// Where the site says a server's player lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedDescriptor {
    pub kind: String,
    pub link: String,
}

pub trait AnimeProvider {
    async fn fetch_series(&self, series_url: &str) -> Result<SeriesInfo>;
    async fn fetch_episodes(&self, anime_id: &str) -> Result<Vec<Episode>>;
    async fn fetch_servers(&self, episode_id: u64) -> Result<Vec<ServerCandidate>>;
    async fn fetch_embed(&self, server_id: u64) -> Result<EmbedDescriptor>;
}

/// Lookup key for external subtitles: Anilist id when known, otherwise a title query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubtitleQuery {
    Anilist(String),
    Title(String),
}

impl SubtitleQuery {
    pub fn for_series(series: &SeriesInfo) -> Self {
        match series.anilist_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => SubtitleQuery::Anilist(id.to_string()),
            _ => SubtitleQuery::Title(series.japanese_name.clone()),
        }
    }
}

pub trait SubtitleProvider {
    /// Local subtitle files for the episode, in the order they should be loaded.
    async fn fetch_subtitles(&self, query: &SubtitleQuery, episode: u32) -> Result<Vec<PathBuf>>;
}
