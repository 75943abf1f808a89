use anyhow::{Result, anyhow};
use dirs_next::cache_dir;
use std::{
    collections::HashMap,
    future::Future,
    path::{Path, PathBuf},
};
use tracing::debug;

use crate::types::Episode;

/// Episode listings keyed by series id, owned by the navigation loop.
#[derive(Debug, Default)]
pub struct EpisodeCache {
    entries: HashMap<String, Vec<Episode>>,
}

impl EpisodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_populate<F, Fut>(&mut self, series_id: &str, fetch: F) -> Result<&[Episode]>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<Episode>>>,
    {
        if !self.entries.contains_key(series_id) {
            let episodes = fetch().await?;
            debug!(series_id, count = episodes.len(), "cached episode list");
            self.entries.insert(series_id.to_string(), episodes);
        } else {
            debug!(series_id, "episode list served from cache");
        }
        Ok(self
            .entries
            .get(series_id)
            .map(Vec::as_slice)
            .unwrap_or_default())
    }
}

pub fn subtitle_cache_dir(
    series_name: &str,
    cache_base_override: Option<&Path>,
) -> Result<PathBuf> {
    let base = if let Some(path) = cache_base_override {
        path.to_path_buf()
    } else {
        cache_dir().ok_or_else(|| anyhow!("Could not determine cache directory"))?
    };
    Ok(base
        .join("hianime-mpv")
        .join("subtitles")
        .join(sanitize_cache_segment(series_name)))
}

pub fn sanitize_cache_segment(value: &str) -> String {
    let cleaned: String = value
        .trim()
        .chars()
        .filter(|ch| !matches!(ch, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' | '.'))
        .map(|ch| if ch.is_control() { '_' } else { ch })
        .collect();
    let cleaned = cleaned.trim().to_string();
    if cleaned.is_empty() {
        String::from("unknown")
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn episode(number: u32) -> Episode {
        Episode {
            number,
            id: 1000 + u64::from(number),
            english_title: format!("Episode {number}"),
            japanese_title: String::new(),
            url: String::new(),
        }
    }

    #[tokio::test]
    async fn get_or_populate_fetches_once_per_series() {
        let mut cache = EpisodeCache::new();
        let calls = Cell::new(0);

        for _ in 0..3 {
            let episodes = cache
                .get_or_populate("210", || async {
                    calls.set(calls.get() + 1);
                    Ok(vec![episode(1), episode(2)])
                })
                .await
                .expect("fetch should succeed");
            assert_eq!(episodes.len(), 2);
        }
        assert_eq!(calls.get(), 1);

        cache
            .get_or_populate("999", || async {
                calls.set(calls.get() + 1);
                Ok(vec![episode(1)])
            })
            .await
            .expect("fetch should succeed");
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test]
    async fn failed_fetch_is_not_cached() {
        let mut cache = EpisodeCache::new();
        let failed = cache
            .get_or_populate("210", || async { Err(anyhow!("offline")) })
            .await;
        assert!(failed.is_err());

        let episodes = cache
            .get_or_populate("210", || async { Ok(vec![episode(1)]) })
            .await
            .expect("second fetch should succeed");
        assert_eq!(episodes.len(), 1);
    }

    #[test]
    fn sanitize_strips_path_and_reserved_characters() {
        assert_eq!(sanitize_cache_segment("Re:Zero / Season 2?"), "ReZero  Season 2");
        assert_eq!(sanitize_cache_segment("Dr. Stone"), "Dr Stone");
        assert_eq!(sanitize_cache_segment("..."), "unknown");
        assert_eq!(sanitize_cache_segment("プラネテス"), "プラネテス");
    }

    #[test]
    fn subtitle_dir_nests_under_override() {
        let dir = subtitle_cache_dir("Planetes", Some(Path::new("/tmp/base"))).expect("path");
        assert_eq!(dir, PathBuf::from("/tmp/base/hianime-mpv/subtitles/Planetes"));
    }
}
