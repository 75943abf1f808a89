use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use dialoguer::{Select, theme::ColorfulTheme};
use dirs_next::data_dir;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};
use tracing::debug;

use crate::types::{PlaybackOutcome, SeriesInfo};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeProgress {
    pub position: f64,
    pub duration: f64,
}

/// Resume state for one series.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HistoryEntry {
    pub series_url: String,
    pub series_id: String,
    #[serde(default)]
    pub japanese_name: String,
    #[serde(default)]
    pub english_name: String,
    #[serde(default)]
    pub anilist_id: Option<String>,
    pub last_episode: u32,
    #[serde(default)]
    pub sub_delay: f64,
    #[serde(default)]
    pub episodes: BTreeMap<u32, EpisodeProgress>,
    pub watched_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(series: &SeriesInfo) -> Self {
        Self {
            series_url: series.url.clone(),
            series_id: series.anime_id.clone(),
            japanese_name: series.japanese_name.clone(),
            english_name: series.english_name.clone(),
            anilist_id: series.anilist_id.clone(),
            last_episode: 0,
            sub_delay: 0.0,
            episodes: BTreeMap::new(),
            watched_at: Utc::now(),
        }
    }

    pub fn progress(&self, episode: u32) -> Option<EpisodeProgress> {
        self.episodes.get(&episode).copied()
    }

    /// Applies a playback result. Nothing changes unless the stream actually started.
    pub fn record_playback(&mut self, episode: u32, outcome: &PlaybackOutcome) -> bool {
        if !outcome.started {
            return false;
        }
        self.episodes.insert(
            episode,
            EpisodeProgress {
                position: outcome.last_position,
                duration: outcome.total_duration,
            },
        );
        self.sub_delay = outcome.sub_delay;
        self.last_episode = episode;
        self.watched_at = Utc::now();
        true
    }

    pub fn display_name(&self) -> &str {
        if self.japanese_name.trim().is_empty() {
            &self.english_name
        } else {
            &self.japanese_name
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct History {
    pub entries: Vec<HistoryEntry>,
}

impl History {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read history file {}", path.display()))?;
        let history = serde_json::from_str(&data)
            .with_context(|| format!("failed to parse history file {}", path.display()))?;
        debug!(path = %path.display(), "history loaded");
        Ok(history)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create history directory {}", parent.display())
            })?;
        }
        let data = serde_json::to_string_pretty(self)?;
        fs::write(path, data)
            .with_context(|| format!("failed to write history file {}", path.display()))?;
        Ok(())
    }

    /// Moves the entry to the front, dropping anything past `limit` series.
    pub fn upsert(&mut self, entry: HistoryEntry, limit: usize) {
        if let Some(pos) = self
            .entries
            .iter()
            .position(|e| e.series_id == entry.series_id)
        {
            self.entries.remove(pos);
        }
        self.entries.insert(0, entry);
        self.entries.truncate(limit.max(1));
    }

    pub fn find(&self, series_id: &str) -> Option<&HistoryEntry> {
        self.entries.iter().find(|e| e.series_id == series_id)
    }

    pub fn entry_for(&self, series: &SeriesInfo) -> HistoryEntry {
        self.find(&series.anime_id)
            .cloned()
            .unwrap_or_else(|| HistoryEntry::new(series))
    }

    pub fn select_entry(&self) -> Result<Option<HistoryEntry>> {
        if self.entries.is_empty() {
            println!("History is empty.");
            return Ok(None);
        }

        let items: Vec<String> = self
            .entries
            .iter()
            .map(|entry| {
                format!(
                    "{} \u{00b7} episode {} \u{00b7} watched {}",
                    entry.display_name(),
                    entry.last_episode,
                    entry.watched_at.format("%Y-%m-%d %H:%M")
                )
            })
            .collect();

        let selection = Select::with_theme(&theme())
            .with_prompt("Select a series to continue (Esc to cancel)")
            .items(&items)
            .default(0)
            .interact_opt()?;
        Ok(selection.map(|idx| self.entries[idx].clone()))
    }
}

pub fn history_path() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| anyhow!("Could not determine data directory"))?;
    Ok(base.join("hianime-mpv").join("history.json"))
}

pub fn theme() -> ColorfulTheme {
    ColorfulTheme::default()
}
