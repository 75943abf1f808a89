use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Translation {
    Sub,
    Dub,
}

impl Translation {
    pub fn label(self) -> &'static str {
        match self {
            Translation::Sub => "Sub",
            Translation::Dub => "Dub",
        }
    }

    /// Upstream tags raw servers as `raw`; those carry Japanese audio like `sub`.
    pub fn from_server_type(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("dub") {
            Translation::Dub
        } else {
            Translation::Sub
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SeriesInfo {
    pub url: String,
    pub anime_id: String,
    pub english_name: String,
    pub japanese_name: String,
    pub anilist_id: Option<String>,
    pub mal_id: Option<String>,
}

impl SeriesInfo {
    pub fn display_name(&self) -> &str {
        if self.japanese_name.trim().is_empty() {
            &self.english_name
        } else {
            &self.japanese_name
        }
    }
}

#[derive(Debug, Clone)]
pub struct Episode {
    pub number: u32,
    pub id: u64,
    pub english_title: String,
    pub japanese_title: String,
    pub url: String,
}

impl Episode {
    pub fn display_title(&self) -> &str {
        if self.japanese_title.trim().is_empty() {
            &self.english_title
        } else {
            &self.japanese_title
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCandidate {
    pub translation: Translation,
    pub name: String,
    pub id: u64,
}

impl ServerCandidate {
    pub fn label(&self) -> String {
        match self.translation {
            Translation::Dub => format!("{} (Dub)", self.name),
            Translation::Sub => self.name.clone(),
        }
    }
}

/// Reads an explicit `null` the same way as a missing field.
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Whole-second marker pair; a zero/negative pair means the marker is absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInterval {
    #[serde(default, deserialize_with = "null_as_default")]
    pub start: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub end: i64,
}

impl TimeInterval {
    #[cfg(test)]
    pub const fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn is_intro_present(&self) -> bool {
        self.end > 0
    }

    pub fn is_outro_present(&self) -> bool {
        self.start > 0 && self.end > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    #[serde(default, deserialize_with = "null_as_default")]
    pub file: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub label: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub kind: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub default: bool,
}

impl Track {
    pub fn is_subtitle(&self) -> bool {
        !self.kind.eq_ignore_ascii_case("thumbnails")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHeaders {
    pub user_agent: String,
    pub referer: String,
    pub origin: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamManifest {
    pub url: String,
    pub headers: StreamHeaders,
    pub encrypted: bool,
    pub tracks: Vec<Track>,
    pub intro: TimeInterval,
    pub outro: TimeInterval,
}

impl StreamManifest {
    pub fn is_hls(&self) -> bool {
        self.url.contains(".m3u8")
    }

    pub fn has_chapter_markers(&self) -> bool {
        self.intro.is_intro_present() || self.outro.is_outro_present()
    }
}

/// Why a playback attempt never reached the playing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackFailure {
    StartupTimeout,
    OpenFailed,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackOutcome {
    pub started: bool,
    pub sub_delay: f64,
    pub last_position: f64,
    pub total_duration: f64,
    pub failure: Option<PlaybackFailure>,
}
