use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, anyhow, bail};
use config::{Config, Environment, File, FileFormat};
use dirs_next::config_dir;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const ENV_PREFIX: &str = "HIANIME_MPV";
pub const JIMAKU_KEY_ENV: &str = "JIMAKU_API_KEY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub subtitles_enabled: bool,
    pub auto_select_server: bool,
    pub debug: bool,
    pub jimaku_api_key: Option<String>,
    /// Player command line; may carry leading arguments (`"mpv --profile=anime"`).
    pub player: String,
    pub player_args: Vec<String>,
    /// Only load embedded tracks with this label (e.g. `"English"`).
    pub subtitle_language: Option<String>,
    /// Case-insensitive patterns for servers that only serve encrypted non-HLS payloads.
    pub server_denylist: Vec<String>,
    pub startup_timeout_secs: u64,
    pub history_limit: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            subtitles_enabled: false,
            auto_select_server: true,
            debug: false,
            jimaku_api_key: None,
            player: String::from("mpv"),
            player_args: Vec::new(),
            subtitle_language: None,
            server_denylist: vec![String::from("^HD-3$")],
            startup_timeout_secs: 20,
            history_limit: 10,
        }
    }
}

impl Settings {
    /// Defaults, then the TOML file (if any), then `HIANIME_MPV_*` variables.
    pub fn load(path: &Path) -> Result<Self> {
        let built = Config::builder()
            .add_source(File::from(path).format(FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("server_denylist")
                    .with_list_parse_key("player_args"),
            )
            .build()
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let mut settings: Settings = built
            .try_deserialize()
            .with_context(|| format!("failed to parse config {}", path.display()))?;

        if settings
            .jimaku_api_key
            .as_deref()
            .is_none_or(|key| key.trim().is_empty())
        {
            settings.jimaku_api_key = std::env::var(JIMAKU_KEY_ENV)
                .ok()
                .filter(|val| !val.trim().is_empty());
        }
        Ok(settings)
    }

    /// Writes a default config on first run so users have something to edit.
    pub fn write_default_if_missing(path: &Path) -> Result<bool> {
        if path.exists() {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create config directory {}", parent.display())
            })?;
        }
        let data = toml::to_string_pretty(&Settings::default())
            .context("failed to serialize default config")?;
        fs::write(path, data)
            .with_context(|| format!("failed to write config file {}", path.display()))?;
        info!(path = %path.display(), "wrote default config");
        Ok(true)
    }

    pub fn load_or_init(path: &Path) -> Result<Self> {
        if let Err(err) = Self::write_default_if_missing(path) {
            warn!("could not create default config: {err:#}");
        }
        Self::load(path)
    }

    /// Program plus the arguments embedded in `player`.
    pub fn player_command(&self) -> Result<(String, Vec<String>)> {
        let Some(mut parts) = shlex::split(&self.player) else {
            bail!("player command '{}' has unbalanced quoting", self.player);
        };
        if parts.is_empty() {
            bail!("player command is empty");
        }
        let program = parts.remove(0);
        Ok((program, parts))
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs.max(1))
    }

    pub fn has_jimaku_key(&self) -> bool {
        self.jimaku_api_key
            .as_deref()
            .is_some_and(|key| !key.trim().is_empty())
    }
}

pub fn config_path() -> Result<PathBuf> {
    let base = config_dir().ok_or_else(|| anyhow!("Could not determine config directory"))?;
    Ok(base.join("hianime-mpv").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_first_run_behavior() {
        let settings = Settings::default();
        assert!(!settings.subtitles_enabled);
        assert!(settings.auto_select_server);
        assert_eq!(settings.player, "mpv");
        assert_eq!(settings.server_denylist, vec!["^HD-3$".to_string()]);
        assert_eq!(settings.startup_timeout(), Duration::from_secs(20));
        assert_eq!(settings.history_limit, 10);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = Settings::load(&dir.path().join("absent.toml")).expect("load");
        assert_eq!(settings.player, "mpv");
        assert!(settings.auto_select_server);
    }

    #[test]
    fn file_values_override_defaults_and_keep_the_rest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "subtitles_enabled = true\nauto_select_server = false\nsubtitle_language = \"English\"\nserver_denylist = [\"^HD-3$\", \"douvid\"]\n",
        )
        .expect("write config");

        let settings = Settings::load(&path).expect("load");
        assert!(settings.subtitles_enabled);
        assert!(!settings.auto_select_server);
        assert_eq!(settings.subtitle_language.as_deref(), Some("English"));
        assert_eq!(settings.server_denylist.len(), 2);
        assert_eq!(settings.startup_timeout_secs, 20);
    }

    #[test]
    fn default_file_is_written_once_and_loads_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");
        assert!(Settings::write_default_if_missing(&path).expect("first write"));
        assert!(!Settings::write_default_if_missing(&path).expect("second write"));

        let settings = Settings::load(&path).expect("load");
        assert_eq!(settings.server_denylist, Settings::default().server_denylist);
        assert_eq!(settings.player, "mpv");
    }

    #[test]
    fn player_command_splits_embedded_arguments() {
        let settings = Settings {
            player: String::from("mpv --profile='low latency'"),
            player_args: vec![String::from("--volume=50")],
            ..Settings::default()
        };
        let (program, args) = settings.player_command().expect("split");
        assert_eq!(program, "mpv");
        assert_eq!(args, vec!["--profile=low latency"]);
    }

    #[test]
    fn empty_player_command_is_rejected() {
        let settings = Settings {
            player: String::from("   "),
            ..Settings::default()
        };
        assert!(settings.player_command().is_err());
    }
}
