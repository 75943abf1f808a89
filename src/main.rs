use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Result;
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod cache;
mod chapters;
mod command;
mod config;
mod error;
mod fallback;
mod history;
mod nonce;
mod player;
mod providers;
mod resolver;
#[cfg(test)]
mod testing;
mod types;
mod ui;

use cache::EpisodeCache;
use command::{PlaybackRequest, build_player_args};
use config::{Settings, config_path};
use error::FallbackError;
use fallback::{SelectionMode, ServerDenylist, ServerSelector, parse_server_choice};
use history::{History, history_path};
use player::{PlayerDriver, script::write_tracking_script};
use providers::{AnimeProvider, hianime::HiAnimeClient, jimaku::JimakuClient};
use resolver::MegacloudResolver;
use types::{Episode, PlaybackFailure, SeriesInfo, ServerCandidate, StreamManifest, Translation};

#[derive(Debug, Parser)]
#[command(name = "hianime-mpv", about = "Stream anime from HiAnime via mpv.", version)]
struct Cli {
    /// Series page, e.g. https://hianime.to/planetes-210
    #[arg(value_name = "URL")]
    url: Option<String>,

    #[arg(long)]
    history: bool,

    #[arg(long)]
    dub: bool,

    #[arg(short = 'e', long, value_name = "EPISODE")]
    episode: Option<u32>,

    /// Server number to use instead of automatic fallback.
    #[arg(long, value_name = "N")]
    server: Option<String>,

    /// Always ask which server to use.
    #[arg(long)]
    manual: bool,

    #[arg(long)]
    debug: bool,

    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let result = run().await;
    if let Err(err) = &result {
        eprintln!("error: {err:?}");
    }
    result
}

fn init_tracing(debug: bool) {
    let default_directive = if debug {
        "hianime_mpv=debug"
    } else {
        "hianime_mpv=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => config_path()?,
    };
    let mut settings = Settings::load_or_init(&config_path)?;
    settings.debug |= cli.debug;
    if cli.manual {
        settings.auto_select_server = false;
    }
    init_tracing(settings.debug);
    debug!(config = %config_path.display(), "settings loaded");

    let history_path = history_path()?;
    let history = History::load(&history_path)?;

    let series_url = if cli.history {
        match history.select_entry()? {
            Some(entry) => entry.series_url,
            None => return Ok(()),
        }
    } else if let Some(url) = &cli.url {
        url.clone()
    } else {
        println!("No URL provided. Use `hianime-mpv <URL>` or `hianime-mpv --history`.");
        return Ok(());
    };

    let provider = HiAnimeClient::new()?;
    let series = provider.fetch_series(&series_url).await?;
    debug!(
        anime_id = %series.anime_id,
        anilist_id = ?series.anilist_id,
        mal_id = ?series.mal_id,
        "series loaded"
    );
    println!("\n{} ({})", series.display_name(), series.english_name);

    let subtitles = if !settings.subtitles_enabled {
        None
    } else if settings.has_jimaku_key() {
        Some(JimakuClient::new(settings.jimaku_api_key.clone())?)
    } else {
        warn!("subtitles are enabled but no Jimaku API key is configured");
        None
    };

    let tracking_script = match write_tracking_script() {
        Ok(path) => Some(path),
        Err(err) => {
            warn!("playback progress will not be tracked: {err:#}");
            None
        }
    };

    let mut session = Session {
        provider: &provider,
        resolver: MegacloudResolver::new(&provider)?,
        selector: ServerSelector::new(ServerDenylist::new(&settings.server_denylist)?),
        driver: PlayerDriver::from_settings(&settings)?,
        subtitles,
        tracking_script,
        cache: EpisodeCache::new(),
        history,
        history_path,
        translation: if cli.dub { Translation::Dub } else { Translation::Sub },
        server_choice: cli.server.clone(),
        settings,
    };

    let result = session.play_series(&series, cli.episode).await;
    if let Some(script) = &session.tracking_script {
        let _ = fs::remove_file(script);
    }
    result
}

struct Session<'a, P: AnimeProvider> {
    provider: &'a P,
    resolver: MegacloudResolver<'a, P>,
    selector: ServerSelector,
    driver: PlayerDriver,
    subtitles: Option<JimakuClient>,
    tracking_script: Option<PathBuf>,
    cache: EpisodeCache,
    history: History,
    history_path: PathBuf,
    translation: Translation,
    server_choice: Option<String>,
    settings: Settings,
}

impl<P: AnimeProvider> Session<'_, P> {
    async fn play_series(
        &mut self,
        series: &SeriesInfo,
        prefer_episode: Option<u32>,
    ) -> Result<()> {
        let episodes = self.episodes(series).await?;
        if episodes.is_empty() {
            println!("No episodes available for {}.", series.display_name());
            return Ok(());
        }
        println!("Found {} episodes.", episodes.len());

        let last_watched = self
            .history
            .find(&series.anime_id)
            .map(|entry| entry.last_episode)
            .filter(|&ep| ep > 0);
        if let Some(prev) = last_watched {
            println!("Last watched episode: {prev}.");
        }
        let fallback_episode = last_watched.unwrap_or(episodes[0].number);

        let (mut current_episode, mut skip_selection) = match prefer_episode {
            Some(ep) if episodes.iter().any(|e| e.number == ep) => (ep, true),
            Some(ep) => {
                println!("Episode {ep} does not exist. Showing episode list.");
                (fallback_episode, false)
            }
            None => (fallback_episode, false),
        };

        loop {
            let episodes = self.episodes(series).await?;
            let default_idx = episodes
                .iter()
                .position(|ep| ep.number == current_episode)
                .unwrap_or(0);

            let idx = if skip_selection {
                skip_selection = false;
                default_idx
            } else {
                let entry = self.history.find(&series.anime_id);
                let Some(i) = ui::select_episode(&episodes, entry, default_idx)? else {
                    println!("Exiting playback loop.");
                    return Ok(());
                };
                i
            };

            let chosen = episodes[idx].clone();
            let auto_advance = idx == default_idx;

            if !self.play_episode(series, &chosen).await? {
                current_episode = chosen.number;
                continue;
            }

            match (auto_advance, episodes.get(idx + 1)) {
                (true, Some(next)) => current_episode = next.number,
                (true, None) => {
                    println!("No further episodes found. Exiting.");
                    return Ok(());
                }
                (false, next) => current_episode = next.map_or(chosen.number, |ep| ep.number),
            }
        }
    }

    async fn episodes(&mut self, series: &SeriesInfo) -> Result<Vec<Episode>> {
        let provider = self.provider;
        let episodes = self
            .cache
            .get_or_populate(&series.anime_id, || provider.fetch_episodes(&series.anime_id))
            .await?;
        Ok(episodes.to_vec())
    }

    /// Returns whether playback actually started.
    async fn play_episode(&mut self, series: &SeriesInfo, episode: &Episode) -> Result<bool> {
        println!("\nFetching servers for episode {}...", episode.number);
        debug!(episode_id = episode.id, url = %episode.url, "episode selected");
        let mut servers = match self.provider.fetch_servers(episode.id).await {
            Ok(servers) => servers,
            Err(err) => {
                println!("Could not load servers: {err:#}");
                return Ok(false);
            }
        };
        servers.retain(|server| server.translation == self.translation);
        if servers.is_empty() {
            println!(
                "No {} servers for episode {}.",
                self.translation.label(),
                episode.number
            );
            return Ok(false);
        }

        self.selector.reset();
        let Some(mut mode) = self.initial_mode(&servers)? else {
            return Ok(false);
        };

        loop {
            let selection = match self
                .selector
                .select_and_resolve(&servers, mode, &self.resolver)
                .await
            {
                Ok(selection) => selection,
                Err(err) => {
                    println!("{err}");
                    if matches!(err, FallbackError::NoServers) {
                        return Ok(false);
                    }
                    match ui::prompt_server_choice(&servers)? {
                        Some(index) => {
                            mode = SelectionMode::Manual(index);
                            continue;
                        }
                        None => return Ok(false),
                    }
                }
            };

            info!(
                server = %selection.server.label(),
                url = %selection.manifest.url,
                "stream resolved"
            );
            if self.play_selection(series, episode, &selection.server, &selection.manifest).await? {
                return Ok(true);
            }

            mode = match mode {
                SelectionMode::Auto => {
                    debug!(
                        resume_index = self.selector.resume_index(),
                        "falling back to the next server"
                    );
                    SelectionMode::Auto
                }
                SelectionMode::Manual(_) => match ui::prompt_server_choice(&servers)? {
                    Some(index) => SelectionMode::Manual(index),
                    None => return Ok(false),
                },
            };
        }
    }

    fn initial_mode(&self, servers: &[ServerCandidate]) -> Result<Option<SelectionMode>> {
        if let Some(raw) = &self.server_choice {
            match parse_server_choice(raw, servers.len()) {
                Ok(index) => return Ok(Some(SelectionMode::Manual(index))),
                Err(err) => println!("--server {raw}: {err}"),
            }
        } else if self.settings.auto_select_server {
            return Ok(Some(SelectionMode::Auto));
        }
        Ok(ui::prompt_server_choice(servers)?.map(SelectionMode::Manual))
    }

    async fn play_selection(
        &mut self,
        series: &SeriesInfo,
        episode: &Episode,
        server: &ServerCandidate,
        manifest: &StreamManifest,
    ) -> Result<bool> {
        let resume = self.history.find(&series.anime_id).cloned();
        let request = PlaybackRequest {
            series,
            episode,
            server,
            manifest,
            resume: resume.as_ref(),
        };
        let args = build_player_args(
            &request,
            &self.settings,
            self.subtitles.as_ref(),
            self.tracking_script.as_deref(),
        )
        .await;

        println!("Playing: {}", request.display_title());
        let outcome = match self.driver.play(&args).await {
            Ok(outcome) => outcome,
            Err(err) => {
                println!("{err:#}");
                return Ok(false);
            }
        };
        if !outcome.started {
            match outcome.failure {
                Some(PlaybackFailure::StartupTimeout) => {
                    println!("{} did not start in time.", self.driver.program())
                }
                Some(PlaybackFailure::OpenFailed) => {
                    println!("Failed to stream. Potentially dead link.")
                }
                None => println!("Player exited before the stream started."),
            }
            return Ok(false);
        }

        let mut entry = self.history.entry_for(series);
        entry.record_playback(episode.number, &outcome);
        self.history.upsert(entry, self.settings.history_limit);
        save_history(&self.history, &self.history_path);
        Ok(true)
    }
}

fn save_history(history: &History, path: &Path) {
    if let Err(err) = history.save(path) {
        warn!("could not save history: {err:#}");
    }
}
