//! mpv argument assembly.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::chapters;
use crate::config::Settings;
use crate::history::HistoryEntry;
use crate::providers::{SubtitleProvider, SubtitleQuery};
use crate::types::{Episode, SeriesInfo, ServerCandidate, StreamManifest};

/// The embed host checks `Origin` against its own domain, not the stream CDN.
pub const MEGACLOUD_ORIGIN: &str = "https://megacloud.blog";
pub const YTDL_FORMAT_ARG: &str = "--ytdl-format=bestvideo+bestaudio/best";
pub const OSC_TITLE_ARG: &str = "--script-opts=osc-title=${title}";

/// Everything known about the episode that is about to play.
pub struct PlaybackRequest<'a> {
    pub series: &'a SeriesInfo,
    pub episode: &'a Episode,
    pub server: &'a ServerCandidate,
    pub manifest: &'a StreamManifest,
    pub resume: Option<&'a HistoryEntry>,
}

impl PlaybackRequest<'_> {
    pub fn display_title(&self) -> String {
        format!(
            "{} [Ep. {}] {} ({})",
            self.series.display_name(),
            self.episode.number,
            self.episode.display_title(),
            self.server.name
        )
    }
}

pub fn header_fields(manifest: &StreamManifest) -> String {
    format!(
        "--http-header-fields=Referer: {},User-Agent: {},Origin: {MEGACLOUD_ORIGIN}",
        manifest.headers.referer, manifest.headers.user_agent
    )
}

/// Builds the argument list in the order mpv should see it. `subtitles` is
/// only consulted when subtitle integration is enabled in `settings`.
pub async fn build_player_args<S: SubtitleProvider>(
    request: &PlaybackRequest<'_>,
    settings: &Settings,
    subtitles: Option<&S>,
    tracking_script: Option<&Path>,
) -> Vec<String> {
    let manifest = request.manifest;
    let episode_number = request.episode.number;

    let mut args = vec![
        manifest.url.clone(),
        YTDL_FORMAT_ARG.to_string(),
        header_fields(manifest),
        format!("--title={}", request.display_title()),
        OSC_TITLE_ARG.to_string(),
    ];

    if let Some(progress) = request
        .resume
        .and_then(|entry| entry.progress(episode_number))
        .filter(|progress| progress.position > 0.0)
    {
        debug!(position = progress.position, "resuming from history");
        args.push(format!("--start={}", progress.position));
    }

    if manifest.has_chapter_markers() {
        if let Some(path) = chapters::generate(manifest, request.resume, episode_number) {
            info!("adding intro/outro chapters");
            args.push(format!("--chapters-file={}", path.display()));
        }
    } else {
        debug!("intro and outro not found, skipping chapters");
    }

    if settings.subtitles_enabled {
        if let Some(provider) = subtitles {
            let query = SubtitleQuery::for_series(request.series);
            match provider.fetch_subtitles(&query, episode_number).await {
                Ok(paths) => {
                    info!(count = paths.len(), "external subtitles ready");
                    args.extend(paths.iter().map(|p| format!("--sub-file={}", p.display())));
                }
                Err(err) => warn!("skipping external subtitles: {err:#}"),
            }
        }
    }

    let language = settings.subtitle_language.as_deref().map(str::trim);
    args.extend(
        manifest
            .tracks
            .iter()
            .filter(|track| track.is_subtitle() && !track.file.is_empty())
            .filter(|track| {
                language.is_none_or(|lang| track.label.trim().eq_ignore_ascii_case(lang))
            })
            .map(|track| format!("--sub-file={}", track.file)),
    );

    if let Some(delay) = request
        .resume
        .map(|entry| entry.sub_delay)
        .filter(|&delay| delay != 0.0)
    {
        info!(delay, "applying subtitle delay from history");
        args.push(format!("--sub-delay={delay:.1}"));
    }

    if let Some(script) = tracking_script {
        args.push(format!("--script={}", script.display()));
    }

    args.extend(settings.player_args.iter().cloned());
    args
}
