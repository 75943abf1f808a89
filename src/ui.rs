use anyhow::Result;
use dialoguer::{Input, Select};

use crate::fallback::parse_server_choice;
use crate::history::{HistoryEntry, theme};
use crate::types::{Episode, ServerCandidate};

const LAST_WATCHED_MARKER: &str = "-->";

/// `mm:ss`, or `h:mm:ss` once past an hour.
pub fn pretty_duration(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes:02}:{secs:02}")
    }
}

pub fn episode_label(episode: &Episode, entry: Option<&HistoryEntry>) -> String {
    let marker = match entry {
        Some(entry) if entry.last_episode == episode.number => LAST_WATCHED_MARKER,
        _ => "   ",
    };
    let progress = entry
        .and_then(|entry| entry.progress(episode.number))
        .map(|p| {
            format!(
                "  {}/{}",
                pretty_duration(p.position),
                pretty_duration(p.duration)
            )
        })
        .unwrap_or_default();
    format!(
        "{marker} [{}] {}{progress}",
        episode.number,
        episode.display_title()
    )
}

pub fn server_labels(servers: &[ServerCandidate]) -> Vec<String> {
    servers
        .iter()
        .enumerate()
        .map(|(idx, server)| format!("[{}] {}", idx + 1, server.label()))
        .collect()
}

pub fn select_episode(
    episodes: &[Episode],
    entry: Option<&HistoryEntry>,
    default_idx: usize,
) -> Result<Option<usize>> {
    let labels: Vec<String> = episodes.iter().map(|ep| episode_label(ep, entry)).collect();
    let selection = Select::with_theme(&theme())
        .with_prompt("Episode to play (Enter to select, Esc to go back)")
        .items(&labels)
        .default(default_idx.min(labels.len().saturating_sub(1)))
        .max_length(20)
        .interact_opt()?;
    Ok(selection)
}

/// Asks for a server number until the answer is valid. `q` or an empty
/// answer cancels.
pub fn prompt_server_choice(servers: &[ServerCandidate]) -> Result<Option<usize>> {
    println!("\n--- Available Servers ---");
    for label in server_labels(servers) {
        println!(" {label}");
    }
    loop {
        let answer: String = Input::with_theme(&theme())
            .with_prompt("Server number (q to go back)")
            .allow_empty(true)
            .interact_text()?;
        let answer = answer.trim();
        if answer.is_empty() || answer.eq_ignore_ascii_case("q") {
            return Ok(None);
        }
        match parse_server_choice(answer, servers.len()) {
            Ok(index) => return Ok(Some(index)),
            Err(err) => println!("{err}"),
        }
    }
}
