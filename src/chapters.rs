//! FFMETADATA chapter files built from intro/outro markers.

use std::{fmt::Write as _, io::Write, path::PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::history::HistoryEntry;
use crate::types::{StreamManifest, TimeInterval};

/// End of the last chapter when the episode length is unknown.
pub const OPEN_END: i64 = 9_999_999;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChapterBlock {
    pub start: i64,
    pub end: i64,
    pub title: &'static str,
}

impl ChapterBlock {
    const fn new(start: i64, end: i64, title: &'static str) -> Self {
        Self { start, end, title }
    }
}

pub fn chapter_blocks(
    intro: TimeInterval,
    outro: TimeInterval,
    known_duration: Option<f64>,
) -> Vec<ChapterBlock> {
    let has_intro = intro.is_intro_present();
    let has_outro = outro.is_outro_present();
    if !has_intro && !has_outro {
        return Vec::new();
    }

    let mut blocks = Vec::with_capacity(5);
    let intro_end = if has_intro { intro.end } else { 0 };

    if has_intro {
        if intro.start > 0 {
            blocks.push(ChapterBlock::new(0, intro.start, "Part A"));
        }
        blocks.push(ChapterBlock::new(intro.start.max(0), intro.end, "Intro"));
    }

    let tail_start = if has_outro {
        blocks.push(ChapterBlock::new(intro_end, outro.start, "Part B"));
        blocks.push(ChapterBlock::new(outro.start, outro.end, "Outro"));
        outro.end
    } else {
        intro_end
    };

    let tail_end = known_duration
        .filter(|d| d.is_finite())
        .map(|d| d.ceil() as i64)
        .filter(|&d| d > tail_start)
        .unwrap_or(OPEN_END);
    blocks.push(ChapterBlock::new(tail_start, tail_end, "Part C"));

    blocks
}

pub fn render_ffmetadata(blocks: &[ChapterBlock]) -> String {
    let mut out = String::from(";FFMETADATA1\n");
    for block in blocks {
        let _ = write!(
            out,
            "[CHAPTER]\nTIMEBASE=1/1\nSTART={}\nEND={}\ntitle={}\n\n",
            block.start, block.end, block.title
        );
    }
    out
}

fn write_chapter_file(contents: &str) -> Result<PathBuf> {
    let mut file = tempfile::Builder::new()
        .prefix("hianime_chapters_")
        .suffix(".txt")
        .tempfile()
        .context("failed to create chapter file")?;
    file.write_all(contents.as_bytes())
        .context("failed to write chapter file")?;
    let (_, path) = file.keep().context("failed to persist chapter file")?;
    Ok(path)
}

/// Writes the episode's chapter file, or `None` when there are no markers or
/// the file could not be written.
pub fn generate(
    manifest: &StreamManifest,
    resume: Option<&HistoryEntry>,
    episode: u32,
) -> Option<PathBuf> {
    let known_duration = resume
        .and_then(|entry| entry.progress(episode))
        .map(|progress| progress.duration)
        .filter(|&duration| duration > 0.0);

    let blocks = chapter_blocks(manifest.intro, manifest.outro, known_duration);
    if blocks.is_empty() {
        debug!("no intro/outro markers, skipping chapters");
        return None;
    }

    match write_chapter_file(&render_ffmetadata(&blocks)) {
        Ok(path) => {
            debug!(path = %path.display(), chapters = blocks.len(), "chapter file written");
            Some(path)
        }
        Err(err) => {
            warn!("{err:#}");
            None
        }
    }
}
