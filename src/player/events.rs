//! Classification of mpv stdout lines.

const VIDEO_TRACK_MARKER: &str = "(+) Video --vid=";
const H264_MARKER: &str = "h264";
const OPEN_FAILED_MARKERS: [&str; 2] = ["Opening failed", "HTTP error"];
pub const STATUS_MARKER: &str = "::STATUS::";
pub const SUB_DELAY_MARKER: &str = "::SUB_DELAY::";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayerEvent {
    VideoStarted,
    OpenFailed,
    Status { position: f64, duration: f64 },
    SubDelay(f64),
    Unrecognized,
}

impl PlayerEvent {
    /// Checked in a fixed order, so a line carrying several markers decodes
    /// to the first one that applies.
    pub fn decode(line: &str) -> Self {
        if line.contains(VIDEO_TRACK_MARKER) || line.contains(H264_MARKER) {
            return PlayerEvent::VideoStarted;
        }
        if OPEN_FAILED_MARKERS.iter().any(|marker| line.contains(marker)) {
            return PlayerEvent::OpenFailed;
        }
        if let Some((_, rest)) = line.split_once(STATUS_MARKER) {
            return parse_status(rest).unwrap_or(PlayerEvent::Unrecognized);
        }
        if let Some((_, rest)) = line.split_once(SUB_DELAY_MARKER) {
            return rest
                .trim()
                .parse()
                .map(PlayerEvent::SubDelay)
                .unwrap_or(PlayerEvent::Unrecognized);
        }
        PlayerEvent::Unrecognized
    }
}

fn parse_status(rest: &str) -> Option<PlayerEvent> {
    let (position, duration) = rest.split_once('/')?;
    Some(PlayerEvent::Status {
        position: position.trim().parse().ok()?,
        duration: duration.trim().parse().ok()?,
    })
}
