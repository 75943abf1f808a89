use std::{io::Write, path::PathBuf};

use anyhow::{Context, Result};

/// Prints `::STATUS::pos/dur` every second and `::SUB_DELAY::value` whenever
/// the subtitle delay changes.
pub const TRACKING_SCRIPT: &str = r#"mp.add_periodic_timer(1, function()
    local pos = mp.get_property("time-pos")
    local dur = mp.get_property("duration")
    if pos ~= nil and dur ~= nil then
        print("::STATUS::" .. tostring(pos) .. "/" .. tostring(dur))
    end
end)

mp.observe_property("sub-delay", "number", function(_, value)
    if value then
        print(string.format("::SUB_DELAY::%f", value))
    end
end)
"#;

/// Persists the script to a temp file that outlives this process' handle,
/// since mpv loads it by path.
pub fn write_tracking_script() -> Result<PathBuf> {
    let mut file = tempfile::Builder::new()
        .prefix("hianime_track_")
        .suffix(".lua")
        .tempfile()
        .context("failed to create tracking script")?;
    file.write_all(TRACKING_SCRIPT.as_bytes())
        .context("failed to write tracking script")?;
    let (_, path) = file.keep().context("failed to persist tracking script")?;
    Ok(path)
}
