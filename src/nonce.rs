//! Handshake token recovery for the megacloud embed page.
//!
//! The embed player only hands out its source manifest when the request
//! carries a per-page nonce (`_k`). Current pages print it as one 48 character
//! token; older ones split it into three `x`/`y`/`z` script fields.

use std::sync::LazyLock;

use regex::Regex;

pub const NONCE_LEN: usize = 48;

static STANDALONE_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"\b[a-zA-Z0-9]{{{NONCE_LEN}}}\b")).expect("valid nonce regex")
});

static SPLIT_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"x:\s*"(\w+)",\s*y:\s*"(\w+)",\s*z:\s*"(\w+)""#).expect("valid nonce regex")
});

pub fn extract_nonce(markup: &str) -> Option<String> {
    if let Some(found) = STANDALONE_TOKEN.find(markup) {
        return Some(found.as_str().to_string());
    }

    let caps = SPLIT_TOKEN.captures(markup)?;
    Some(format!("{}{}{}", &caps[1], &caps[2], &caps[3]))
}
