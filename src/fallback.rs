//! Server fallback: walk the episode's servers until one resolves.

use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use tracing::{info, warn};

use crate::error::{FallbackError, SelectionError};
use crate::resolver::StreamResolve;
use crate::types::{ServerCandidate, StreamManifest};

/// Server names that are skipped in auto mode.
#[derive(Debug, Clone, Default)]
pub struct ServerDenylist {
    patterns: Vec<Regex>,
}

impl ServerDenylist {
    pub fn new(patterns: &[String]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|pattern| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .with_context(|| format!("invalid server denylist pattern '{pattern}'"))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn is_denied(&self, server_name: &str) -> bool {
        let name = server_name.trim();
        self.patterns.iter().any(|re| re.is_match(name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    Auto,
    /// Zero-based index already validated by [`parse_server_choice`].
    Manual(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub index: usize,
    pub server: ServerCandidate,
    pub manifest: StreamManifest,
}

/// Fallback position for the current episode.
#[derive(Debug)]
pub struct ServerSelector {
    denylist: ServerDenylist,
    resume_index: usize,
}

impl ServerSelector {
    pub fn new(denylist: ServerDenylist) -> Self {
        Self {
            denylist,
            resume_index: 0,
        }
    }

    /// Start over from the first server; call when the episode changes.
    pub fn reset(&mut self) {
        self.resume_index = 0;
    }

    pub fn resume_index(&self) -> usize {
        self.resume_index
    }

    pub async fn select_and_resolve<R: StreamResolve>(
        &mut self,
        servers: &[ServerCandidate],
        mode: SelectionMode,
        resolver: &R,
    ) -> Result<Selection, FallbackError> {
        if servers.is_empty() {
            return Err(FallbackError::NoServers);
        }
        match mode {
            SelectionMode::Auto => self.select_auto(servers, resolver).await,
            SelectionMode::Manual(index) => select_manual(servers, index, resolver).await,
        }
    }

    async fn select_auto<R: StreamResolve>(
        &mut self,
        servers: &[ServerCandidate],
        resolver: &R,
    ) -> Result<Selection, FallbackError> {
        for (index, server) in servers.iter().enumerate().skip(self.resume_index) {
            if self.denylist.is_denied(&server.name) {
                info!(server = %server.name, "skipping denylisted server");
                continue;
            }

            info!(server = %server.label(), "trying server {}/{}", index + 1, servers.len());
            match resolver.resolve(server.id).await {
                Ok(manifest) => {
                    self.resume_index = index + 1;
                    return Ok(Selection {
                        index,
                        server: server.clone(),
                        manifest,
                    });
                }
                Err(err) => warn!(server = %server.name, "{err}"),
            }
        }

        self.resume_index = servers.len();
        Err(FallbackError::Exhausted)
    }
}

async fn select_manual<R: StreamResolve>(
    servers: &[ServerCandidate],
    index: usize,
    resolver: &R,
) -> Result<Selection, FallbackError> {
    let Some(server) = servers.get(index) else {
        return Err(FallbackError::Exhausted);
    };
    info!(server = %server.label(), "resolving selected server");
    match resolver.resolve(server.id).await {
        Ok(manifest) => Ok(Selection {
            index,
            server: server.clone(),
            manifest,
        }),
        Err(source) => Err(FallbackError::Resolve {
            name: server.name.clone(),
            source,
        }),
    }
}

/// Parses a 1-based server number typed by the user into an index.
pub fn parse_server_choice(input: &str, len: usize) -> Result<usize, SelectionError> {
    let trimmed = input.trim();
    let choice: usize = trimmed
        .parse()
        .map_err(|_| SelectionError::NotANumber(trimmed.to_string()))?;
    if choice == 0 || choice > len {
        return Err(SelectionError::OutOfRange { index: choice, len });
    }
    Ok(choice - 1)
}
