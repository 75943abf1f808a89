use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow, bail};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{SubtitleProvider, SubtitleQuery, USER_AGENT};
use crate::cache::subtitle_cache_dir;

pub const JIMAKU_BASE_URL: &str = "https://jimaku.cc";
const SUPPORTED_EXTENSIONS: [&str; 2] = ["srt", "ass"];

pub struct JimakuClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    cache_base: Option<PathBuf>,
}

impl JimakuClient {
    pub fn new(api_key: Option<String>) -> Result<Self> {
        Self::with_base_url(JIMAKU_BASE_URL, api_key, None)
    }

    /// `cache_base` replaces the platform cache directory.
    pub fn with_base_url(
        base_url: &str,
        api_key: Option<String>,
        cache_base: Option<PathBuf>,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("failed to create Jimaku HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            cache_base,
        })
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| anyhow!("no Jimaku API key configured"))
    }

    async fn search(&self, query: &SubtitleQuery) -> Result<SearchEntry> {
        let url = format!("{}/api/entries/search", self.base_url);
        let mut params = vec![("anime", "true")];
        match query {
            SubtitleQuery::Anilist(id) => params.push(("anilist_id", id.as_str())),
            SubtitleQuery::Title(title) => {
                debug!("no Anilist id, searching Jimaku by title");
                params.push(("query", title.as_str()));
            }
        }

        let response = self
            .client
            .get(&url)
            .header("Authorization", self.api_key()?)
            .query(&params)
            .send()
            .await
            .with_context(|| format!("request failed for {url}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("Jimaku search returned HTTP {status}");
        }
        let entries: Vec<SearchEntry> = response
            .json()
            .await
            .context("failed to parse Jimaku search results")?;
        entries
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no Jimaku entry matches {query:?}"))
    }

    async fn list_files(&self, entry_id: i64, episode: u32) -> Result<Vec<FileEntry>> {
        let url = format!("{}/api/entries/{entry_id}/files", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", self.api_key()?)
            .query(&[("episode", episode)])
            .send()
            .await
            .with_context(|| format!("request failed for {url}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("Jimaku file listing returned HTTP {status}");
        }
        response
            .json()
            .await
            .context("failed to parse Jimaku file list")
    }

    async fn download(&self, url: &str, file: &Path) -> Result<()> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("request failed for {url}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("HTTP {status}");
        }
        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("failed to read bytes for {url}"))?;
        fs::write(file, bytes.as_ref())
            .with_context(|| format!("failed to write subtitle {}", file.display()))?;
        Ok(())
    }
}

impl SubtitleProvider for JimakuClient {
    async fn fetch_subtitles(&self, query: &SubtitleQuery, episode: u32) -> Result<Vec<PathBuf>> {
        self.api_key()?;
        info!("querying Jimaku for subtitles");

        let entry = self.search(query).await?;
        debug!(entry_id = entry.id, name = %entry.name, "Jimaku entry found");
        let files = self.list_files(entry.id, episode).await?;

        let series_dir = subtitle_cache_dir(&entry.name, self.cache_base.as_deref())?;
        fs::create_dir_all(&series_dir)
            .with_context(|| format!("failed to create {}", series_dir.display()))?;

        let mut paths = Vec::new();
        for file in &files {
            if !is_supported_subtitle(&file.url) {
                debug!(url = %file.url, "skipping unsupported subtitle format");
                continue;
            }
            let path = series_dir.join(decoded_file_name(&file.url));
            if path.exists() {
                debug!(path = %path.display(), "subtitle already cached");
                paths.push(path);
                continue;
            }
            match self.download(&file.url, &path).await {
                Ok(()) => {
                    info!(file = %path.display(), "downloaded subtitle");
                    paths.push(path);
                }
                Err(err) => warn!(url = %file.url, "failed to download subtitle: {err:#}"),
            }
        }

        if paths.is_empty() {
            bail!("no usable subtitles for episode {episode}");
        }
        Ok(paths)
    }
}

/// Archives are not unpacked; only plain `.srt`/`.ass` files are used.
pub fn is_supported_subtitle(url: &str) -> bool {
    let name = raw_file_name(url);
    name.rsplit_once('.')
        .is_some_and(|(_, ext)| SUPPORTED_EXTENSIONS.iter().any(|s| ext.eq_ignore_ascii_case(s)))
}

/// Last path segment of the URL, percent-decoded, without trailing dots.
pub fn decoded_file_name(url: &str) -> String {
    let raw = raw_file_name(url);
    let decoded = urlencoding::decode(raw)
        .map(|name| name.into_owned())
        .unwrap_or_else(|_| raw.to_string());
    let name: String = decoded
        .chars()
        .map(|ch| if matches!(ch, '/' | '\\') || ch.is_control() { '_' } else { ch })
        .collect();
    let name = name.trim_end_matches('.').trim();
    if name.is_empty() {
        String::from("subtitle")
    } else {
        name.to_string()
    }
}

fn raw_file_name(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or(path)
}

// --- Wire Structs ---

#[derive(Debug, Deserialize)]
struct SearchEntry {
    id: i64,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct FileEntry {
    url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::LocalServer;

    #[test]
    fn only_plain_subtitle_files_are_supported() {
        assert!(is_supported_subtitle("https://jimaku.cc/entry/1/download/ep01.srt"));
        assert!(is_supported_subtitle("https://jimaku.cc/entry/1/download/EP01.ASS?dl=1"));
        assert!(!is_supported_subtitle("https://jimaku.cc/entry/1/download/season.zip"));
        assert!(!is_supported_subtitle("https://jimaku.cc/entry/1/download/noext"));
    }

    #[test]
    fn file_names_are_percent_decoded() {
        assert_eq!(
            decoded_file_name("https://jimaku.cc/d/%E3%83%97%E3%83%A9%E3%83%8D%E3%83%86%E3%82%B9%2001.ass"),
            "プラネテス 01.ass"
        );
        assert_eq!(decoded_file_name("https://jimaku.cc/d/a%2Fb.srt"), "a_b.srt");
        assert_eq!(decoded_file_name("https://jimaku.cc/d/bad%ZZname.srt"), "bad%ZZname.srt");
    }

    #[tokio::test]
    async fn missing_key_is_an_error_without_requests() {
        let client = JimakuClient::new(None).expect("client");
        let result = client
            .fetch_subtitles(&SubtitleQuery::Anilist(String::from("329")), 1)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn downloads_supported_files_into_series_cache() {
        let files_host = LocalServer::start(|target| {
            if target == "/files/ep01.srt" {
                (200, b"1\n00:00:01,000 --> 00:00:02,000\nhello\n".to_vec())
            } else {
                (404, Vec::new())
            }
        });
        let base = files_host.base_url().to_string();
        let listing = format!(
            r#"[{{"name":"ep01.srt","url":"{base}files/ep01.srt","size":40}},
                {{"name":"all.zip","url":"{base}files/all.zip","size":900}},
                {{"name":"ep01.ass","url":"{base}files/missing.ass","size":50}}]"#
        );
        let api = LocalServer::start(move |target| {
            if target.starts_with("/api/entries/search") {
                (200, br#"[{"id":77,"anilist_id":329,"name":"Planetes"}]"#.to_vec())
            } else {
                (200, listing.clone().into_bytes())
            }
        });

        let cache = tempfile::tempdir().expect("tempdir");
        let client = JimakuClient::with_base_url(
            api.base_url(),
            Some(String::from("secret-key")),
            Some(cache.path().to_path_buf()),
        )
        .expect("client");
        let query = SubtitleQuery::Anilist(String::from("329"));

        let paths = client.fetch_subtitles(&query, 1).await.expect("subtitles should download");
        let expected = cache
            .path()
            .join("hianime-mpv")
            .join("subtitles")
            .join("Planetes")
            .join("ep01.srt");
        assert_eq!(paths, vec![expected.clone()]);
        assert!(fs::read_to_string(&expected).expect("subtitle").contains("hello"));
        assert_eq!(files_host.targets(), vec!["/files/ep01.srt", "/files/missing.ass"]);

        let requests = api.requests();
        assert_eq!(requests[0].target, "/api/entries/search?anime=true&anilist_id=329");
        assert_eq!(requests[0].header("Authorization"), Some("secret-key"));
        assert_eq!(requests[1].target, "/api/entries/77/files?episode=1");

        let again = client.fetch_subtitles(&query, 1).await.expect("cached subtitles");
        assert_eq!(again, vec![expected]);
        assert_eq!(
            files_host.targets(),
            vec!["/files/ep01.srt", "/files/missing.ass", "/files/missing.ass"]
        );
    }

    #[tokio::test]
    async fn title_query_is_used_without_anilist_id() {
        let listing = LocalServer::start(|target| {
            if target.starts_with("/api/entries/search") {
                (200, b"[]".to_vec())
            } else {
                (404, Vec::new())
            }
        });
        let client = JimakuClient::with_base_url(listing.base_url(), Some(String::from("k")), None)
            .expect("client");
        let result = client
            .fetch_subtitles(&SubtitleQuery::Title(String::from("Planetes")), 2)
            .await;
        assert!(result.is_err());
        assert_eq!(
            listing.targets(),
            vec!["/api/entries/search?anime=true&query=Planetes".to_string()]
        );
    }
}
