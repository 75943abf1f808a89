use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow, bail};
use reqwest::Client;
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::{AnimeProvider, EmbedDescriptor, USER_AGENT};
use crate::types::{Episode, SeriesInfo, ServerCandidate, Translation};

pub const HIANIME_BASE_URL: &str = "https://hianime.to";

static FILM_NAME: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h2.film-name").expect("valid CSS selector"));
static FILM_NAME_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a").expect("valid CSS selector"));
static SYNC_DATA: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("#syncData").expect("valid CSS selector"));
static EPISODE_ITEM: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a.ep-item").expect("valid CSS selector"));
static EPISODE_NAME: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".ep-name").expect("valid CSS selector"));
static SERVER_ITEM: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".server-item").expect("valid CSS selector"));
static SERVER_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a").expect("valid CSS selector"));

pub struct HiAnimeClient {
    client: Client,
    base_url: String,
}

impl HiAnimeClient {
    pub fn new() -> Result<Self> {
        Self::with_base_url(HIANIME_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("failed to create HiAnime HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn fetch_ajax_html(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .header("Referer", &self.base_url)
            .header("X-Requested-With", "XMLHttpRequest")
            .header("Accept", "application/json")
            .send()
            .await
            .with_context(|| format!("request failed for {url}"))?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            bail!("HiAnime HTTP {status} for {url}");
        }
        let envelope: AjaxEnvelope = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse ajax response from {url}"))?;
        if !envelope.status {
            debug!(url, "ajax response reported status=false");
        }
        Ok(envelope.html)
    }
}

impl AnimeProvider for HiAnimeClient {
    async fn fetch_series(&self, series_url: &str) -> Result<SeriesInfo> {
        let response = self
            .client
            .get(series_url)
            .send()
            .await
            .with_context(|| format!("request failed for {series_url}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("HiAnime HTTP {status} for {series_url}");
        }
        let text = response.text().await?;
        parse_series_page(&text, series_url)
    }

    async fn fetch_episodes(&self, anime_id: &str) -> Result<Vec<Episode>> {
        let url = format!("{}/ajax/v2/episode/list/{anime_id}", self.base_url);
        let html = self.fetch_ajax_html(&url).await?;
        Ok(parse_episode_list(&html, &self.base_url))
    }

    async fn fetch_servers(&self, episode_id: u64) -> Result<Vec<ServerCandidate>> {
        let url = format!(
            "{}/ajax/v2/episode/servers?episodeId={episode_id}",
            self.base_url
        );
        let html = self.fetch_ajax_html(&url).await?;
        Ok(parse_server_list(&html))
    }

    async fn fetch_embed(&self, server_id: u64) -> Result<EmbedDescriptor> {
        let url = format!("{}/ajax/v2/episode/sources?id={server_id}", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Referer", &self.base_url)
            .header("X-Requested-With", "XMLHttpRequest")
            .send()
            .await
            .with_context(|| format!("request failed for {url}"))?
            .error_for_status()?
            .json::<EmbedResponse>()
            .await
            .with_context(|| format!("failed to parse embed descriptor from {url}"))?;
        Ok(EmbedDescriptor {
            kind: response.kind,
            link: response.link,
        })
    }
}

// --- Parsing ---

pub fn parse_series_page(html: &str, series_url: &str) -> Result<SeriesInfo> {
    let doc = Html::parse_document(html);

    let header = doc.select(&FILM_NAME).next();
    let english_name = header
        .map(|el| el.text().collect::<String>().trim().to_string())
        .unwrap_or_default();
    let japanese_name = header
        .and_then(|el| {
            el.value().attr("data-jname").or_else(|| {
                el.select(&FILM_NAME_LINK)
                    .next()
                    .and_then(|link| link.value().attr("data-jname"))
            })
        })
        .unwrap_or_default()
        .trim()
        .to_string();

    let raw_sync = doc
        .select(&SYNC_DATA)
        .next()
        .map(|el| el.text().collect::<String>())
        .ok_or_else(|| anyhow!("series page has no #syncData block"))?;
    let sync: Value =
        serde_json::from_str(raw_sync.trim()).context("failed to parse #syncData JSON")?;

    let anime_id = json_field(&sync, "anime_id")
        .ok_or_else(|| anyhow!("#syncData has no anime_id"))?;

    Ok(SeriesInfo {
        url: series_url.to_string(),
        anime_id,
        english_name,
        japanese_name,
        anilist_id: json_field(&sync, "anilist_id"),
        mal_id: json_field(&sync, "mal_id"),
    })
}

pub fn parse_episode_list(html: &str, base_url: &str) -> Vec<Episode> {
    let doc = Html::parse_fragment(html);
    let mut episodes = Vec::new();

    for (idx, item) in doc.select(&EPISODE_ITEM).enumerate() {
        let attrs = item.value();
        let Some(id) = attrs.attr("data-id").and_then(|v| v.trim().parse::<u64>().ok()) else {
            warn!(index = idx, "episode item without a numeric data-id, skipping");
            continue;
        };
        let number = attrs
            .attr("data-number")
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(idx as u32 + 1);

        let name = item.select(&EPISODE_NAME).next();
        let english_title = name
            .map(|el| el.text().collect::<String>().trim().to_string())
            .unwrap_or_default();
        let japanese_title = name
            .and_then(|el| el.value().attr("data-jname"))
            .unwrap_or_default()
            .trim()
            .to_string();

        let href = attrs.attr("href").unwrap_or_default();
        let url = if href.starts_with("http") {
            href.to_string()
        } else {
            format!("{base_url}{href}")
        };

        episodes.push(Episode {
            number,
            id,
            english_title,
            japanese_title,
            url,
        });
    }

    episodes
}

pub fn parse_server_list(html: &str) -> Vec<ServerCandidate> {
    let doc = Html::parse_fragment(html);
    let mut servers = Vec::new();

    for item in doc.select(&SERVER_ITEM) {
        let attrs = item.value();
        let Some(id) = attrs.attr("data-id").and_then(|v| v.trim().parse::<u64>().ok()) else {
            warn!("server item without a numeric data-id, skipping");
            continue;
        };
        let translation = Translation::from_server_type(attrs.attr("data-type").unwrap_or("sub"));
        let name = item
            .select(&SERVER_LINK)
            .next()
            .map(|el| el.text().collect::<String>())
            .unwrap_or_else(|| item.text().collect::<String>());

        servers.push(ServerCandidate {
            translation,
            name: name.trim().to_string(),
            id,
        });
    }

    servers
}

fn json_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// --- Wire Structs ---

#[derive(Debug, Deserialize)]
struct AjaxEnvelope {
    #[serde(default)]
    status: bool,
    #[serde(default)]
    html: String,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(rename = "type")]
    #[serde(default)]
    kind: String,
    #[serde(default)]
    link: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERIES_PAGE: &str = r#"<html><body>
        <div class="anisc-detail">
          <h2 class="film-name dynamic-name" data-jname="Planetes">Planetes</h2>
        </div>
        <script type="application/json" id="syncData">{"page":"anime","name":"Planetes","anime_id":"210","mal_id":"329","anilist_id":329,"series_url":"https://hianime.to/planetes-210"}</script>
      </body></html>"#;

    #[test]
    fn series_page_yields_names_and_ids() {
        let series = parse_series_page(SERIES_PAGE, "https://hianime.to/planetes-210")
            .expect("page should parse");
        assert_eq!(series.anime_id, "210");
        assert_eq!(series.english_name, "Planetes");
        assert_eq!(series.japanese_name, "Planetes");
        assert_eq!(series.anilist_id.as_deref(), Some("329"));
        assert_eq!(series.mal_id.as_deref(), Some("329"));
    }

    #[test]
    fn series_page_reads_jname_from_nested_link() {
        let html = r#"<h2 class="film-name"><a href="/x" data-jname="Shingeki no Kyojin">Attack on Titan</a></h2>
            <div id="syncData">{"anime_id":"112"}</div>"#;
        let series = parse_series_page(html, "u").expect("page should parse");
        assert_eq!(series.japanese_name, "Shingeki no Kyojin");
        assert_eq!(series.english_name, "Attack on Titan");
        assert_eq!(series.anilist_id, None);
    }

    #[test]
    fn series_page_without_sync_data_is_an_error() {
        assert!(parse_series_page("<h2 class=\"film-name\">X</h2>", "u").is_err());
    }

    #[test]
    fn episode_list_parses_items_and_unescapes_titles() {
        let html = r#"<div class="ss-list">
            <a class="ssl-item ep-item" href="/watch/planetes-210?ep=1" data-number="1" data-id="4501">
              <div class="ep-name e-dynamic-name" data-jname="Ky&#333;kai">Outside the Atmosphere &amp; Beyond</div>
            </a>
            <a class="ssl-item ep-item" href="/watch/planetes-210?ep=2" data-id="4502">
              <div class="ep-name" title="x">Like a Dream</div>
            </a>
            <a class="ssl-item ep-item" href="/watch/planetes-210?ep=3" data-id="oops"></a>
          </div>"#;
        let episodes = parse_episode_list(html, "https://hianime.to");
        assert_eq!(episodes.len(), 2);
        assert_eq!(episodes[0].number, 1);
        assert_eq!(episodes[0].id, 4501);
        assert_eq!(episodes[0].english_title, "Outside the Atmosphere & Beyond");
        assert_eq!(episodes[0].japanese_title, "Ky\u{14d}kai");
        assert_eq!(episodes[0].url, "https://hianime.to/watch/planetes-210?ep=1");
        assert_eq!(episodes[1].number, 2);
        assert_eq!(episodes[1].display_title(), "Like a Dream");
    }

    #[test]
    fn server_list_reads_type_id_and_name() {
        let html = r#"<div class="ps_-block">
            <div class="item server-item" data-type="sub" data-id="911" data-server-id="4"><a class="btn">HD-1</a></div>
            <div class="item server-item" data-type="dub" data-id="912" data-server-id="1"><a class="btn"> HD-2 </a></div>
            <div class="item server-item" data-type="raw" data-id="913"><a class="btn">HD-3</a></div>
          </div>"#;
        let servers = parse_server_list(html);
        assert_eq!(
            servers,
            vec![
                ServerCandidate {
                    translation: Translation::Sub,
                    name: "HD-1".into(),
                    id: 911,
                },
                ServerCandidate {
                    translation: Translation::Dub,
                    name: "HD-2".into(),
                    id: 912,
                },
                ServerCandidate {
                    translation: Translation::Sub,
                    name: "HD-3".into(),
                    id: 913,
                },
            ]
        );
    }
}
