use crate::config::DirectoryConfig;
use crate::models::{Station, StationDraft};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures_util::future::join_all;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const MAX_BODY_BYTES: usize = 1_000_000;

/// Result of a directory search as the results panel sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    /// Blank query; nothing was sent and any shown results should clear.
    Skipped,
    Results(Vec<Station>),
    Failed(String),
}

#[async_trait]
pub trait StationDirectory: Send + Sync {
    async fn search(&self, query: &str) -> SearchOutcome;

    /// Resolves compact station ids to full records. Ids that fail to
    /// resolve are left out.
    async fn fetch_by_ids(&self, ids: &[String]) -> Vec<Station>;
}

#[derive(Debug, Clone)]
pub struct RadioBrowserClient {
    http: reqwest::Client,
    base_url: String,
    limit: u32,
}

impl RadioBrowserClient {
    pub fn new(config: &DirectoryConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent).context("Invalid User-Agent header")?,
        );
        let http = reqwest::ClientBuilder::new()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(15))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            limit: config.result_limit,
        })
    }

    fn search_url(&self, query: &str) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/json/stations/search", self.base_url))
            .context("Invalid Radio Browser base URL")?;
        url.query_pairs_mut()
            .append_pair("name", query)
            .append_pair("limit", &self.limit.to_string())
            .append_pair("hidebroken", "true");
        Ok(url)
    }

    fn uuid_url(&self, id: &str) -> String {
        format!(
            "{}/json/stations/byuuid/{}",
            self.base_url,
            urlencoding::encode(id)
        )
    }

    pub async fn search_stations(&self, query: &str) -> Result<Vec<Station>> {
        let url = self.search_url(query)?;
        debug!(%url, "searching directory");
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .context("Station search failed")?
            .error_for_status()
            .context("Station search failed")?;
        let bytes = read_limited(resp, MAX_BODY_BYTES).await?;
        let stations = parse_stations(&bytes).context("Invalid stations search response")?;
        debug!(count = stations.len(), "directory search finished");
        Ok(stations)
    }

    pub async fn station_by_uuid(&self, id: &str) -> Result<Option<Station>> {
        let id = id.trim();
        if id.is_empty() {
            return Err(anyhow!("Missing station UUID"));
        }
        let resp = self
            .http
            .get(self.uuid_url(id))
            .send()
            .await
            .with_context(|| format!("Lookup of station {id} failed"))?
            .error_for_status()
            .with_context(|| format!("Lookup of station {id} failed"))?;
        let bytes = read_limited(resp, 64 * 1024).await?;
        let mut stations = parse_stations(&bytes).context("Invalid byuuid response")?;
        Ok(if stations.is_empty() {
            None
        } else {
            Some(stations.swap_remove(0))
        })
    }
}

#[async_trait]
impl StationDirectory for RadioBrowserClient {
    async fn search(&self, query: &str) -> SearchOutcome {
        let query = query.trim();
        if query.is_empty() {
            return SearchOutcome::Skipped;
        }
        match self.search_stations(query).await {
            Ok(stations) => SearchOutcome::Results(stations),
            Err(e) => {
                warn!(query, error = ?e, "station search failed");
                SearchOutcome::Failed("Error searching stations. Please try again.".to_string())
            }
        }
    }

    async fn fetch_by_ids(&self, ids: &[String]) -> Vec<Station> {
        let lookups = ids.iter().map(|id| async move {
            match self.station_by_uuid(id).await {
                Ok(Some(st)) => Some(st),
                Ok(None) => {
                    warn!(id = %id, "shared station not found in directory");
                    None
                }
                Err(e) => {
                    warn!(id = %id, error = ?e, "skipping unresolved shared station");
                    None
                }
            }
        });
        join_all(lookups).await.into_iter().flatten().collect()
    }
}

/// Station records with no usable url are dropped.
fn parse_stations(bytes: &[u8]) -> Result<Vec<Station>> {
    let drafts: Vec<StationDraft> = serde_json::from_slice(bytes)?;
    Ok(drafts.into_iter().filter_map(Station::normalize).collect())
}

async fn read_limited(resp: reqwest::Response, limit: usize) -> Result<Vec<u8>> {
    if let Some(len) = resp.content_length() {
        if len as usize > limit {
            return Err(anyhow!("HTTP response too large ({len} bytes)"));
        }
    }

    let mut data: Vec<u8> = Vec::new();
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("HTTP body read error")?;
        if data.len().saturating_add(chunk.len()) > limit {
            return Err(anyhow!("HTTP response exceeded size limit"));
        }
        data.extend_from_slice(&chunk);
    }
    Ok(data)
}
