//! Chart name resolution against catalog indexes
//!
//! Release manifests name apps logically (`coredns`), catalogs publish charts
//! under either that name or an `-app` suffixed one (`coredns-app`). The
//! resolver downloads the catalog's Helm `index.yaml` and picks whichever
//! variant carries the requested version.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::{Api, Client};
use reqwest::Client as HttpClient;
use serde::Deserialize;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, instrument};

#[cfg(test)]
use mockall::automock;

use crate::crd::AppCatalog;
use crate::error::{Error, Result};

use super::retry::{retry_with_backoff, RetryConfig};

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_INDEX_TTL: Duration = Duration::from_secs(600);

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChartNameResolver: Send + Sync {
    /// Concrete chart name for `app` at `version` in `catalog`, or
    /// `Error::NotFound` when the catalog has no such chart version.
    async fn chart_name(&self, catalog: &str, app: &str, version: &str) -> Result<String>;
}

/// Where a catalog's Helm repository lives
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CatalogLookup: Send + Sync {
    async fn storage_url(&self, catalog: &str) -> Result<String>;
}

/// [`CatalogLookup`] over cluster-scoped `AppCatalog` resources
#[derive(Clone)]
pub struct KubeCatalogLookup {
    api: Api<AppCatalog>,
}

impl KubeCatalogLookup {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl CatalogLookup for KubeCatalogLookup {
    async fn storage_url(&self, catalog: &str) -> Result<String> {
        let catalog_obj = self
            .api
            .get_opt(catalog)
            .await?
            .ok_or_else(|| Error::not_found("AppCatalog", catalog))?;
        Ok(catalog_obj.spec.storage.url)
    }
}

#[derive(Debug, Default, Deserialize)]
struct CatalogIndex {
    #[serde(default)]
    entries: BTreeMap<String, Vec<IndexEntry>>,
}

#[derive(Debug, Default, Deserialize)]
struct IndexEntry {
    #[serde(default)]
    name: String,
    #[serde(default)]
    version: String,
}

impl CatalogIndex {
    fn resolve(&self, app: &str, version: &str) -> Option<String> {
        let bare = app.strip_suffix("-app").unwrap_or(app);
        let suffixed = format!("{bare}-app");

        let (chart, entries) = [suffixed.as_str(), bare]
            .into_iter()
            .find_map(|candidate| {
                self.entries
                    .get(candidate)
                    .filter(|entries| !entries.is_empty())
                    .map(|entries| (candidate, entries))
            })?;

        entries
            .iter()
            .find(|e| e.name == chart && e.version == version)
            .map(|e| e.name.clone())
    }
}

struct CachedIndex {
    fetched_at: Instant,
    index: Arc<CatalogIndex>,
}

/// [`ChartNameResolver`] downloading catalog indexes over HTTP, with a
/// per-catalog TTL cache.
pub struct CatalogChartNames<L> {
    lookup: L,
    http: HttpClient,
    ttl: Duration,
    retry: RetryConfig,
    cache: RwLock<HashMap<String, CachedIndex>>,
}

impl<L: CatalogLookup> CatalogChartNames<L> {
    pub fn new(lookup: L) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("workload-apps-operator/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(Error::HttpError)?;
        Ok(Self {
            lookup,
            http,
            ttl: DEFAULT_INDEX_TTL,
            retry: RetryConfig::catalog_index(),
            cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn index(&self, catalog: &str) -> Result<Arc<CatalogIndex>> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(catalog) {
                if cached.fetched_at.elapsed() < self.ttl {
                    return Ok(cached.index.clone());
                }
            }
        }

        let url = self.lookup.storage_url(catalog).await?;
        let index = Arc::new(self.fetch_index(catalog, &url).await?);

        self.cache.write().await.insert(
            catalog.to_string(),
            CachedIndex {
                fetched_at: Instant::now(),
                index: index.clone(),
            },
        );
        Ok(index)
    }

    async fn fetch_index(&self, catalog: &str, url: &str) -> Result<CatalogIndex> {
        let index_url = format!("{}/index.yaml", url.trim_end_matches('/'));
        debug!("Fetching index of catalog {} from {}", catalog, index_url);

        let http = &self.http;
        let index_url = index_url.as_str();
        let body = retry_with_backoff(&self.retry, "fetch_catalog_index", || async move {
            let response = http.get(index_url).send().await?.error_for_status()?;
            response.bytes().await
        })
        .await?;

        Ok(serde_yaml::from_slice(&body)?)
    }
}

#[async_trait]
impl<L: CatalogLookup> ChartNameResolver for CatalogChartNames<L> {
    #[instrument(skip(self))]
    async fn chart_name(&self, catalog: &str, app: &str, version: &str) -> Result<String> {
        let index = self.index(catalog).await?;
        index.resolve(app, version).ok_or_else(|| {
            Error::not_found("chart", format!("{app}@{version} in catalog {catalog}"))
        })
    }
}
