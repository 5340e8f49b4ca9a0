//! Bounded concurrent image downloader.
//!
//! Every download is an independent task behind a shared semaphore. A failed
//! download only affects its own image.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};
use url::Url;
use uuid::Uuid;

use feeddigest_shared::{DigestError, Result, RewriteConfig};

use crate::images::local_file_name;

/// User-Agent string for image requests.
const USER_AGENT: &str = concat!("feeddigest/", env!("CARGO_PKG_VERSION"));

/// Downloads images into a directory, reusing files that already exist.
pub(crate) struct ImageFetcher {
    client: Client,
    dir: PathBuf,
    semaphore: Arc<Semaphore>,
}

impl ImageFetcher {
    pub fn new(config: &RewriteConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DigestError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            dir: config.images_dir.clone(),
            semaphore: Arc::new(Semaphore::new(config.concurrency.max(1))),
        })
    }

    /// Download every URL. Maps each URL to its local file name, or `None`
    /// if it could not be stored.
    #[instrument(skip_all, fields(count = urls.len()))]
    pub async fn fetch_all(&self, urls: &[Url]) -> HashMap<Url, Option<String>> {
        let mut results: HashMap<Url, Option<String>> = HashMap::new();
        if urls.is_empty() {
            return results;
        }

        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            warn!(dir = %self.dir.display(), error = %e, "cannot create images directory");
            for url in urls {
                results.insert(url.clone(), None);
            }
            return results;
        }

        // URLs that map to the same local name share a single download.
        let mut by_name: BTreeMap<String, Vec<Url>> = BTreeMap::new();
        for url in urls {
            match local_file_name(url) {
                Some(name) => by_name.entry(name).or_default().push(url.clone()),
                None => {
                    results.insert(url.clone(), None);
                }
            }
        }

        let mut handles = Vec::with_capacity(by_name.len());
        for (name, group) in by_name {
            let client = self.client.clone();
            let sem = self.semaphore.clone();
            let dir = self.dir.clone();
            let url = group[0].clone();

            let handle = tokio::spawn(async move {
                let Ok(_permit) = sem.acquire_owned().await else {
                    return Err(DigestError::Network("download pool closed".into()));
                };
                download(&client, &url, &dir, &name).await.map(|()| name)
            });
            handles.push((group, handle));
        }

        for (group, handle) in handles {
            let stored = match handle.await {
                Ok(Ok(name)) => Some(name),
                Ok(Err(e)) => {
                    warn!(url = %group[0], error = %e, "image download failed, dropping image");
                    None
                }
                Err(e) => {
                    warn!(url = %group[0], error = %e, "image download task failed");
                    None
                }
            };
            for url in group {
                results.insert(url, stored.clone());
            }
        }

        results
    }
}

/// Store `url` as `dir/name` unless that file already exists.
async fn download(client: &Client, url: &Url, dir: &Path, name: &str) -> Result<()> {
    let target = dir.join(name);
    if target.exists() {
        debug!(%url, file = name, "image already stored, skipping download");
        return Ok(());
    }

    let response = client
        .get(url.as_str())
        .send()
        .await
        .map_err(|e| DigestError::Network(format!("{url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(DigestError::Network(format!("{url}: HTTP {status}")));
    }

    if let Some(content_type) = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    {
        let content_type = content_type.to_ascii_lowercase();
        if !content_type.starts_with("image/")
            && !content_type.starts_with("application/octet-stream")
        {
            return Err(DigestError::Network(format!(
                "{url}: unexpected content type {content_type}"
            )));
        }
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| DigestError::Network(format!("{url}: {e}")))?;

    let temp = dir.join(format!(".{name}.{}.part", Uuid::now_v7()));
    let stored = async {
        tokio::fs::write(&temp, &bytes)
            .await
            .map_err(|e| DigestError::io(&temp, e))?;
        tokio::fs::rename(&temp, &target)
            .await
            .map_err(|e| DigestError::io(&target, e))
    }
    .await;
    if stored.is_err() {
        let _ = tokio::fs::remove_file(&temp).await;
    }
    stored?;

    debug!(%url, file = name, size = bytes.len(), "image stored");
    Ok(())
}
