use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use super::partition;
use super::router::{classify, Route};
use super::storage::CacheStorage;
use crate::config::Config;
use crate::net::types::Method;
use crate::net::{Destination, FetchError, Fetcher, Request, Response, ResponseType};

/// Served in place of an image that is neither cached nor reachable.
pub const OFFLINE_IMAGE_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="200" height="200" viewBox="0 0 200 200"><rect width="200" height="200" fill="#f3f4f6"/><text x="100" y="100" text-anchor="middle" dy=".3em" fill="#6b7280">Offline</text></svg>"##;

/// Versioned names of the two partitions owned by the current release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionNames {
  pub static_name: String,
  pub data_name: String,
}

impl PartitionNames {
  pub fn contains(&self, name: &str) -> bool {
    name == self.static_name || name == self.data_name
  }
}

/// Intercepts requests and answers each one from the network, a partition,
/// or a local fallback depending on its route.
pub struct ResourceCache<S: CacheStorage, F: Fetcher> {
  storage: Arc<S>,
  fetcher: Arc<F>,
  names: PartitionNames,
  api_prefixes: Vec<String>,
  shell_document: Url,
}

impl<S: CacheStorage, F: Fetcher> ResourceCache<S, F> {
  pub fn new(storage: Arc<S>, fetcher: Arc<F>, config: &Config) -> Result<Self> {
    Ok(Self {
      storage,
      fetcher,
      names: PartitionNames {
        static_name: config.caches.static_name.clone(),
        data_name: config.caches.data_name.clone(),
      },
      api_prefixes: config.caches.api_prefixes.clone(),
      shell_document: config.resolve(&config.caches.shell_document)?,
    })
  }

  pub fn names(&self) -> &PartitionNames {
    &self.names
  }

  pub async fn handle(&self, request: Request) -> Result<Response, FetchError> {
    match classify(&request, &self.api_prefixes) {
      Route::Api => self.handle_api(request).await,
      Route::Navigation => self.handle_navigation(request).await,
      Route::Resource => self.handle_resource(request).await,
    }
  }

  /// Network first; successful responses refresh the data partition, failures
  /// fall back to whatever was last stored for this exact URL.
  async fn handle_api(&self, request: Request) -> Result<Response, FetchError> {
    let url = request.url.clone();
    let cacheable = request.method == Method::Get;

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if cacheable && response.status == 200 {
          self.store(&self.names.data_name, &url, &response);
        }
        Ok(response)
      }
      Err(err) => match self.lookup(&self.names.data_name, &url) {
        Some(cached) => {
          debug!("Serving cached API response for {}", url);
          Ok(cached)
        }
        None => Err(err),
      },
    }
  }

  async fn handle_navigation(&self, request: Request) -> Result<Response, FetchError> {
    match self.fetcher.fetch(request).await {
      Ok(response) => Ok(response),
      Err(err) => match self.lookup(&self.names.static_name, &self.shell_document) {
        Some(shell) => {
          debug!("Offline navigation, serving {}", self.shell_document);
          Ok(shell)
        }
        None => Err(err),
      },
    }
  }

  /// Cache first. Only same-origin 200 responses to GETs are kept; other
  /// methods never touch the partition.
  async fn handle_resource(&self, request: Request) -> Result<Response, FetchError> {
    let cacheable = request.method == Method::Get;
    if cacheable {
      if let Some(cached) = self.lookup(&self.names.static_name, &request.url) {
        return Ok(cached);
      }
    }

    let url = request.url.clone();
    let destination = request.destination;

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if cacheable && response.status == 200 && response.response_type == ResponseType::Basic {
          self.store(&self.names.static_name, &url, &response);
        }
        Ok(response)
      }
      Err(err) if destination == Destination::Image => {
        debug!("Offline image fallback for {}: {}", url, err);
        Ok(Response::synthetic(200, "image/svg+xml", OFFLINE_IMAGE_SVG))
      }
      Err(err) => Err(err),
    }
  }

  /// A storage failure on the read path counts as a miss.
  fn lookup(&self, partition_name: &str, url: &Url) -> Option<Response> {
    let found = partition::open(self.storage.as_ref(), partition_name)
      .and_then(|partition| partition.match_url(url));
    match found {
      Ok(hit) => hit,
      Err(e) => {
        warn!("Cache lookup for {} in {} failed: {}", url, partition_name, e);
        None
      }
    }
  }

  /// Write-path failures are logged; the caller still gets its response.
  fn store(&self, partition_name: &str, url: &Url, response: &Response) {
    let stored = partition::open(self.storage.as_ref(), partition_name)
      .and_then(|partition| partition.put(url, response));
    if let Err(e) = stored {
      warn!("Failed to cache {} in {}: {}", url, partition_name, e);
    }
  }
}
