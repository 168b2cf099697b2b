use color_eyre::Result;
use tracing::debug;
use url::Url;

use super::storage::CacheStorage;
use crate::net::Response;

/// Handle to one named partition, opened for the duration of an operation.
pub struct Partition<'a, S: CacheStorage + ?Sized> {
  storage: &'a S,
  name: &'a str,
}

/// Open a partition, creating it if needed.
pub fn open<'a, S: CacheStorage + ?Sized>(storage: &'a S, name: &'a str) -> Result<Partition<'a, S>> {
  storage.create_partition(name)?;
  Ok(Partition { storage, name })
}

impl<'a, S: CacheStorage + ?Sized> Partition<'a, S> {
  /// Cached response for this exact URL.
  pub fn match_url(&self, url: &Url) -> Result<Option<Response>> {
    let Some(entry) = self.storage.get(self.name, url.as_str())? else {
      return Ok(None);
    };
    debug!("Hit in {} for {} (stored {})", self.name, entry.url, entry.cached_at);
    Ok(Some(entry.response))
  }

  pub fn put(&self, url: &Url, response: &Response) -> Result<()> {
    self.storage.put(self.name, url.as_str(), response)
  }

  pub fn put_all(&self, entries: Vec<(Url, Response)>) -> Result<()> {
    let entries: Vec<(String, Response)> = entries
      .into_iter()
      .map(|(url, response)| (url.to_string(), response))
      .collect();
    self.storage.put_all(self.name, &entries)
  }
}
