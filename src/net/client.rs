use async_trait::async_trait;
use color_eyre::Result;
use reqwest::{header, Client};
use tracing::debug;
use url::Url;

use super::types::{CacheMode, Method, Request, RequestMode, Response, ResponseType};
use super::FetchError;

/// The network as seen by the worker.
///
/// Everything that leaves the process goes through this trait, which keeps the
/// cache policies and the sync queue testable without a server.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: Request) -> Result<Response, FetchError>;
}

/// reqwest-backed fetcher.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpFetcher {
  client: Client,
  origin: Url,
}

impl HttpFetcher {
  pub fn new(origin: Url, timeout: std::time::Duration) -> Result<Self> {
    let client = Client::builder().timeout(timeout).build()?;
    Ok(Self { client, origin })
  }

  fn response_type(&self, request: &Request, url: &Url) -> ResponseType {
    if url.origin() == self.origin.origin() {
      ResponseType::Basic
    } else if request.mode == RequestMode::NoCors {
      ResponseType::Opaque
    } else {
      ResponseType::Cors
    }
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: Request) -> Result<Response, FetchError> {
    debug!("{:?} {}", request.method, request.url);

    let mut builder = match request.method {
      Method::Get => self.client.get(request.url.clone()),
      Method::Post => self.client.post(request.url.clone()),
    };
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if request.cache == CacheMode::NoCache {
      builder = builder
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::PRAGMA, "no-cache");
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder.send().await.map_err(|e| {
      if e.is_connect() || e.is_timeout() {
        FetchError::Offline(e.to_string())
      } else {
        FetchError::Network(e)
      }
    })?;

    let status = response.status().as_u16();
    let final_url = response.url().clone();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = response.bytes().await?;

    Ok(Response {
      status,
      headers,
      body,
      response_type: self.response_type(&request, &final_url),
    })
  }
}
