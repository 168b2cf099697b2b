use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::str::FromStr;
use url::Url;

use super::FetchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Get,
  Post,
}

/// How the page issued the request. Only `Navigate` changes routing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestMode {
  Navigate,
  #[default]
  NoCors,
  Cors,
}

/// What the requested resource will be used for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Destination {
  #[default]
  Empty,
  Document,
  Script,
  Style,
  Image,
  Font,
  Manifest,
}

impl FromStr for Destination {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_lowercase().as_str() {
      "" | "empty" => Ok(Destination::Empty),
      "document" => Ok(Destination::Document),
      "script" => Ok(Destination::Script),
      "style" => Ok(Destination::Style),
      "image" => Ok(Destination::Image),
      "font" => Ok(Destination::Font),
      "manifest" => Ok(Destination::Manifest),
      other => Err(eyre!("Unknown request destination '{}'", other)),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheMode {
  #[default]
  Default,
  /// Revalidate with the server, never answer from an HTTP cache
  NoCache,
}

#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
  pub destination: Destination,
  pub cache: CacheMode,
  pub headers: Vec<(String, String)>,
  pub body: Option<Bytes>,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::Get,
      url,
      mode: RequestMode::default(),
      destination: Destination::default(),
      cache: CacheMode::default(),
      headers: Vec::new(),
      body: None,
    }
  }

  /// A top-level page load.
  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      destination: Destination::Document,
      ..Self::get(url)
    }
  }

  pub fn post_json<T: Serialize + ?Sized>(url: Url, body: &T) -> Result<Self> {
    let body = serde_json::to_vec(body)?;
    Ok(Self {
      method: Method::Post,
      headers: vec![("content-type".to_string(), "application/json".to_string())],
      body: Some(Bytes::from(body)),
      mode: RequestMode::Cors,
      ..Self::get(url)
    })
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn no_cache(mut self) -> Self {
    self.cache = CacheMode::NoCache;
    self
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }
}

/// How the response relates to the requesting origin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseType {
  /// Same-origin response
  #[default]
  Basic,
  /// Cross-origin response readable by the page
  Cors,
  /// Cross-origin response the page cannot inspect
  Opaque,
  /// Constructed locally rather than fetched
  Synthetic,
}

impl ResponseType {
  pub fn as_str(&self) -> &'static str {
    match self {
      ResponseType::Basic => "basic",
      ResponseType::Cors => "cors",
      ResponseType::Opaque => "opaque",
      ResponseType::Synthetic => "default",
    }
  }
}

impl FromStr for ResponseType {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "basic" => Ok(ResponseType::Basic),
      "cors" => Ok(ResponseType::Cors),
      "opaque" => Ok(ResponseType::Opaque),
      "default" => Ok(ResponseType::Synthetic),
      other => Err(eyre!("Unknown response type '{}'", other)),
    }
  }
}

/// A captured response. The body is reference counted, so `clone()` is the
/// cheap way to keep one copy for the cache and hand another to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Bytes,
  pub response_type: ResponseType,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
      response_type: ResponseType::Basic,
    }
  }

  pub fn synthetic(status: u16, content_type: &str, body: impl Into<Bytes>) -> Self {
    Self::new(status, body)
      .with_header("content-type", content_type)
      .with_type(ResponseType::Synthetic)
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_lowercase(), value.to_string()));
    self
  }

  pub fn with_type(mut self, response_type: ResponseType) -> Self {
    self.response_type = response_type;
    self
  }

  /// 200-299
  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn content_type(&self) -> Option<&str> {
    self.header("content-type")
  }

  pub fn json<T: DeserializeOwned>(&self) -> std::result::Result<T, FetchError> {
    serde_json::from_slice(&self.body).map_err(|e| FetchError::InvalidResponse(e.to_string()))
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}
