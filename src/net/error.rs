use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
  #[error("Network unavailable: {0}")]
  Offline(String),

  #[error("Network error: {0}")]
  Network(#[from] reqwest::Error),

  #[error("Unexpected status {status} from {url}")]
  Status { status: u16, url: String },

  #[error("Invalid response: {0}")]
  InvalidResponse(String),
}
