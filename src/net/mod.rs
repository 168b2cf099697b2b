//! Request/response model and the network seam the worker fetches through.

pub mod client;
pub mod error;
pub mod types;

pub use client::{Fetcher, HttpFetcher};
pub use error::FetchError;
pub use types::{Destination, Request, Response, ResponseType};
