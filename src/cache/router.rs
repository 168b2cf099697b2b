//! Request classification.

use crate::net::Request;

/// Which policy serves a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Network first, falling back to the data partition
  Api,
  /// Network first, falling back to the cached shell document
  Navigation,
  /// Cache first, filling the static partition on a miss
  Resource,
}

/// Classify a request. API matching wins over navigation, so a page load of an
/// API URL is still treated as data.
pub fn classify(request: &Request, api_prefixes: &[String]) -> Route {
  let url = request.url.as_str();
  if api_prefixes.iter().any(|prefix| url.contains(prefix.as_str())) {
    Route::Api
  } else if request.is_navigation() {
    Route::Navigation
  } else {
    Route::Resource
  }
}
