//! Reqwest-backed implementations of the core client seams.
//!
//! One shared HTTP client is constructed at startup with an explicit bounded
//! timeout; every outbound call inherits it. No client keeps cross-request
//! state beyond its credentials.

use status_keeper_core::{NotificationError, ProviderError};
use std::time::Duration;

pub mod cirrus;
pub mod phabricator;
pub mod slack;
pub mod teamcity;
pub mod travis;

/// Bound on every outbound call.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the shared outbound HTTP client.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .expect("building the HTTP client cannot fail with a static configuration")
}

/// Reclassify a provider failure on a notification path.
///
/// Network failures and 5xx responses are worth a redelivery; anything the
/// provider rejected outright will be rejected again.
pub(crate) fn as_notification(service: &str, err: ProviderError) -> NotificationError {
    match &err {
        ProviderError::Request { .. } => NotificationError::Transient {
            service: service.to_string(),
            message: err.to_string(),
        },
        ProviderError::Api { status, .. } if *status >= 500 || *status == 429 => {
            NotificationError::Transient {
                service: service.to_string(),
                message: err.to_string(),
            }
        }
        _ => NotificationError::Permanent {
            service: service.to_string(),
            message: err.to_string(),
        },
    }
}
