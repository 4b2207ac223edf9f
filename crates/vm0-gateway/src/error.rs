use thiserror::Error;

/// Construction-time gateway errors.
///
/// Runtime failures (registry reads, audit writes, DNS) are deliberately not
/// represented here: they are absorbed by the owning component with a log
/// line so a registry write-in-progress or a full disk can never take down
/// active flows.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid API URL {url:?}: {source}")]
    InvalidApiUrl {
        url: String,
        source: url::ParseError,
    },

    #[error("API URL {url:?} has no host")]
    ApiUrlMissingHost { url: String },
}
