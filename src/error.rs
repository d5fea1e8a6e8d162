use thiserror::Error;

/// Failures surfaced by the aggregation core.
///
/// During a keyword fan-out these are absorbed into the failure counter;
/// id lookups and playback resolution return them to the caller as-is.
#[derive(Debug, Error)]
pub enum VodError {
    #[error("provider '{provider}' unreachable: {reason}")]
    ProviderUnreachable { provider: String, reason: String },

    #[error("provider '{provider}' returned an invalid response: {reason}")]
    ProviderResponseInvalid { provider: String, reason: String },

    #[error("unknown source key '{0}'")]
    ProviderNotFound(String),

    #[error("no results for vod {vod_id} on '{source_key}'")]
    NoResultsFound { source_key: String, vod_id: u64 },

    #[error("expected page structure not found: {0}")]
    ScrapeMarkerNotFound(String),

    #[error("episode index {index} out of range (episodes: {len})")]
    EpisodeIndexOutOfRange { index: usize, len: usize },

    #[error("episode list unavailable for vod {vod_id}: {reason}")]
    EpisodeListUnavailable { vod_id: u64, reason: String },

    #[error("domain not allowed: {0}")]
    DomainNotAllowed(String),
}

impl VodError {
    pub fn unreachable(provider: &str, reason: impl ToString) -> Self {
        Self::ProviderUnreachable {
            provider: provider.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid(provider: &str, reason: impl ToString) -> Self {
        Self::ProviderResponseInvalid {
            provider: provider.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether the failure means "nothing to show" rather than a broken upstream.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ProviderNotFound(_) | Self::NoResultsFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, VodError>;
