use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    /// The listed item is gone from the market; skip it, keep going.
    #[error("item no longer available")]
    ItemGone,

    /// The server rejected the query itself; skip, keep going.
    #[error("invalid query")]
    InvalidQuery,

    /// Hard 429; the quota guard has already waited out the penalty.
    #[error("rate limited, waited {0}s")]
    Throttled(u64),

    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("API error: {code} - {message}")]
    Api { code: u16, message: String },
}

impl FetchError {
    /// Per-item failures that must not abort the rest of a notification
    /// batch.
    pub fn is_skippable(&self) -> bool {
        matches!(self, FetchError::ItemGone | FetchError::InvalidQuery)
    }
}

pub type Result<T> = std::result::Result<T, FetchError>;
