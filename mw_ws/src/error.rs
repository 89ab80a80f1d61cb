use thiserror::Error;

#[derive(Error, Debug)]
pub enum ListenerError {
    /// Subscription or credential is incomplete; no retry is scheduled.
    #[error("missing {0}")]
    MissingConfig(&'static str),

    /// The listener's own retry cooldown has not elapsed.
    #[error("retry cooldown active")]
    CooldownActive,

    /// Another listener attempted a connection too recently.
    #[error("global connection spacing window active")]
    GlobalSpacing,

    /// Cancelled while waiting out the backoff delay.
    #[error("cancelled before connecting")]
    Cancelled,

    #[error("invalid subscribe url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("websocket handshake failed: {0}")]
    Handshake(#[from] tokio_tungstenite::tungstenite::Error),
}

impl ListenerError {
    /// Refusals that are part of normal pacing rather than failures.
    pub fn is_refusal(&self) -> bool {
        matches!(self, ListenerError::CooldownActive | ListenerError::GlobalSpacing | ListenerError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, ListenerError>;
