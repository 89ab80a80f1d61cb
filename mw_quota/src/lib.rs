pub mod guard;
pub mod headers;

pub use guard::QuotaGuard;
pub use guard::QuotaSnapshot;
pub use headers::RuleWindow;
pub use headers::StateWindow;

/// The scope every detail-fetch request is accounted against.
pub const ACCOUNT_SCOPE: &str = "account";

/// Wait applied on a 429 when the server sends no `Retry-After`.
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 60;
