pub mod client;
pub mod errors;
pub mod fetch;

pub use client::HttpClient;
pub use client::HttpClientConfig;
pub use errors::FetchError;
pub use errors::Result;
pub use fetch::FetchClient;
pub use fetch::MAX_IDS_PER_FETCH;
