pub mod listing;
pub mod notification;
pub mod subscription;
pub mod token;

pub use listing::FetchedListing;
pub use listing::ListingPrice;
pub use listing::SellerInfo;
pub use listing::StashLocation;
pub use notification::NotificationBatch;
pub use notification::NotificationEnvelope;
pub use subscription::Subscription;
pub use subscription::SubscriptionKey;
pub use token::AccessToken;

/// Current Unix time in whole seconds.
pub fn unix_now() -> i64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}
