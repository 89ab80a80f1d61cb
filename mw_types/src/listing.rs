use serde::Deserialize;

use crate::token::AccessToken;

/// Asking price on a listing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ListingPrice {
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub currency: String,
    /// Listing type, e.g. fixed vs negotiable.
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// Position of the item inside the seller's stash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct StashLocation {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SellerInfo {
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub character: String,
    #[serde(default)]
    pub whisper: String,
}

/// One fetched listing, ready for hand-off to the consumer. The core does
/// not retain these past the hand-off.
#[derive(Debug, Clone)]
pub struct FetchedListing {
    pub id: String,
    pub price: Option<ListingPrice>,
    pub location: StashLocation,
    pub seller: SellerInfo,
    pub access_token: AccessToken,
}

impl FetchedListing {
    /// True when the attached token still permits the downstream action.
    pub fn token_valid(&self, now: i64) -> bool {
        !self.access_token.is_expired(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_deserialize() {
        let price: ListingPrice = serde_json::from_str(r#"{"amount":2.5,"currency":"chaos","type":"fixed"}"#).unwrap();
        assert_eq!(price.amount, 2.5);
        assert_eq!(price.currency, "chaos");
        assert_eq!(price.kind, "fixed");
    }

    #[test]
    fn test_listing_token_validity() {
        let listing = FetchedListing {
            id: "abc".into(),
            price: None,
            location: StashLocation { x: 3, y: 7 },
            seller: SellerInfo::default(),
            access_token: AccessToken::parse("garbage"),
        };

        assert!(!listing.token_valid(0));
    }
}
