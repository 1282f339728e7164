//! Listing record types shared by the extractor, store and exporter

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::UnknownSellerType;

/// Who is selling the vehicle, derived from the contact blocks on the listing page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SellerType {
    Dealer,
    Private,
}

impl SellerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SellerType::Dealer => "Dealer",
            SellerType::Private => "Private",
        }
    }
}

impl FromStr for SellerType {
    type Err = UnknownSellerType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "dealer" => Ok(SellerType::Dealer),
            "private" => Ok(SellerType::Private),
            _ => Err(UnknownSellerType(s.to_string())),
        }
    }
}

/// One vehicle listing, normalized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingRecord {
    pub listing_id: String,
    pub title: String,
    pub price: f64,
    pub year: i32,
    pub mileage: f64,
    pub engine_size: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub fuel_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transmission: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub seller_type: Option<SellerType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    pub url: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ListingRecord {
    /// Images as the JSON array stored in the `images` column, None when there are none
    pub fn images_json(&self) -> Option<String> {
        if self.images.is_empty() {
            None
        } else {
            serde_json::to_string(&self.images).ok()
        }
    }

    /// Inverse of [`ListingRecord::images_json`]. Unparseable text yields no images.
    pub fn images_from_json(json: Option<&str>) -> Vec<String> {
        json.filter(|s| !s.trim().is_empty())
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn record(listing_id: &str) -> ListingRecord {
        let now = Utc::now();
        ListingRecord {
            listing_id: listing_id.to_string(),
            title: "Toyota Camry, 2.5 L, 2018 il, 120 000 km".to_string(),
            price: 45000.0,
            year: 2018,
            mileage: 120000.0,
            engine_size: 2.5,
            body_type: Some("Sedan".to_string()),
            color: Some("Ağ".to_string()),
            fuel_type: "Gasoline".to_string(),
            transmission: Some("Avtomat".to_string()),
            location: Some("Bakı".to_string()),
            brand: Some("Toyota".to_string()),
            model: Some("Camry".to_string()),
            seller_type: Some(SellerType::Private),
            description: Some("Təcili satılır".to_string()),
            images: vec!["https://turbo.az/uploads/1.jpg".to_string()],
            url: format!("https://turbo.az/autos/{}", listing_id),
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seller_type_round_trip() {
        assert_eq!("Dealer".parse(), Ok(SellerType::Dealer));
        assert_eq!(" private ".parse(), Ok(SellerType::Private));
        assert_eq!(
            "unknown".parse::<SellerType>(),
            Err(UnknownSellerType("unknown".to_string()))
        );
        assert_eq!(SellerType::Private.as_str().parse(), Ok(SellerType::Private));
        assert_eq!(SellerType::Dealer.as_str(), "Dealer");
    }

    #[test]
    fn test_images_json_empty_is_none() {
        let mut record = fixtures::record("1");
        record.images.clear();
        assert_eq!(record.images_json(), None);
        assert!(ListingRecord::images_from_json(None).is_empty());
        assert!(ListingRecord::images_from_json(Some("not json")).is_empty());
    }

    #[test]
    fn test_images_json_keeps_order() {
        let mut record = fixtures::record("1");
        record.images = vec!["b.jpg".to_string(), "a.jpg".to_string()];
        let json = record.images_json().unwrap();
        assert_eq!(
            ListingRecord::images_from_json(Some(&json)),
            vec!["b.jpg".to_string(), "a.jpg".to_string()]
        );
    }
}
