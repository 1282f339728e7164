//! Listing page to [`ListingRecord`]
//!
//! Every derived field is parsed on its own and falls back to a zero or
//! default value; only a missing title or an empty property table rejects
//! the whole listing.

use chrono::Utc;
use std::collections::BTreeMap;
use tracing::debug;

use crate::config::{FuelKeyword, ScraperConfig};
use crate::dom::{DocumentQuery, Role};
use crate::error::ExtractError;
use crate::types::{ListingRecord, SellerType};

/// Field name (after label translation) to raw text, for one listing
pub type RawProperties = BTreeMap<String, String>;

const MILEAGE_UNITS: &[&str] = &["km", "mi"];

/// Digits of the price text; "45 000 ₼" -> 45000
pub fn parse_price(text: Option<&str>) -> f64 {
    let digits: String = text
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();
    digits.parse().unwrap_or(0.0)
}

/// Engine volume from "2.0 L/245 a.g./Benzin" -> 2.0
pub fn parse_engine_size(text: Option<&str>) -> f64 {
    let Some(text) = text else {
        return 0.0;
    };
    let volume = text.split('/').next().unwrap_or_default();
    let cleaned: String = volume
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    cleaned.parse().unwrap_or(0.0)
}

/// "120 000 km" -> 120000.0
pub fn parse_mileage(text: Option<&str>) -> f64 {
    let Some(text) = text else {
        return 0.0;
    };
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    let number = MILEAGE_UNITS
        .iter()
        .find_map(|unit| {
            let split = compact.len().checked_sub(unit.len())?;
            let suffix = compact.get(split..)?;
            suffix.eq_ignore_ascii_case(unit).then(|| &compact[..split])
        })
        .unwrap_or(compact.as_str());
    number.parse().unwrap_or(0.0)
}

pub fn parse_year(text: Option<&str>) -> i32 {
    text.and_then(|t| t.trim().parse().ok()).unwrap_or(0)
}

/// First keyword (case-insensitive) contained in `text`
pub fn match_fuel_keyword<'k>(keywords: &'k [FuelKeyword], text: &str) -> Option<&'k str> {
    let lower = text.to_lowercase();
    keywords
        .iter()
        .find(|k| lower.contains(&k.term.to_lowercase()))
        .map(|k| k.fuel_type.as_str())
}

/// Dealer wins when both blocks are present
pub fn seller_type(has_dealer_block: bool, has_private_block: bool) -> Option<SellerType> {
    if has_dealer_block {
        Some(SellerType::Dealer)
    } else if has_private_block {
        Some(SellerType::Private)
    } else {
        None
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

pub struct Extractor<'a> {
    config: &'a ScraperConfig,
}

impl<'a> Extractor<'a> {
    pub fn new(config: &'a ScraperConfig) -> Self {
        Self { config }
    }

    /// Name/value pairs of the property table, labels translated
    pub fn parse_properties(&self, doc: &impl DocumentQuery) -> RawProperties {
        let names = doc.nested_text(Role::PropertyItem, Role::PropertyName);
        let values = doc.nested_text(Role::PropertyItem, Role::PropertyValue);
        debug!(items = names.len(), "Found property items");

        let mut properties = RawProperties::new();
        for (name, value) in names.into_iter().zip(values) {
            let (Some(name), Some(value)) = (name, value) else {
                debug!("Skipping property item without name or value");
                continue;
            };
            let field = self.config.translate_label(&name).to_string();
            properties.insert(field, value);
        }
        properties
    }

    /// Explicit property, then engine text, then title, then the configured default.
    /// An explicit value is normalized through the keyword table when it matches one.
    pub fn fuel_type(&self, properties: &RawProperties, title: &str) -> String {
        let keywords = &self.config.fuel_keywords;
        let explicit = properties
            .get("fuel_type")
            .map(|f| f.trim())
            .filter(|f| !f.is_empty());
        if let Some(explicit) = explicit {
            return match_fuel_keyword(keywords, explicit)
                .unwrap_or(explicit)
                .to_string();
        }
        properties
            .get("engine_size")
            .and_then(|engine| match_fuel_keyword(keywords, engine))
            .or_else(|| match_fuel_keyword(keywords, title))
            .unwrap_or(self.config.default_fuel_type.as_str())
            .to_string()
    }

    pub fn extract(
        &self,
        doc: &impl DocumentQuery,
        listing_id: &str,
        url: &str,
    ) -> Result<ListingRecord, ExtractError> {
        let title = non_empty(doc.first_text(Role::Title)).ok_or(ExtractError::MissingTitle)?;

        let properties = self.parse_properties(doc);
        if properties.is_empty() {
            return Err(ExtractError::NoProperties);
        }

        let raw = |field: &str| properties.get(field).map(String::as_str);
        let passthrough = |field: &str| non_empty(properties.get(field).cloned());

        let now = Utc::now();
        Ok(ListingRecord {
            listing_id: listing_id.to_string(),
            price: parse_price(doc.first_text(Role::Price).as_deref()),
            year: parse_year(raw("year")),
            mileage: parse_mileage(raw("mileage")),
            engine_size: parse_engine_size(raw("engine_size")),
            body_type: passthrough("body_type"),
            color: passthrough("color"),
            fuel_type: self.fuel_type(&properties, &title),
            transmission: passthrough("transmission"),
            location: passthrough("location"),
            brand: passthrough("brand"),
            model: passthrough("model"),
            seller_type: seller_type(
                doc.exists(Role::DealerContact),
                doc.exists(Role::PrivateOwner),
            ),
            description: non_empty(doc.first_text(Role::Description)),
            images: doc.attr_all(Role::Photo, "src"),
            url: url.to_string(),
            title,
            created_at: now,
            updated_at: now,
        })
    }
}
