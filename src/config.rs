//! Run configuration: site URL, request policy, selectors and label tables

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://turbo.az/autos";
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// How each flushed batch is mirrored to CSV
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportMode {
    /// Rewrite `output_dir/csv_filename` with the batch
    Overwrite,
    /// Write a fresh timestamped file per flush
    #[default]
    Timestamped,
}

/// CSS selectors for every page region the scraper reads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Selectors {
    pub listing_link: String,
    pub pagination: String,
    /// Matched inside `pagination`
    pub pagination_entry: String,
    pub title: String,
    pub price: String,
    pub description: String,
    pub property_item: String,
    /// Matched inside `property_item`
    pub property_name: String,
    /// Matched inside `property_item`
    pub property_value: String,
    pub dealer_contact: String,
    pub private_owner: String,
    pub photo: String,
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            listing_link: "a.products-i__link".to_string(),
            pagination: "div.pagination".to_string(),
            pagination_entry: "a".to_string(),
            title: "h1.product-title".to_string(),
            price: "div.product-price__i".to_string(),
            description: "div.product-description".to_string(),
            property_item: "div.product-properties__i".to_string(),
            property_name: "label.product-properties__i-name".to_string(),
            property_value: "span.product-properties__i-value".to_string(),
            dealer_contact: "div.shop-contact".to_string(),
            private_owner: "div.product-owner__info".to_string(),
            photo: "div.product-photos img".to_string(),
        }
    }
}

/// A native-language fuel term and the fuel type it stands for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuelKeyword {
    pub term: String,
    pub fuel_type: String,
}

impl FuelKeyword {
    fn new(term: &str, fuel_type: &str) -> Self {
        Self {
            term: term.to_string(),
            fuel_type: fuel_type.to_string(),
        }
    }
}

fn default_headers() -> BTreeMap<String, String> {
    [
        ("User-Agent", DEFAULT_USER_AGENT),
        (
            "Accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
        ),
        ("Accept-Language", "en-US,en;q=0.5"),
        ("Upgrade-Insecure-Requests", "1"),
        ("Sec-Fetch-Dest", "document"),
        ("Sec-Fetch-Mode", "navigate"),
        ("Sec-Fetch-Site", "none"),
        ("Sec-Fetch-User", "?1"),
        ("Cache-Control", "max-age=0"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Site labels (Azerbaijani) to field names
fn default_labels() -> BTreeMap<String, String> {
    [
        ("Şəhər", "location"),
        ("Marka", "brand"),
        ("Model", "model"),
        ("Buraxılış ili", "year"),
        ("Ban növü", "body_type"),
        ("Rəng", "color"),
        ("Mühərrik", "engine_size"),
        ("Yürüş", "mileage"),
        ("Yanacaq növü", "fuel_type"),
        ("Sürətlər qutusu", "transmission"),
        ("Ötürücü", "drivetrain"),
        ("Yeni", "condition"),
        ("Sahiblər", "owners"),
        ("Vəziyyəti", "condition_details"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Checked in order, so compound terms come before their parts
fn default_fuel_keywords() -> Vec<FuelKeyword> {
    vec![
        FuelKeyword::new("Plug-in Hibrid", "Plug-in Hybrid"),
        FuelKeyword::new("Hibrid", "Hybrid"),
        FuelKeyword::new("Dizel", "Diesel"),
        FuelKeyword::new("Benzin", "Gasoline"),
        FuelKeyword::new("Elektro", "Electric"),
        FuelKeyword::new("Qaz", "Gas"),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    pub base_url: String,
    pub headers: BTreeMap<String, String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// Pause after every listing, and the unit of retry backoff
    pub delay_ms: u64,
    pub max_pages: Option<u32>,
    pub batch_size: usize,
    pub selectors: Selectors,
    pub labels: BTreeMap<String, String>,
    pub fuel_keywords: Vec<FuelKeyword>,
    pub default_fuel_type: String,
    pub output_dir: PathBuf,
    pub csv_filename: String,
    pub database: PathBuf,
    pub export_mode: ExportMode,
    pub log_file: Option<PathBuf>,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            headers: default_headers(),
            timeout_secs: 10,
            max_retries: 3,
            delay_ms: 1000,
            max_pages: None,
            batch_size: 20,
            selectors: Selectors::default(),
            labels: default_labels(),
            fuel_keywords: default_fuel_keywords(),
            default_fuel_type: "Gasoline".to_string(),
            output_dir: PathBuf::from("data"),
            csv_filename: "turbo_az_listings.csv".to_string(),
            database: PathBuf::from("data/cars.db"),
            export_mode: ExportMode::default(),
            log_file: Some(PathBuf::from("scraper.log")),
        }
    }
}

impl ScraperConfig {
    /// Load overrides from a JSON file; missing keys keep their defaults
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn with_max_pages(mut self, max_pages: Option<u32>) -> Self {
        if max_pages.is_some() {
            self.max_pages = max_pages;
        }
        self
    }

    /// Field name for a site label, or the label itself when untranslated
    pub fn translate_label<'a>(&'a self, label: &'a str) -> &'a str {
        self.labels.get(label).map(String::as_str).unwrap_or(label)
    }
}
