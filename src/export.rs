use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::{ExportMode, ScraperConfig};
use crate::types::ListingRecord;

/// Column order of every snapshot file
pub const SNAPSHOT_HEADER: [&str; 19] = [
    "listing_id",
    "title",
    "price",
    "year",
    "mileage",
    "engine_size",
    "body_type",
    "color",
    "fuel_type",
    "transmission",
    "location",
    "brand",
    "model",
    "seller_type",
    "description",
    "images",
    "url",
    "created_at",
    "updated_at",
];

/// Flat CSV form of a [`ListingRecord`]; images are a JSON array
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotRow {
    listing_id: String,
    title: String,
    price: f64,
    year: i32,
    mileage: f64,
    engine_size: f64,
    body_type: Option<String>,
    color: Option<String>,
    fuel_type: String,
    transmission: Option<String>,
    location: Option<String>,
    brand: Option<String>,
    model: Option<String>,
    seller_type: Option<String>,
    description: Option<String>,
    images: Option<String>,
    url: String,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl From<&ListingRecord> for SnapshotRow {
    fn from(record: &ListingRecord) -> Self {
        Self {
            listing_id: record.listing_id.clone(),
            title: record.title.clone(),
            price: record.price,
            year: record.year,
            mileage: record.mileage,
            engine_size: record.engine_size,
            body_type: record.body_type.clone(),
            color: record.color.clone(),
            fuel_type: record.fuel_type.clone(),
            transmission: record.transmission.clone(),
            location: record.location.clone(),
            brand: record.brand.clone(),
            model: record.model.clone(),
            seller_type: record.seller_type.map(|s| s.as_str().to_string()),
            description: record.description.clone(),
            images: record.images_json(),
            url: record.url.clone(),
            created_at: Some(record.created_at),
            updated_at: Some(record.updated_at),
        }
    }
}

impl From<SnapshotRow> for ListingRecord {
    fn from(row: SnapshotRow) -> Self {
        let now = Utc::now();
        Self {
            images: ListingRecord::images_from_json(row.images.as_deref()),
            seller_type: row.seller_type.as_deref().and_then(|s| s.parse().ok()),
            listing_id: row.listing_id,
            title: row.title,
            price: row.price,
            year: row.year,
            mileage: row.mileage,
            engine_size: row.engine_size,
            body_type: row.body_type,
            color: row.color,
            fuel_type: row.fuel_type,
            transmission: row.transmission,
            location: row.location,
            brand: row.brand,
            model: row.model,
            description: row.description,
            url: row.url,
            created_at: row.created_at.unwrap_or(now),
            updated_at: row.updated_at.unwrap_or(now),
        }
    }
}

pub struct SnapshotExporter {
    output_dir: PathBuf,
    csv_filename: String,
    mode: ExportMode,
}

impl SnapshotExporter {
    pub fn new(config: &ScraperConfig) -> Self {
        Self {
            output_dir: config.output_dir.clone(),
            csv_filename: config.csv_filename.clone(),
            mode: config.export_mode,
        }
    }

    fn target_path(&self) -> PathBuf {
        match self.mode {
            ExportMode::Overwrite => self.output_dir.join(&self.csv_filename),
            ExportMode::Timestamped => {
                let name = Path::new(&self.csv_filename);
                let stem = name
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_else(|| "listings".to_string());
                let stamp = Utc::now().format("%Y%m%d_%H%M%S_%3f");
                self.output_dir.join(format!("{}_{}.csv", stem, stamp))
            }
        }
    }

    /// Write the batch (not the whole store) to CSV; returns the file written
    pub fn export(&self, batch: &[ListingRecord]) -> Result<PathBuf> {
        fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("Failed to create {}", self.output_dir.display()))?;
        let path = self.target_path();

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        writer.write_record(SNAPSHOT_HEADER)?;
        for record in batch {
            writer.serialize(SnapshotRow::from(record))?;
        }
        writer
            .flush()
            .with_context(|| format!("Failed to write {}", path.display()))?;

        info!(path = %path.display(), rows = batch.len(), "Saved listings to CSV");
        Ok(path)
    }
}

/// Read a snapshot back; malformed rows are logged and skipped
pub fn read_snapshot(path: &Path) -> Result<Vec<ListingRecord>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut records = Vec::new();
    for (idx, row) in reader.deserialize::<SnapshotRow>().enumerate() {
        match row {
            Ok(row) => records.push(row.into()),
            Err(e) => warn!(row = idx + 1, error = %e, "Skipping malformed CSV row"),
        }
    }
    info!(path = %path.display(), rows = records.len(), "Read records from CSV");
    Ok(records)
}
