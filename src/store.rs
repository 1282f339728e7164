use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::fs;
use std::path::Path;
use tracing::{debug, error};

use crate::error::StoreError;
use crate::types::ListingRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Counts from saving one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub inserted: usize,
    pub updated: usize,
    pub failed: usize,
}

impl FlushReport {
    pub fn saved(&self) -> usize {
        self.inserted + self.updated
    }

    pub fn add(&mut self, other: &FlushReport) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.failed += other.failed;
    }
}

#[derive(Debug, Clone, Default)]
pub struct StoreSummary {
    pub total: i64,
    /// Averages over rows with a price, a plausible year and a mileage
    pub avg_price: Option<f64>,
    pub avg_year: Option<f64>,
    pub avg_mileage: Option<f64>,
    /// Over rows with a price
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub unique_brands: i64,
    pub top_brands: Vec<(String, i64)>,
    pub years: Vec<(i32, i64)>,
}

pub fn init_database(conn: &Connection) -> Result<()> {
    let schema = include_str!("../schema.sql");
    conn.execute_batch(schema)?;
    Ok(())
}

const SELECT_COLUMNS: &str = "listing_id, title, price, year, mileage, engine_size, body_type, color,
     fuel_type, transmission, location, brand, model, seller_type, description, images, url,
     created_at, updated_at";

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<ListingRecord> {
    let seller_type: Option<String> = row.get(13)?;
    let images: Option<String> = row.get(15)?;
    Ok(ListingRecord {
        listing_id: row.get(0)?,
        title: row.get(1)?,
        price: row.get(2)?,
        year: row.get(3)?,
        mileage: row.get(4)?,
        engine_size: row.get(5)?,
        body_type: row.get(6)?,
        color: row.get(7)?,
        fuel_type: row.get(8)?,
        transmission: row.get(9)?,
        location: row.get(10)?,
        brand: row.get(11)?,
        model: row.get(12)?,
        seller_type: seller_type.as_deref().and_then(|s| s.parse().ok()),
        description: row.get(14)?,
        images: ListingRecord::images_from_json(images.as_deref()),
        url: row.get(16)?,
        created_at: row.get(17)?,
        updated_at: row.get(18)?,
    })
}

pub struct CarStore {
    conn: Connection,
}

impl CarStore {
    /// Open (or create) the database; existing tables are left as they are
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        init_database(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_database(&conn)?;
        Ok(Self { conn })
    }

    /// Insert or update by `listing_id` in a single transaction
    pub fn upsert(&mut self, record: &ListingRecord) -> Result<UpsertOutcome, StoreError> {
        self.try_upsert(record).map_err(|source| StoreError::Write {
            listing_id: record.listing_id.clone(),
            source,
        })
    }

    fn try_upsert(&mut self, record: &ListingRecord) -> rusqlite::Result<UpsertOutcome> {
        let tx = self.conn.transaction()?;

        let existing: Option<DateTime<Utc>> = tx
            .query_row(
                "SELECT updated_at FROM cars WHERE listing_id = ?1",
                [&record.listing_id],
                |row| row.get(0),
            )
            .optional()?;

        let now = Utc::now();
        let images = record.images_json();
        let seller_type = record.seller_type.map(|s| s.as_str());

        let outcome = match existing {
            Some(previous) => {
                // keep updated_at strictly increasing even if the clock hasn't moved
                let updated_at = if now > previous {
                    now
                } else {
                    previous + Duration::microseconds(1)
                };
                tx.execute(
                    "UPDATE cars SET title = ?2, price = ?3, year = ?4, mileage = ?5, engine_size = ?6,
                     body_type = ?7, color = ?8, fuel_type = ?9, transmission = ?10, location = ?11,
                     brand = ?12, model = ?13, seller_type = ?14, description = ?15, images = ?16,
                     url = ?17, updated_at = ?18
                     WHERE listing_id = ?1",
                    params![
                        record.listing_id,
                        record.title,
                        record.price,
                        record.year,
                        record.mileage,
                        record.engine_size,
                        record.body_type,
                        record.color,
                        record.fuel_type,
                        record.transmission,
                        record.location,
                        record.brand,
                        record.model,
                        seller_type,
                        record.description,
                        images,
                        record.url,
                        updated_at,
                    ],
                )?;
                UpsertOutcome::Updated
            }
            None => {
                tx.execute(
                    "INSERT INTO cars
                     (listing_id, title, price, year, mileage, engine_size, body_type, color, fuel_type,
                      transmission, location, brand, model, seller_type, description, images, url,
                      created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?18)",
                    params![
                        record.listing_id,
                        record.title,
                        record.price,
                        record.year,
                        record.mileage,
                        record.engine_size,
                        record.body_type,
                        record.color,
                        record.fuel_type,
                        record.transmission,
                        record.location,
                        record.brand,
                        record.model,
                        seller_type,
                        record.description,
                        images,
                        record.url,
                        now,
                    ],
                )?;
                UpsertOutcome::Inserted
            }
        };

        tx.commit()?;
        Ok(outcome)
    }

    /// Upsert every record; a failed record is logged and counted, never fatal
    pub fn save_batch(&mut self, batch: &[ListingRecord]) -> FlushReport {
        let mut report = FlushReport::default();
        for record in batch {
            match self.upsert(record) {
                Ok(UpsertOutcome::Inserted) => report.inserted += 1,
                Ok(UpsertOutcome::Updated) => report.updated += 1,
                Err(e) => {
                    error!(listing_id = %record.listing_id, error = %e, "Error saving listing to database");
                    report.failed += 1;
                }
            }
        }
        debug!(?report, "Batch saved");
        report
    }

    pub fn get(&self, listing_id: &str) -> Result<Option<ListingRecord>, StoreError> {
        let sql = format!("SELECT {} FROM cars WHERE listing_id = ?1", SELECT_COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, [listing_id], record_from_row)
            .optional()?)
    }

    pub fn count(&self) -> Result<i64, StoreError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM cars", [], |row| row.get(0))?)
    }

    pub fn summary(&self) -> Result<StoreSummary, StoreError> {
        let total = self.count()?;

        let (avg_price, avg_year, avg_mileage): (Option<f64>, Option<f64>, Option<f64>) =
            self.conn.query_row(
                "SELECT AVG(price), AVG(year), AVG(mileage) FROM cars
                 WHERE price > 0 AND year > 1950 AND mileage > 0",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;

        let (min_price, max_price): (Option<f64>, Option<f64>) = self.conn.query_row(
            "SELECT MIN(price), MAX(price) FROM cars WHERE price > 0",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let unique_brands: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT brand) FROM cars WHERE brand IS NOT NULL",
            [],
            |row| row.get(0),
        )?;

        let mut stmt = self.conn.prepare(
            "SELECT brand, COUNT(*) AS n FROM cars WHERE brand IS NOT NULL
             GROUP BY brand ORDER BY n DESC, brand ASC LIMIT 5",
        )?;
        let top_brands = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<(String, i64)>>>()?;

        let mut stmt = self.conn.prepare(
            "SELECT year, COUNT(*) FROM cars WHERE year > 0
             GROUP BY year ORDER BY year ASC LIMIT 5",
        )?;
        let years = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<(i32, i64)>>>()?;

        Ok(StoreSummary {
            total,
            avg_price,
            avg_year,
            avg_mileage,
            min_price,
            max_price,
            unique_brands,
            top_brands,
            years,
        })
    }
}
