use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("no response from {url} after {attempts} attempts: {reason}")]
    NoResponse {
        url: String,
        attempts: u32,
        reason: String,
    },

    #[error("{url} returned HTTP {status} after {attempts} attempts")]
    Status {
        url: String,
        status: u16,
        attempts: u32,
    },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ExtractError {
    #[error("title element missing")]
    MissingTitle,

    #[error("no properties found")]
    NoProperties,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown seller type: {0}")]
pub struct UnknownSellerType(pub String);

#[derive(Error, Debug)]
pub enum ListingError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("listing {listing_id} skipped: {source}")]
    Extract {
        listing_id: String,
        source: ExtractError,
    },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to write listing {listing_id}: {source}")]
    Write {
        listing_id: String,
        source: rusqlite::Error,
    },

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid selector for {role}: {selector} ({reason})")]
    Selector {
        role: &'static str,
        selector: String,
        reason: String,
    },

    #[error("invalid header {name}: {reason}")]
    Header { name: String, reason: String },
}
