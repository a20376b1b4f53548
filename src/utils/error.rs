// src/utils/error.rs
use thiserror::Error;

// Define specific error types for different parts of the application
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network request failed: {0}")]
    Network(#[from] reqwest::Error), // Automatically convert reqwest errors

    #[error("HTTP error: {0}")]
    Http(reqwest::StatusCode), // e.g., 404 Not Found, 403 Forbidden

    #[error("Could not determine season years from report page: {0}")]
    SeasonNotFound(String),

    #[error("Failed to parse report page: {0}")]
    Page(String),
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Unrecognised date format: {0}")]
    UnrecognisedDate(String),

    #[error("Malformed table: {0}")]
    MalformedTable(String),

    #[error("Missing expected column: {0}")]
    MissingColumn(String),

    #[error("Percentage not from 0-100: {column}={value} ({context})")]
    PctOutOfBounds {
        column: String,
        value: f64,
        context: String,
    },

    #[error("Invalid epidemiological week: year {year} week {week}")]
    InvalidEpiweek { year: i32, week: u32 },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error), // Automatically convert IO errors

    #[error("Report retrieval failed: {0}")]
    Fetch(#[from] FetchError), // Automatically convert fetch errors

    #[error("Table parsing failed: {0}")]
    Parse(#[from] ParseError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Data processing failed: {0}")]
    Processing(String),
}
