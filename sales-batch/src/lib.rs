//! Daily sales workbook ingestion, monthly reporting and PDF export

pub mod batch;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod sales;

pub use error::BatchError;
