//! Destinations for generated rows.

pub mod csv;
pub mod debug;
pub mod jsonl;
pub mod memory;

use thiserror::Error;

use rowforge_core::Row;

pub use self::csv::CsvOutputStream;
pub use self::debug::DebugOutputStream;
pub use self::jsonl::JsonLinesOutputStream;
pub use self::memory::MemoryOutputStream;

/// Errors raised while emitting rows.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] ::csv::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Format(String),
}

/// Sink receiving every visible row in generation order.
pub trait OutputStream {
    fn write_row(&mut self, row: &Row) -> Result<(), OutputError>;

    /// Flush buffered rows. Called once after the last row.
    fn close(&mut self) -> Result<(), OutputError> {
        Ok(())
    }
}

impl<T: OutputStream + ?Sized> OutputStream for Box<T> {
    fn write_row(&mut self, row: &Row) -> Result<(), OutputError> {
        (**self).write_row(row)
    }

    fn close(&mut self) -> Result<(), OutputError> {
        (**self).close()
    }
}
