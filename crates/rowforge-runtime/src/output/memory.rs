use rowforge_core::Row;

use super::{OutputError, OutputStream};

/// Keeps emitted rows in memory, for embedding and tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryOutputStream {
    rows: Vec<Row>,
    closed: bool,
}

impl MemoryOutputStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn table<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a Row> + 'a {
        self.rows.iter().filter(move |row| row.table() == table)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}

impl OutputStream for MemoryOutputStream {
    fn write_row(&mut self, row: &Row) -> Result<(), OutputError> {
        if self.closed {
            return Err(OutputError::Format(format!(
                "{}({}) written after close",
                row.table(),
                row.id()
            )));
        }
        self.rows.push(row.clone());
        Ok(())
    }

    fn close(&mut self) -> Result<(), OutputError> {
        self.closed = true;
        Ok(())
    }
}
