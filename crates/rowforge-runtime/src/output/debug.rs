use std::io::{self, Stdout, Write};

use rowforge_core::Row;

use super::{OutputError, OutputStream};

/// Writes one `Table(id=1, field=value)` line per row.
pub struct DebugOutputStream<W: Write> {
    writer: W,
}

impl DebugOutputStream<Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> DebugOutputStream<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> OutputStream for DebugOutputStream<W> {
    fn write_row(&mut self, row: &Row) -> Result<(), OutputError> {
        writeln!(self.writer, "{row}")?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), OutputError> {
        self.writer.flush()?;
        Ok(())
    }
}
