use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use rowforge_core::Row;

use super::{OutputError, OutputStream};

/// Writes one `<table>.csv` file per table into a directory.
///
/// The header is `id` followed by the fields declared for the table across
/// all of its templates, then any other fields of the first row. Later rows
/// may omit fields but must not introduce new ones.
pub struct CsvOutputStream {
    dir: PathBuf,
    declared: BTreeMap<String, Vec<String>>,
    tables: BTreeMap<String, TableWriter>,
    bytes_written: u64,
}

struct TableWriter {
    columns: Vec<String>,
    writer: csv::Writer<CountingWriter<BufWriter<File>>>,
}

impl CsvOutputStream {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, OutputError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            declared: BTreeMap::new(),
            tables: BTreeMap::new(),
            bytes_written: 0,
        })
    }

    /// Declared fields per table, usually `Recipe::table_fields`.
    pub fn with_table_fields(mut self, declared: BTreeMap<String, Vec<String>>) -> Self {
        self.declared = declared;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Bytes flushed by `close`.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    fn open_table(&self, row: &Row) -> Result<TableWriter, OutputError> {
        let path = self.dir.join(format!("{}.csv", row.table()));
        let file = BufWriter::new(File::create(path)?);
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(CountingWriter::new(file));

        let mut columns = vec!["id".to_string()];
        let declared = self
            .declared
            .get(row.table())
            .into_iter()
            .flatten()
            .map(String::as_str);
        for name in declared.chain(row.field_names()) {
            if !columns.iter().any(|column| column == name) {
                columns.push(name.to_string());
            }
        }
        writer.write_record(&columns)?;
        Ok(TableWriter { columns, writer })
    }
}

impl OutputStream for CsvOutputStream {
    fn write_row(&mut self, row: &Row) -> Result<(), OutputError> {
        if !self.tables.contains_key(row.table()) {
            let table = self.open_table(row)?;
            self.tables.insert(row.table().to_string(), table);
        }
        let Some(table) = self.tables.get_mut(row.table()) else {
            return Ok(());
        };

        if let Some(unknown) = row
            .field_names()
            .find(|name| !table.columns.iter().any(|column| column == name))
        {
            return Err(OutputError::Format(format!(
                "{}({}) has field `{unknown}` missing from the {} header",
                row.table(),
                row.id(),
                row.table()
            )));
        }

        let record: Vec<String> = table
            .columns
            .iter()
            .map(|column| {
                row.field(column)
                    .map(|value| value.to_string())
                    .unwrap_or_default()
            })
            .collect();
        table.writer.write_record(&record)?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), OutputError> {
        for (_, table) in std::mem::take(&mut self.tables) {
            let mut writer = table.writer;
            writer.flush()?;
            let counting = writer.into_inner().map_err(|err| err.into_error())?;
            self.bytes_written = self.bytes_written.saturating_add(counting.bytes_written());
        }
        Ok(())
    }
}

struct CountingWriter<W: Write> {
    inner: W,
    bytes: u64,
}

impl<W: Write> CountingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, bytes: 0 }
    }

    fn bytes_written(&self) -> u64 {
        self.bytes
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let size = self.inner.write(buf)?;
        self.bytes = self.bytes.saturating_add(size as u64);
        Ok(size)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rowforge_core::FieldValue;

    use super::*;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("rowforge_csv_{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn one_file_per_table_with_header_from_first_row() {
        let dir = temp_dir();
        let mut stream = CsvOutputStream::new(&dir).unwrap();

        let account = Arc::new(Row::new("Account", 1, 0));
        let mut first = Row::new("Contact", 1, 0);
        first.insert("name", FieldValue::from("Ada, Countess"));
        first.insert("account", FieldValue::reference(Arc::clone(&account)));
        let mut second = Row::new("Contact", 2, 1);
        second.insert("account", FieldValue::reference(account));

        stream.write_row(&Row::new("Account", 1, 0)).unwrap();
        stream.write_row(&first).unwrap();
        stream.write_row(&second).unwrap();
        stream.close().unwrap();

        let contacts = std::fs::read_to_string(dir.join("Contact.csv")).unwrap();
        assert_eq!(contacts, "id,name,account\n1,\"Ada, Countess\",1\n2,,1\n");
        let accounts = std::fs::read_to_string(dir.join("Account.csv")).unwrap();
        assert_eq!(accounts, "id\n1\n");
        assert_eq!(
            stream.bytes_written(),
            (contacts.len() + accounts.len()) as u64
        );
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn declared_fields_from_every_template_share_one_header() {
        let dir = temp_dir();
        let declared = BTreeMap::from([(
            "Contact".to_string(),
            vec!["name".to_string(), "title".to_string()],
        )]);
        let mut stream = CsvOutputStream::new(&dir)
            .unwrap()
            .with_table_fields(declared);

        let mut plain = Row::new("Contact", 1, 0);
        plain.insert("name", FieldValue::from("Ada"));
        let mut boss = Row::new("Contact", 2, 0);
        boss.insert("title", FieldValue::from("CEO"));
        stream.write_row(&plain).unwrap();
        stream.write_row(&boss).unwrap();
        stream.close().unwrap();

        let contacts = std::fs::read_to_string(dir.join("Contact.csv")).unwrap();
        assert_eq!(contacts, "id,name,title\n1,Ada,\n2,,CEO\n");
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn new_fields_after_the_header_are_rejected() {
        let dir = temp_dir();
        let mut stream = CsvOutputStream::new(&dir).unwrap();
        stream.write_row(&Row::new("Account", 1, 0)).unwrap();

        let mut late = Row::new("Account", 2, 0);
        late.insert("name", FieldValue::from("Late"));
        let err = stream.write_row(&late).expect_err("expected format error");
        assert!(matches!(err, OutputError::Format(ref message) if message.contains("`name`")));
        let _ = std::fs::remove_dir_all(dir);
    }
}
