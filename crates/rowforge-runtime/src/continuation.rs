use std::collections::BTreeMap;
use std::fs::{OpenOptions, create_dir_all};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use rowforge_core::{Dependency, Row, RowId};

use crate::errors::{Result, RuntimeError};

/// Serialized run-chain state handed from one run to the next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuationSnapshot {
    /// Last identifier issued per table.
    pub id_manager: BTreeMap<String, RowId>,
    /// Every referable name and the table it produces.
    pub nicknames_and_tables: BTreeMap<String, String>,
    /// Anchor date shared by every run in the chain.
    pub today: NaiveDate,
    #[serde(default)]
    pub intertable_dependencies: Vec<Dependency>,
    #[serde(default)]
    pub persistent_nicknames: BTreeMap<String, Row>,
    #[serde(default)]
    pub persistent_objects_by_table: BTreeMap<String, Row>,
}

impl ContinuationSnapshot {
    /// Check that bound rows agree with the identifier counters.
    pub fn validate(&self) -> Result<()> {
        for (nickname, row) in &self.persistent_nicknames {
            match self.nicknames_and_tables.get(nickname) {
                Some(table) if table == row.table() => {}
                Some(table) => {
                    return Err(malformed(format!(
                        "nickname `{nickname}` maps to {table} but its row belongs to {}",
                        row.table()
                    )));
                }
                None => {
                    return Err(malformed(format!(
                        "nickname `{nickname}` is not listed in nicknames_and_tables"
                    )));
                }
            }
            self.check_issued(row)?;
        }

        for (table, row) in &self.persistent_objects_by_table {
            if table != row.table() {
                return Err(malformed(format!(
                    "row bound to table {table} belongs to {}",
                    row.table()
                )));
            }
            self.check_issued(row)?;
        }

        Ok(())
    }

    fn check_issued(&self, row: &Row) -> Result<()> {
        let last = self.id_manager.get(row.table()).copied().unwrap_or(0);
        if row.id() == 0 || row.id() > last {
            return Err(malformed(format!(
                "{}({}) was never issued; last {} id is {last}",
                row.table(),
                row.id(),
                row.table()
            )));
        }
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let snapshot: Self =
            serde_yaml_ng::from_str(yaml).map_err(|err| malformed(err.to_string()))?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml_ng::to_string(self)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    /// Write the snapshot so readers never observe a partial file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let yaml = self.to_yaml_string()?;
        write_bytes_atomic(path, yaml.as_bytes())?;
        Ok(())
    }
}

fn malformed(message: String) -> RuntimeError {
    RuntimeError::MalformedContinuation(message)
}

pub(crate) fn write_bytes_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let parent = path.parent().filter(|parent| !parent.as_os_str().is_empty());
    if let Some(parent) = parent {
        create_dir_all(parent)?;
    }

    let tmp_path = temp_path(path)?;
    let mut file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(&tmp_path)?;
    file.write_all(data)?;
    file.sync_all()?;

    std::fs::rename(&tmp_path, path)?;
    if let Some(parent) = parent {
        sync_dir(parent)?;
    }

    Ok(())
}

fn temp_path(path: &Path) -> io::Result<PathBuf> {
    let file_name = path.file_name().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "invalid path for atomic write")
    })?;
    let tmp_name = format!("{}.tmp", file_name.to_string_lossy());
    Ok(path.with_file_name(tmp_name))
}

fn sync_dir(path: &Path) -> io::Result<()> {
    let dir = OpenOptions::new().read(true).open(path)?;
    dir.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> ContinuationSnapshot {
        let mut row = Row::new("Account", 1, 0);
        row.insert("name", rowforge_core::FieldValue::from("Acme Corp"));
        ContinuationSnapshot {
            id_manager: BTreeMap::from([("Account".to_string(), 1)]),
            nicknames_and_tables: BTreeMap::from([
                ("Acme".to_string(), "Account".to_string()),
                ("Account".to_string(), "Account".to_string()),
            ]),
            today: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            intertable_dependencies: vec![Dependency::new("Contact", "Account", "account")],
            persistent_nicknames: BTreeMap::from([("Acme".to_string(), row.clone())]),
            persistent_objects_by_table: BTreeMap::from([("Account".to_string(), row)]),
        }
    }

    #[test]
    fn yaml_round_trip() {
        let snapshot = snapshot();
        let yaml = snapshot.to_yaml_string().unwrap();
        assert!(yaml.contains("intertable_dependencies"));
        assert_eq!(ContinuationSnapshot::from_yaml_str(&yaml).unwrap(), snapshot);
    }

    #[test]
    fn missing_sections_are_malformed() {
        let err = ContinuationSnapshot::from_yaml_str("id_manager: {}\n").expect_err("expected error");
        assert!(matches!(err, RuntimeError::MalformedContinuation(_)));
    }

    #[test]
    fn rows_newer_than_counters_are_malformed() {
        let mut snapshot = snapshot();
        snapshot.id_manager.insert("Account".to_string(), 0);
        let yaml = snapshot.to_yaml_string().unwrap();

        let err = ContinuationSnapshot::from_yaml_str(&yaml).expect_err("expected error");
        assert!(err.to_string().contains("Account(1) was never issued"));
    }

    #[test]
    fn save_replaces_file_atomically() {
        let dir = std::env::temp_dir().join(format!("rowforge_continuation_{}", uuid::Uuid::new_v4()));
        let path = dir.join("continuation.yml");
        let snapshot = snapshot();

        snapshot.save(&path).unwrap();
        snapshot.save(&path).unwrap();

        assert_eq!(ContinuationSnapshot::load(&path).unwrap(), snapshot);
        assert!(!dir.join("continuation.yml.tmp").exists());
        let _ = std::fs::remove_dir_all(dir);
    }
}
