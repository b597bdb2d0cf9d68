use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Append-only CSV file of published decisions. The header row is written
/// only when the file is created.
#[derive(Debug, Clone)]
pub struct DecisionLog {
    path: PathBuf,
}

impl DecisionLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append<T: Serialize>(&self, record: &T) -> Result<(), csv::Error> {
        let file_exists = self.path.exists();
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)?;
        let mut wtr = csv::WriterBuilder::new()
            .has_headers(!file_exists)
            .from_writer(file);
        wtr.serialize(record)?;
        wtr.flush()?;
        Ok(())
    }

    /// Like `append`, but failures are only logged.
    pub fn append_or_warn<T: Serialize>(&self, record: &T) {
        if let Err(e) = self.append(record) {
            log::warn!(
                "[DecisionLog] Could not append to {}: {}",
                self.path.display(),
                e
            );
        }
    }

    pub fn read_all<T: DeserializeOwned>(&self) -> Result<Vec<T>, csv::Error> {
        let file = File::open(&self.path)?;
        let mut rdr = csv::Reader::from_reader(file);
        rdr.deserialize().collect()
    }
}
