use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::sensor::Reading;

/// Persistence collaborator. The polling loop forwards successful readings
/// and error records here; a failing store is logged by the caller and the
/// cycle carries on.
pub trait ReadingStore: Send + Sync {
    fn store_reading(&self, reading: &Reading) -> Result<(), String>;
    fn store_error(&self, message: &str, at: DateTime<Utc>) -> Result<(), String>;
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Record<'a> {
    Reading { temp: f64, date: DateTime<Utc> },
    Error { msg: &'a str, date: DateTime<Utc> },
}

/// Append-only JSON-lines log of readings and errors.
pub struct JsonlStore {
    file: Mutex<File>,
}

impl JsonlStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, String> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| format!("failed to open {}: {e}", path.display()))?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    fn append(&self, record: &Record<'_>) -> Result<(), String> {
        let line = serde_json::to_string(record).map_err(|e| e.to_string())?;
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(file, "{line}").map_err(|e| e.to_string())
    }
}

impl ReadingStore for JsonlStore {
    fn store_reading(&self, reading: &Reading) -> Result<(), String> {
        self.append(&Record::Reading {
            temp: reading.temperature,
            date: reading.timestamp,
        })
    }

    fn store_error(&self, message: &str, at: DateTime<Utc>) -> Result<(), String> {
        self.append(&Record::Error {
            msg: message,
            date: at,
        })
    }
}
