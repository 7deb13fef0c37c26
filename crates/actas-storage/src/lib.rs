//! Append-only certificate table storage with duplicate rejection.

use std::path::PathBuf;

use actas_core::{canonical_header, CanonicalField, CanonicalRecord};
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "actas-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record has neither Folio nor CURP")]
    MissingUniquenessKey,
    #[error("duplicate certificate: {key} {value} was already recorded")]
    DuplicateRecord { key: CanonicalField, value: String },
    #[error("table schema has no `{column}` column")]
    StructuralMismatch { column: CanonicalField },
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Row-oriented table the record store writes into.
///
/// Implementations flush every write before returning.
#[async_trait]
pub trait TableBackend: Send + Sync {
    fn header(&self) -> &[String];
    fn rows(&self) -> &[Vec<String>];
    async fn append_row(&mut self, values: Vec<String>) -> Result<(), StoreError>;
    async fn clear(&mut self) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl MemoryTable {
    pub fn open_or_create(schema: Vec<String>) -> Self {
        Self {
            header: schema,
            rows: Vec::new(),
        }
    }
}

#[async_trait]
impl TableBackend for MemoryTable {
    fn header(&self) -> &[String] {
        &self.header
    }

    fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    async fn append_row(&mut self, values: Vec<String>) -> Result<(), StoreError> {
        self.rows.push(values);
        Ok(())
    }

    async fn clear(&mut self) -> Result<(), StoreError> {
        self.rows.clear();
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TableFile {
    header: Vec<String>,
    #[serde(default)]
    rows: Vec<Vec<String>>,
}

/// JSON-file table rewritten through a temp file and atomic rename on every write.
#[derive(Debug, Clone)]
pub struct JsonFileTable {
    path: PathBuf,
    contents: TableFile,
}

impl JsonFileTable {
    /// Load an existing table (keeping its header as persisted) or create one with `schema`.
    pub async fn open_or_create(path: impl Into<PathBuf>, schema: Vec<String>) -> anyhow::Result<Self> {
        let path = path.into();
        if fs::try_exists(&path)
            .await
            .with_context(|| format!("checking table path {}", path.display()))?
        {
            let data = fs::read(&path)
                .await
                .with_context(|| format!("reading table {}", path.display()))?;
            let contents: TableFile = serde_json::from_slice(&data)
                .with_context(|| format!("parsing table {}", path.display()))?;
            info!(path = %path.display(), rows = contents.rows.len(), "opened record table");
            return Ok(Self { path, contents });
        }

        let table = Self {
            path,
            contents: TableFile {
                header: schema,
                rows: Vec::new(),
            },
        };
        table.persist().await?;
        info!(path = %table.path.display(), "created record table");
        Ok(table)
    }

    async fn persist(&self) -> anyhow::Result<()> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating table directory {}", parent.display()))?;

        let bytes = serde_json::to_vec_pretty(&self.contents).context("serializing record table")?;
        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));

        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp table file {}", temp_path.display()))?;
        file.write_all(&bytes)
            .await
            .with_context(|| format!("writing temp table file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp table file {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "atomically renaming temp table {} -> {}",
                    temp_path.display(),
                    self.path.display()
                )
            });
        }
        Ok(())
    }
}

#[async_trait]
impl TableBackend for JsonFileTable {
    fn header(&self) -> &[String] {
        &self.contents.header
    }

    fn rows(&self) -> &[Vec<String>] {
        &self.contents.rows
    }

    async fn append_row(&mut self, values: Vec<String>) -> Result<(), StoreError> {
        self.contents.rows.push(values);
        if let Err(err) = self.persist().await {
            self.contents.rows.pop();
            return Err(err.into());
        }
        Ok(())
    }

    async fn clear(&mut self) -> Result<(), StoreError> {
        let previous = std::mem::take(&mut self.contents.rows);
        if let Err(err) = self.persist().await {
            self.contents.rows = previous;
            return Err(err.into());
        }
        Ok(())
    }
}

/// Proof that a record was appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveReceipt {
    pub key: CanonicalField,
    pub value: String,
    pub row_number: usize,
}

fn column_index(header: &[String], field: CanonicalField) -> Option<usize> {
    header.iter().position(|name| name.trim() == field.as_str())
}

fn cell(row: &[String], idx: usize) -> &str {
    row.get(idx).map(String::as_str).unwrap_or_default()
}

/// Append-only store of certificates keyed by Folio, else CURP.
///
/// The duplicate check and the append run under one write guard; readers
/// never observe a partially written row.
pub struct RecordStore {
    table: RwLock<Box<dyn TableBackend>>,
}

impl RecordStore {
    pub fn new(backend: impl TableBackend + 'static) -> Self {
        Self {
            table: RwLock::new(Box::new(backend)),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryTable::open_or_create(canonical_header()))
    }

    pub async fn open_file(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let table = JsonFileTable::open_or_create(path, canonical_header()).await?;
        Ok(Self::new(table))
    }

    pub async fn append_if_new(&self, record: &CanonicalRecord) -> Result<SaveReceipt, StoreError> {
        let (key, value) = record
            .uniqueness_key()
            .ok_or(StoreError::MissingUniquenessKey)?;
        let span = info_span!("append_if_new", %key, value);
        self.append_keyed(record, key, value).instrument(span).await
    }

    async fn append_keyed(
        &self,
        record: &CanonicalRecord,
        key: CanonicalField,
        value: &str,
    ) -> Result<SaveReceipt, StoreError> {
        let mut table = self.table.write().await;
        let key_col = column_index(table.header(), key)
            .ok_or(StoreError::StructuralMismatch { column: key })?;
        // A CURP-keyed record only collides with rows that were themselves keyed by CURP.
        let folio_col = match key {
            CanonicalField::Curp => column_index(table.header(), CanonicalField::Folio),
            _ => None,
        };

        let duplicate = table.rows().iter().any(|row| {
            if let Some(folio_col) = folio_col {
                if !cell(row, folio_col).trim().is_empty() {
                    return false;
                }
            }
            cell(row, key_col).trim() == value
        });
        if duplicate {
            warn!("rejected duplicate certificate");
            return Err(StoreError::DuplicateRecord {
                key,
                value: value.to_string(),
            });
        }

        let row = table
            .header()
            .iter()
            .map(|name| {
                name.trim()
                    .parse::<CanonicalField>()
                    .map(|field| record.get(field).to_string())
                    .unwrap_or_default()
            })
            .collect::<Vec<_>>();
        table.append_row(row).await?;
        let row_number = table.rows().len();
        info!(row_number, "certificate recorded");

        Ok(SaveReceipt {
            key,
            value: value.to_string(),
            row_number,
        })
    }

    /// All persisted records in insertion order; fully empty rows are skipped.
    pub async fn list_all(&self) -> Vec<CanonicalRecord> {
        let table = self.table.read().await;
        let columns = table
            .header()
            .iter()
            .map(|name| name.trim().parse::<CanonicalField>().ok())
            .collect::<Vec<_>>();

        table
            .rows()
            .iter()
            .filter(|row| row.iter().any(|v| !v.trim().is_empty()))
            .map(|row| {
                let mut record = CanonicalRecord::empty();
                for (idx, field) in columns.iter().enumerate() {
                    if let Some(field) = field {
                        record.set(*field, cell(row, idx));
                    }
                }
                record
            })
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.table.read().await.rows().len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every row, keeping the header.
    pub async fn reset(&self) -> Result<(), StoreError> {
        let mut table = self.table.write().await;
        table.clear().await?;
        info!("record table reset");
        Ok(())
    }
}
