//! Parquet snapshot of the certificate table plus a hashed manifest.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use actas_core::{CanonicalField, CanonicalRecord};
use anyhow::{Context, Result};
use arrow_array::{ArrayRef, RecordBatch, StringArray};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const SNAPSHOT_FILE: &str = "registro_actas.parquet";
pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportManifest {
    pub schema_version: u32,
    pub exported_at: String,
    pub record_count: usize,
    pub files: Vec<ExportManifestFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// One Utf8 column per canonical field, in header order.
pub fn write_records_parquet(path: &Path, records: &[CanonicalRecord]) -> Result<()> {
    let schema = Arc::new(Schema::new(
        CanonicalField::ALL
            .iter()
            .map(|field| ArrowField::new(field.as_str(), DataType::Utf8, false))
            .collect::<Vec<_>>(),
    ));
    let columns = CanonicalField::ALL
        .iter()
        .map(|field| {
            Arc::new(StringArray::from(
                records.iter().map(|r| r.get(*field)).collect::<Vec<_>>(),
            )) as ArrayRef
        })
        .collect::<Vec<_>>();

    let batch = RecordBatch::try_new(schema, columns).context("building certificates record batch")?;
    write_parquet(path, batch)
}

fn write_parquet(path: &Path, batch: RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

pub fn manifest_entry(name: &str, export_dir: &Path, path: &Path) -> Result<ExportManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let rel = path
        .strip_prefix(export_dir)
        .unwrap_or(path)
        .display()
        .to_string();
    Ok(ExportManifestFile {
        name: name.to_string(),
        path: rel,
        sha256: sha256_hex(&bytes),
        bytes: bytes.len() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parquet::file::reader::{FileReader, SerializedFileReader};
    use tempfile::tempdir;

    #[test]
    fn parquet_snapshot_has_one_row_per_record() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join(SNAPSHOT_FILE);
        let mut a = CanonicalRecord::empty();
        a.set(CanonicalField::Folio, "1");
        let mut b = CanonicalRecord::empty();
        b.set(CanonicalField::Curp, "HERA950302MDFRZN08");
        write_records_parquet(&path, &[a, b]).unwrap();

        let reader = SerializedFileReader::new(File::open(&path).unwrap()).unwrap();
        let meta = reader.metadata();
        assert_eq!(meta.file_metadata().num_rows(), 2);
        assert_eq!(meta.file_metadata().schema_descr().num_columns(), 16);
        assert_eq!(meta.file_metadata().schema_descr().column(6).name(), "CURP");
    }

    #[test]
    fn manifest_entry_hashes_file_contents() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"abc").unwrap();
        let entry = manifest_entry("data", dir.path(), &path).unwrap();
        assert_eq!(entry.path, "data.bin");
        assert_eq!(entry.bytes, 3);
        assert_eq!(
            entry.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
