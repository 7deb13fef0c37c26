//! Certificate ingestion service: configuration, QR/text pipeline, store
//! access and snapshot export.

use std::path::PathBuf;

use actas_adapters::{
    DocumentTextExtractor, FixturePageRenderer, KeyNormalizer, QrPayloadParser, TextRuleSet,
    Utf8QrDecoder,
};
use actas_core::{format_scan_timestamp, CanonicalRecord, ExtractionMethod};
use actas_storage::RecordStore;
use anyhow::{Context, Result};
use chrono::Local;
use serde::Serialize;
use tokio::fs;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub mod export;
pub mod pipeline;

pub use export::{ExportManifest, ExportManifestFile};
pub use pipeline::{IngestionOutcome, IngestionPipeline, NoneReason};

pub const CRATE_NAME: &str = "actas-ingest";

const DEFAULT_RULES_PATH: &str = "rules/text_rules.yaml";
const DEFAULT_ALIASES_PATH: &str = "rules/qr_aliases.yaml";

fn optional_path(var: &str, default: &str) -> Option<PathBuf> {
    std::env::var(var)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .or_else(|| {
            let default = PathBuf::from(default);
            default.exists().then_some(default)
        })
}

#[derive(Debug, Clone)]
pub struct ActasConfig {
    pub store_path: PathBuf,
    pub export_dir: PathBuf,
    pub rules_path: Option<PathBuf>,
    pub aliases_path: Option<PathBuf>,
}

impl ActasConfig {
    pub fn from_env() -> Self {
        Self {
            store_path: std::env::var("ACTAS_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./registro_actas.json")),
            export_dir: std::env::var("ACTAS_EXPORT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./exports")),
            rules_path: optional_path("ACTAS_RULES_PATH", DEFAULT_RULES_PATH),
            aliases_path: optional_path("ACTAS_ALIASES_PATH", DEFAULT_ALIASES_PATH),
        }
    }

    /// The configured YAML rule table, or the built-in layout when none is set.
    pub fn load_text_rules(&self) -> Result<TextRuleSet> {
        match &self.rules_path {
            Some(path) => TextRuleSet::from_path(path)
                .with_context(|| format!("loading text rules from {}", path.display())),
            None => Ok(TextRuleSet::builtin()),
        }
    }

    /// Built-in QR label aliases plus any configured in the alias file.
    pub fn load_key_normalizer(&self) -> Result<KeyNormalizer> {
        match &self.aliases_path {
            Some(path) => KeyNormalizer::from_path(path)
                .with_context(|| format!("loading QR aliases from {}", path.display())),
            None => Ok(KeyNormalizer::default()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveOutcome {
    pub accepted: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanOutcome {
    pub accepted: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<CanonicalRecord>,
}

impl ScanOutcome {
    fn rejected(message: impl Into<String>) -> Self {
        Self {
            accepted: false,
            message: message.into(),
            record: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub source_sha256: String,
    pub success: bool,
    pub message: String,
    pub method: ExtractionMethod,
    pub found: usize,
    pub accepted: usize,
    pub outcomes: Vec<ScanOutcome>,
    pub total_records: usize,
}

pub struct CertificateService {
    pipeline: IngestionPipeline,
    store: RecordStore,
    export_dir: PathBuf,
}

impl CertificateService {
    pub fn new(pipeline: IngestionPipeline, store: RecordStore, export_dir: impl Into<PathBuf>) -> Self {
        Self {
            pipeline,
            store,
            export_dir: export_dir.into(),
        }
    }

    /// File-backed store plus the fixture renderer/decoder pair.
    pub async fn from_config(config: &ActasConfig) -> Result<Self> {
        let rules = config.load_text_rules()?;
        let normalizer = config.load_key_normalizer()?;
        let pipeline = IngestionPipeline::new(Box::new(FixturePageRenderer), Box::new(Utf8QrDecoder))
            .with_qr_parser(QrPayloadParser::new(normalizer))
            .with_text_extractor(DocumentTextExtractor::new(rules));
        let store = RecordStore::open_file(&config.store_path)
            .await
            .with_context(|| format!("opening record store {}", config.store_path.display()))?;
        Ok(Self::new(pipeline, store, config.export_dir.clone()))
    }

    pub fn parse_qr_text(&self, text: &str) -> CanonicalRecord {
        self.pipeline.qr_parser().parse(text)
    }

    pub fn ingest_pdf(&self, bytes: &[u8]) -> IngestionOutcome {
        self.pipeline.ingest(bytes)
    }

    pub async fn save(&self, record: &CanonicalRecord) -> SaveOutcome {
        match self.store.append_if_new(record).await {
            Ok(receipt) => SaveOutcome {
                accepted: true,
                message: format!(
                    "certificate recorded ({}: {}) successfully",
                    receipt.key, receipt.value
                ),
            },
            Err(err) => SaveOutcome {
                accepted: false,
                message: err.to_string(),
            },
        }
    }

    pub async fn list_records(&self) -> Vec<CanonicalRecord> {
        self.store.list_all().await
    }

    pub async fn process_qr_text(&self, text: &str) -> ScanOutcome {
        if text.trim().is_empty() {
            return ScanOutcome::rejected("QR payload is empty");
        }
        let record = self.parse_qr_text(text);
        self.save_scanned(record).await
    }

    pub async fn process_qr_image(&self, image: &[u8]) -> ScanOutcome {
        if image.is_empty() {
            return ScanOutcome::rejected("no image received");
        }
        match self.pipeline.decode_image(image) {
            Some(payload) => self.process_qr_text(&payload).await,
            None => ScanOutcome::rejected("no QR code detected in the image"),
        }
    }

    /// Ingest a document and save every candidate independently.
    pub async fn process_pdf(&self, bytes: &[u8]) -> BatchReport {
        let run_id = Uuid::new_v4();
        self.process_pdf_run(run_id, bytes)
            .instrument(info_span!("process_pdf", %run_id))
            .await
    }

    async fn process_pdf_run(&self, run_id: Uuid, bytes: &[u8]) -> BatchReport {
        let source_sha256 = export::sha256_hex(bytes);
        let outcome = self.pipeline.ingest(bytes);
        let method = outcome.method();

        if let IngestionOutcome::NoneFound(reason) = &outcome {
            warn!(%reason, "no certificate found in document");
            return BatchReport {
                run_id,
                source_sha256,
                success: false,
                message: reason.to_string(),
                method,
                found: 0,
                accepted: 0,
                outcomes: Vec::new(),
                total_records: self.store.len().await,
            };
        }

        let candidates = outcome.into_candidates();
        let found = candidates.len();
        let mut outcomes = Vec::with_capacity(found);
        for record in candidates {
            outcomes.push(self.save_scanned(record).await);
        }
        let accepted = outcomes.iter().filter(|o| o.accepted).count();
        info!(%method, found, accepted, "document processed");

        BatchReport {
            run_id,
            source_sha256,
            success: true,
            message: format!("processed {accepted} records using {method}"),
            method,
            found,
            accepted,
            outcomes,
            total_records: self.store.len().await,
        }
    }

    /// Write every stored record to a parquet snapshot with a sha256 manifest.
    pub async fn export_snapshot(&self) -> Result<(PathBuf, ExportManifest)> {
        let records = self.store.list_all().await;
        let export_dir = self.export_dir.join(Uuid::new_v4().to_string());
        fs::create_dir_all(&export_dir)
            .await
            .with_context(|| format!("creating {}", export_dir.display()))?;

        let snapshot_path = export_dir.join(export::SNAPSHOT_FILE);
        export::write_records_parquet(&snapshot_path, &records)?;

        let manifest = ExportManifest {
            schema_version: 1,
            exported_at: format_scan_timestamp(Local::now()),
            record_count: records.len(),
            files: vec![export::manifest_entry("registro_actas", &export_dir, &snapshot_path)?],
        };
        let manifest_path = export_dir.join(export::MANIFEST_FILE);
        let bytes = serde_json::to_vec_pretty(&manifest).context("serializing export manifest")?;
        fs::write(&manifest_path, bytes)
            .await
            .with_context(|| format!("writing {}", manifest_path.display()))?;

        info!(records = records.len(), path = %manifest_path.display(), "snapshot exported");
        Ok((manifest_path, manifest))
    }

    pub async fn clear(&self) -> SaveOutcome {
        match self.store.reset().await {
            Ok(()) => SaveOutcome {
                accepted: true,
                message: "records cleared".to_string(),
            },
            Err(err) => SaveOutcome {
                accepted: false,
                message: format!("failed to clear records: {err}"),
            },
        }
    }

    async fn save_scanned(&self, record: CanonicalRecord) -> ScanOutcome {
        let saved = self.save(&record).await;
        ScanOutcome {
            accepted: saved.accepted,
            message: saved.message,
            record: Some(record),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actas_core::CanonicalField;

    fn service() -> CertificateService {
        let pipeline = IngestionPipeline::new(Box::new(FixturePageRenderer), Box::new(Utf8QrDecoder));
        CertificateService::new(pipeline, RecordStore::in_memory(), std::env::temp_dir())
    }

    #[tokio::test]
    async fn empty_qr_payload_is_rejected_before_parsing() {
        let outcome = service().process_qr_text("   ").await;
        assert!(!outcome.accepted);
        assert_eq!(outcome.message, "QR payload is empty");
        assert!(outcome.record.is_none());
    }

    #[tokio::test]
    async fn qr_without_key_is_reported_not_stored() {
        let svc = service();
        let outcome = svc.process_qr_text("Tomo:5,Libro:2").await;
        assert!(!outcome.accepted);
        assert_eq!(outcome.message, "record has neither Folio nor CURP");
        assert!(svc.list_records().await.is_empty());
    }

    #[tokio::test]
    async fn qr_image_without_code_is_reported() {
        let svc = service();
        let outcome = svc.process_qr_image(&[0xff, 0xd8, 0xff]).await;
        assert_eq!(outcome.message, "no QR code detected in the image");
        let outcome = svc.process_qr_image(b"Cadena:0901,CURP:HERA950302MDFRZN08").await;
        assert!(outcome.accepted, "{}", outcome.message);
        assert_eq!(outcome.record.unwrap().folio, "0901");
    }

    #[tokio::test]
    async fn save_then_list_round_trips() {
        let svc = service();
        let record = svc.parse_qr_text("Tomo:5,Libro:2,Acta:10,CURP:ABCD010101HDFRRL09");
        let saved = svc.save(&record).await;
        assert!(saved.accepted);
        assert_eq!(saved.message, "certificate recorded (CURP: ABCD010101HDFRRL09) successfully");

        let listed = svc.list_records().await;
        assert_eq!(listed.len(), 1);
        for field in CanonicalField::ALL {
            assert_eq!(listed[0].get(field), record.get(field), "{field}");
        }
    }

    #[tokio::test]
    async fn whitespace_separated_payload_is_saved_by_folio() {
        let svc = service();
        let outcome = svc.process_qr_text("Tomo:5 Libro:2 Acta:10 Folio:77").await;
        assert!(outcome.accepted, "{}", outcome.message);
        assert_eq!(outcome.message, "certificate recorded (Folio: 77) successfully");
        assert_eq!(svc.list_records().await[0].tomo, "5");
    }

    #[tokio::test]
    async fn clear_empties_the_store() {
        let svc = service();
        svc.process_qr_text("Cadena:1").await;
        assert!(svc.clear().await.accepted);
        assert!(svc.list_records().await.is_empty());
    }

    #[test]
    fn explicit_config_paths_must_exist() {
        let config = ActasConfig {
            store_path: PathBuf::from("unused.json"),
            export_dir: PathBuf::from("unused"),
            rules_path: Some(PathBuf::from("does/not/exist.yaml")),
            aliases_path: Some(PathBuf::from("does/not/exist.yaml")),
        };
        assert!(config.load_key_normalizer().is_err());
        assert!(config.load_text_rules().is_err());

        let config = ActasConfig {
            rules_path: None,
            aliases_path: None,
            ..config
        };
        assert_eq!(config.load_key_normalizer().unwrap().resolve("Cadena"), Some(CanonicalField::Folio));
        assert_eq!(
            config.load_text_rules().unwrap().rules().len(),
            TextRuleSet::builtin().rules().len()
        );
    }
}
