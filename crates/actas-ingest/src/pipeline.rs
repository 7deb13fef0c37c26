//! QR-first ingestion with a text fallback.

use actas_adapters::{DocumentTextExtractor, PdfRenderer, QrDecoder, QrPayloadParser, RenderedPage};
use actas_core::{CanonicalRecord, ExtractionMethod};
use chrono::{DateTime, Local};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoneReason {
    NothingMatched,
    DecodeFailure(String),
}

impl std::fmt::Display for NoneReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NoneReason::NothingMatched => {
                f.write_str("no QR codes were found and no data could be extracted from the text")
            }
            NoneReason::DecodeFailure(detail) => write!(f, "document could not be decoded: {detail}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestionOutcome {
    /// One record per decoded QR payload, in page order.
    Qr(Vec<CanonicalRecord>),
    Text(CanonicalRecord),
    NoneFound(NoneReason),
}

impl IngestionOutcome {
    pub fn method(&self) -> ExtractionMethod {
        match self {
            IngestionOutcome::Qr(_) => ExtractionMethod::Qr,
            IngestionOutcome::Text(_) => ExtractionMethod::Text,
            IngestionOutcome::NoneFound(_) => ExtractionMethod::None,
        }
    }

    pub fn candidates(&self) -> &[CanonicalRecord] {
        match self {
            IngestionOutcome::Qr(records) => records,
            IngestionOutcome::Text(record) => std::slice::from_ref(record),
            IngestionOutcome::NoneFound(_) => &[],
        }
    }

    pub fn into_candidates(self) -> Vec<CanonicalRecord> {
        match self {
            IngestionOutcome::Qr(records) => records,
            IngestionOutcome::Text(record) => vec![record],
            IngestionOutcome::NoneFound(_) => Vec::new(),
        }
    }
}

enum Stage {
    Start,
    TryQr(Vec<RenderedPage>),
    TryText(Vec<RenderedPage>),
    Done(IngestionOutcome),
}

pub struct IngestionPipeline {
    renderer: Box<dyn PdfRenderer>,
    decoder: Box<dyn QrDecoder>,
    qr_parser: QrPayloadParser,
    text_extractor: DocumentTextExtractor,
}

impl IngestionPipeline {
    pub fn new(renderer: Box<dyn PdfRenderer>, decoder: Box<dyn QrDecoder>) -> Self {
        Self {
            renderer,
            decoder,
            qr_parser: QrPayloadParser::default(),
            text_extractor: DocumentTextExtractor::default(),
        }
    }

    pub fn with_text_extractor(mut self, text_extractor: DocumentTextExtractor) -> Self {
        self.text_extractor = text_extractor;
        self
    }

    pub fn with_qr_parser(mut self, qr_parser: QrPayloadParser) -> Self {
        self.qr_parser = qr_parser;
        self
    }

    pub fn qr_parser(&self) -> &QrPayloadParser {
        &self.qr_parser
    }

    pub fn decode_image(&self, image: &[u8]) -> Option<String> {
        self.decoder.decode(image)
    }

    pub fn ingest(&self, source: &[u8]) -> IngestionOutcome {
        self.ingest_at(source, Local::now())
    }

    /// Every page is tried for a QR code first; the text channel is only
    /// consulted when no page decodes. Results from the two channels are
    /// never mixed.
    pub fn ingest_at(&self, source: &[u8], scanned_at: DateTime<Local>) -> IngestionOutcome {
        let mut stage = Stage::Start;
        loop {
            stage = match stage {
                Stage::Start => match self.renderer.pages(source) {
                    Ok(pages) => {
                        debug!(pages = pages.len(), "document rendered");
                        Stage::TryQr(pages)
                    }
                    Err(err) => {
                        warn!(error = %err, "document rendering failed");
                        Stage::Done(IngestionOutcome::NoneFound(NoneReason::DecodeFailure(
                            err.to_string(),
                        )))
                    }
                },
                Stage::TryQr(pages) => {
                    let records = pages
                        .iter()
                        .filter_map(|page| self.decoder.decode(&page.image))
                        .map(|payload| self.qr_parser.parse_at(&payload, scanned_at))
                        .collect::<Vec<_>>();
                    if records.is_empty() {
                        Stage::TryText(pages)
                    } else {
                        info!(found = records.len(), "QR codes decoded");
                        Stage::Done(IngestionOutcome::Qr(records))
                    }
                }
                Stage::TryText(pages) => {
                    let full_text = pages
                        .iter()
                        .map(|page| page.text.as_str())
                        .collect::<Vec<_>>()
                        .join("\n");
                    match self.text_extractor.extract_at(&full_text, scanned_at) {
                        Some(record) => {
                            info!("certificate recovered from document text");
                            Stage::Done(IngestionOutcome::Text(record))
                        }
                        None => Stage::Done(IngestionOutcome::NoneFound(NoneReason::NothingMatched)),
                    }
                }
                Stage::Done(outcome) => return outcome,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actas_adapters::{DecodeError, FixturePageRenderer, Utf8QrDecoder};
    use chrono::TimeZone;

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 6, 1, 9, 30, 0).single().unwrap()
    }

    fn pipeline() -> IngestionPipeline {
        IngestionPipeline::new(Box::new(FixturePageRenderer), Box::new(Utf8QrDecoder))
    }

    struct BrokenRenderer;

    impl PdfRenderer for BrokenRenderer {
        fn pages(&self, _pdf: &[u8]) -> Result<Vec<RenderedPage>, DecodeError> {
            Err(DecodeError::Unreadable("truncated xref table".to_string()))
        }
    }

    #[test]
    fn qr_pages_win_and_text_is_ignored() {
        let bundle = r#"{"pages":[
            {"text":"Identificador Electrónico 111"},
            {"qr_payload":"Tomo:5,Libro:2,Acta:10,CURP:ABCD010101HDFRRL09","text":""}
        ]}"#.as_bytes();
        let outcome = pipeline().ingest_at(bundle, at());
        assert_eq!(outcome.method(), ExtractionMethod::Qr);
        let records = outcome.into_candidates();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].curp, "ABCD010101HDFRRL09");
        assert_eq!(records[0].folio, "");
    }

    #[test]
    fn text_fallback_concatenates_pages() {
        let bundle = r#"{"pages":[
            {"text":"Identificador Electrónico 0901"},
            {"text":"Sexo: MUJER"}
        ]}"#.as_bytes();
        let outcome = pipeline().ingest_at(bundle, at());
        assert_eq!(outcome.method(), ExtractionMethod::Text);
        let record = &outcome.candidates()[0];
        assert_eq!(record.folio, "0901");
        assert_eq!(record.sexo, "M");
        assert_eq!(record.fecha_escaneo, "2025-06-01 09:30:00");
    }

    #[test]
    fn nothing_found_yields_no_candidates() {
        let outcome = pipeline().ingest_at(br#"{"pages":[{"text":"Recibo de pago"}]}"#, at());
        assert_eq!(outcome, IngestionOutcome::NoneFound(NoneReason::NothingMatched));
        assert_eq!(outcome.method(), ExtractionMethod::None);
        assert!(outcome.into_candidates().is_empty());
    }

    #[test]
    fn render_failure_is_not_fatal() {
        let pipeline = IngestionPipeline::new(Box::new(BrokenRenderer), Box::new(Utf8QrDecoder));
        match pipeline.ingest_at(b"%PDF", at()) {
            IngestionOutcome::NoneFound(NoneReason::DecodeFailure(detail)) => {
                assert!(detail.contains("truncated xref"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
