//! Source adapters: label normalization, QR payload parsing, document-text
//! extraction, and the decoder/renderer contracts they sit behind.

use std::fs;
use std::path::Path;

use actas_core::CanonicalField;
use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

pub mod coerce;
pub mod normalize;
pub mod qr;
pub mod text;

pub use coerce::{coerce_field, sex_code, to_iso_date};
pub use normalize::{fold_label, AliasSpec, KeyNormalizer};
pub use qr::QrPayloadParser;
pub use text::{DocumentTextExtractor, PostProcess, TextRule, TextRuleSet, TextRuleSpec};

pub const CRATE_NAME: &str = "actas-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("invalid extraction rule for {field}: {reason}")]
    InvalidRule { field: CanonicalField, reason: String },
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("document could not be decoded: {0}")]
    Unreadable(String),
}

/// One rendered page: a raster image for QR detection plus its text layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedPage {
    pub image: Vec<u8>,
    pub text: String,
}

/// Image-to-payload QR decoding, provided by an external library.
pub trait QrDecoder: Send + Sync {
    fn decode(&self, image: &[u8]) -> Option<String>;
}

/// PDF page rendering, provided by an external library.
pub trait PdfRenderer: Send + Sync {
    fn pages(&self, pdf: &[u8]) -> Result<Vec<RenderedPage>, DecodeError>;
}

/// Fixture stand-in for a rendered document: per-page QR payload and text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageBundle {
    #[serde(default)]
    pub pages: Vec<BundlePage>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundlePage {
    #[serde(default)]
    pub qr_payload: Option<String>,
    #[serde(default)]
    pub text: String,
}

pub fn load_page_bundle(path: impl AsRef<Path>) -> Result<PageBundle> {
    read_json_file(path)
}

fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

/// Renders a JSON [`PageBundle`]; each page image carries its QR payload bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixturePageRenderer;

impl PdfRenderer for FixturePageRenderer {
    fn pages(&self, pdf: &[u8]) -> Result<Vec<RenderedPage>, DecodeError> {
        let bundle: PageBundle = serde_json::from_slice(pdf)
            .map_err(|e| DecodeError::Unreadable(format!("invalid page bundle: {e}")))?;
        Ok(bundle
            .pages
            .into_iter()
            .map(|page| RenderedPage {
                image: page.qr_payload.unwrap_or_default().into_bytes(),
                text: page.text,
            })
            .collect())
    }
}

/// Treats image bytes as an already-decoded UTF-8 payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8QrDecoder;

impl QrDecoder for Utf8QrDecoder {
    fn decode(&self, image: &[u8]) -> Option<String> {
        let text = std::str::from_utf8(image).ok()?.trim();
        if text.is_empty() {
            None
        } else {
            Some(text.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn workspace_root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .canonicalize()
            .expect("workspace root")
    }

    #[test]
    fn fixture_renderer_maps_pages_in_order() {
        let bytes = br#"{"pages":[{"qr_payload":"Folio:1","text":"uno"},{"text":"dos"}]}"#;
        let pages = FixturePageRenderer.pages(bytes).unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].image, b"Folio:1".to_vec());
        assert_eq!(pages[0].text, "uno");
        assert!(pages[1].image.is_empty());
        assert_eq!(pages[1].text, "dos");
    }

    #[test]
    fn fixture_renderer_rejects_non_bundle_bytes() {
        let err = FixturePageRenderer.pages(b"%PDF-1.7 binary").unwrap_err();
        assert!(matches!(err, DecodeError::Unreadable(_)));
    }

    #[test]
    fn utf8_decoder_skips_blank_and_binary_images() {
        assert_eq!(Utf8QrDecoder.decode(b"  Folio:9 \n"), Some("Folio:9".to_string()));
        assert_eq!(Utf8QrDecoder.decode(b"   "), None);
        assert_eq!(Utf8QrDecoder.decode(&[0xff, 0xfe, 0x00]), None);
    }

    #[test]
    fn sample_bundle_fixture_loads() {
        let bundle = load_page_bundle(workspace_root().join("fixtures/acta-qr/bundle.json")).unwrap();
        assert_eq!(bundle.pages.len(), 2);
        assert!(bundle.pages.iter().all(|p| p.qr_payload.is_some()));
    }
}
