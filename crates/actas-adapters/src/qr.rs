use std::sync::LazyLock;

use actas_core::CanonicalRecord;
use chrono::{DateTime, Local};
use regex::Regex;

use crate::coerce::coerce_field;
use crate::normalize::KeyNormalizer;

static CURP_SPLIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)([^,])(curp)").expect("valid regex"));
static PADRE_SPLIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)([^,])(padre)").expect("valid regex"));

// A label ends at a colon and starts with a letter. Multi-word labels need the
// payload start or a separator before them; after plain whitespace only a
// single word qualifies, so values like `CIUDAD DE MEXICO` or `10:30:00` stay whole.
static LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:(?:\A|[,;|\r\n])[ \t]*([^\W\d_][\w \t]*)|[ \t]+([^\W\d_]\w*)):")
        .expect("valid regex")
});

/// Insert a `,` before `CURP`/`Padre` tokens glued to the preceding value.
pub fn presplit(qr_text: &str) -> String {
    let text = CURP_SPLIT.replace_all(qr_text, "${1},${2}");
    PADRE_SPLIT.replace_all(&text, "${1},${2}").into_owned()
}

/// Split a corrected payload into trimmed `(label, value)` pairs.
///
/// Text before the first label is dropped.
pub fn tokenize(text: &str) -> Vec<(&str, &str)> {
    let labels = LABEL
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let label = caps.get(1).or_else(|| caps.get(2))?;
            Some((whole.start(), whole.end(), label.as_str().trim()))
        })
        .collect::<Vec<_>>();

    labels
        .iter()
        .enumerate()
        .map(|(idx, (_, value_start, label))| {
            let value_end = labels.get(idx + 1).map_or(text.len(), |next| next.0);
            (*label, clean_value(&text[*value_start..value_end]))
        })
        .collect()
}

fn clean_value(raw: &str) -> &str {
    raw.trim_matches(|c: char| c.is_whitespace() || c == ',' || c == ';')
}

/// Parses the single-line payload printed in a certificate's QR code.
#[derive(Debug, Clone, Default)]
pub struct QrPayloadParser {
    normalizer: KeyNormalizer,
}

impl QrPayloadParser {
    pub fn new(normalizer: KeyNormalizer) -> Self {
        Self { normalizer }
    }

    pub fn parse(&self, qr_text: &str) -> CanonicalRecord {
        self.parse_at(qr_text, Local::now())
    }

    /// Later labels that resolve to the same field overwrite earlier ones.
    /// Empty input yields an all-empty record; validity is checked at save time.
    pub fn parse_at(&self, qr_text: &str, scanned_at: DateTime<Local>) -> CanonicalRecord {
        let corrected = presplit(qr_text);
        let mut record = CanonicalRecord::empty();
        for (label, value) in tokenize(&corrected) {
            match self.normalizer.resolve(label) {
                Some(field) => record.set(field, coerce_field(field, value)),
                None => record.set_extra(label, value),
            }
        }
        record.stamp_scanned_at(scanned_at);
        record
    }
}
