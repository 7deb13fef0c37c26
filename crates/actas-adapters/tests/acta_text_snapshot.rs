use std::path::{Path, PathBuf};

use actas_adapters::{DocumentTextExtractor, TextRuleSet};
use actas_core::CanonicalRecord;
use chrono::{Local, TimeZone};

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .expect("workspace root")
}

fn fixture_text() -> String {
    std::fs::read_to_string(workspace_root().join("fixtures/acta-text/acta.txt")).expect("read acta text")
}

fn expected_snapshot() -> CanonicalRecord {
    let text = std::fs::read_to_string(workspace_root().join("fixtures/acta-text/snapshot.json"))
        .expect("read snapshot");
    serde_json::from_str(&text).expect("parse snapshot")
}

fn scanned(mut record: CanonicalRecord) -> CanonicalRecord {
    record.fecha_escaneo = "2025-06-01 09:30:00".to_string();
    record
}

#[test]
fn golden_text_snapshot_builtin_rules() {
    let at = Local.with_ymd_and_hms(2025, 6, 1, 9, 30, 0).single().unwrap();
    let actual = DocumentTextExtractor::default()
        .extract_at(&fixture_text(), at)
        .expect("record found");
    assert_eq!(actual, scanned(expected_snapshot()));
}

#[test]
fn yaml_rule_file_matches_builtin_layout() {
    let rules = TextRuleSet::from_path(workspace_root().join("rules/text_rules.yaml")).expect("rules load");
    assert_eq!(rules.rules().len(), TextRuleSet::builtin().rules().len());

    let at = Local.with_ymd_and_hms(2025, 6, 1, 9, 30, 0).single().unwrap();
    let from_yaml = DocumentTextExtractor::new(rules)
        .extract_at(&fixture_text(), at)
        .expect("record found");
    assert_eq!(from_yaml, scanned(expected_snapshot()));
}
