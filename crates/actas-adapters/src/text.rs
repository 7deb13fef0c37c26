//! Label-driven extraction of certificate fields from rendered document text.

use std::path::Path;
use std::sync::LazyLock;

use actas_core::{CanonicalField, CanonicalRecord};
use anyhow::Context;
use chrono::{DateTime, Local};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::coerce::{sex_code, to_iso_date};
use crate::AdapterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostProcess {
    #[default]
    Verbatim,
    Date,
    Sex,
}

impl PostProcess {
    fn apply(self, value: &str) -> String {
        match self {
            PostProcess::Verbatim => value.to_string(),
            PostProcess::Date => to_iso_date(value),
            PostProcess::Sex => sex_code(value),
        }
    }
}

/// Accented capitals that appear in entity and municipality names.
const UPPER: &str = "A-ZÁÉÍÓÚÜÑ";

fn builtin_rule_specs() -> Vec<TextRuleSpec> {
    let name_block = r"Nombre\(s\):\s*([^\n]+)\s*Primer Apellido:\s*([^\n]+)\s*Segundo Apellido:\s*([^\n]+)";
    let spec = |field, label_pattern: String, post| TextRuleSpec {
        field,
        label_pattern,
        post,
    };
    vec![
        spec(
            CanonicalField::Curp,
            r"Clave Única de Registro de Población\s*([A-Z0-9]{18})".into(),
            PostProcess::Verbatim,
        ),
        spec(
            CanonicalField::Folio,
            r"Identificador Electrónico\s*(\d+)".into(),
            PostProcess::Verbatim,
        ),
        spec(
            CanonicalField::Entidad,
            format!(r"Entidad de Registro\s*([{UPPER}][{UPPER} ]*)"),
            PostProcess::Verbatim,
        ),
        spec(
            CanonicalField::Municipio,
            format!(r"Municipio de Registro\s*([{UPPER}][{UPPER} ]*)"),
            PostProcess::Verbatim,
        ),
        spec(CanonicalField::Oficial, r"Oficialía\s*(\d+)".into(), PostProcess::Verbatim),
        spec(
            CanonicalField::FechaRegistro,
            r"Fecha de Registro\s*(\d{2}/\d{2}/\d{4})".into(),
            PostProcess::Date,
        ),
        spec(CanonicalField::Libro, r"Libro\s*(\d+)".into(), PostProcess::Verbatim),
        spec(CanonicalField::Acta, r"Número de Acta\s*(\d+)".into(), PostProcess::Verbatim),
        spec(CanonicalField::Registrado, name_block.into(), PostProcess::Verbatim),
        spec(CanonicalField::Sexo, r"Sexo:\s*([^\n]+)".into(), PostProcess::Sex),
        spec(
            CanonicalField::FechaNacimiento,
            r"Fecha de Nacimiento:\s*(\d{2}/\d{2}/\d{4})".into(),
            PostProcess::Date,
        ),
        spec(
            CanonicalField::Padre,
            format!(r"\bPadre\b:?\s*{name_block}"),
            PostProcess::Verbatim,
        ),
        spec(
            CanonicalField::Padre,
            r"Nombre del Padre:\s*([^\n]+)".into(),
            PostProcess::Verbatim,
        ),
        spec(
            CanonicalField::Madre,
            format!(r"\bMadre\b:?\s*{name_block}"),
            PostProcess::Verbatim,
        ),
        spec(
            CanonicalField::Madre,
            r"Nombre de la Madre:\s*([^\n]+)".into(),
            PostProcess::Verbatim,
        ),
    ]
}

static BUILTIN_RULES: LazyLock<TextRuleSet> = LazyLock::new(|| {
    TextRuleSet::from_specs(builtin_rule_specs()).expect("builtin text rules compile")
});

/// Serialized form of one extraction rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRuleSpec {
    pub field: CanonicalField,
    pub label_pattern: String,
    #[serde(default)]
    pub post: PostProcess,
}

#[derive(Debug, Clone, Deserialize)]
struct TextRulesFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    rules: Vec<TextRuleSpec>,
}

/// One `(field, label pattern, post-processor)` row of the extraction table.
#[derive(Debug, Clone)]
pub struct TextRule {
    pub field: CanonicalField,
    pub label_pattern: Regex,
    pub post: PostProcess,
}

impl TextRule {
    pub fn compile(spec: &TextRuleSpec) -> Result<Self, AdapterError> {
        let label_pattern =
            Regex::new(&spec.label_pattern).map_err(|e| AdapterError::InvalidRule {
                field: spec.field,
                reason: e.to_string(),
            })?;
        if label_pattern.captures_len() < 2 {
            return Err(AdapterError::InvalidRule {
                field: spec.field,
                reason: "pattern has no capture group".to_string(),
            });
        }
        Ok(Self {
            field: spec.field,
            label_pattern,
            post: spec.post,
        })
    }

    /// Captured groups joined by single spaces, post-processed.
    pub fn apply(&self, text: &str) -> Option<String> {
        let caps = self.label_pattern.captures(text)?;
        let joined = caps
            .iter()
            .skip(1)
            .flatten()
            .map(|m| m.as_str().trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if joined.is_empty() {
            return None;
        }
        Some(self.post.apply(&joined))
    }
}

#[derive(Debug, Clone)]
pub struct TextRuleSet {
    rules: Vec<TextRule>,
}

impl TextRuleSet {
    pub fn builtin() -> Self {
        BUILTIN_RULES.clone()
    }

    pub fn from_specs(specs: impl IntoIterator<Item = TextRuleSpec>) -> Result<Self, AdapterError> {
        let rules = specs
            .into_iter()
            .map(|spec| TextRule::compile(&spec))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, AdapterError> {
        let file: TextRulesFile = serde_yaml::from_str(yaml)
            .map_err(|e| AdapterError::Message(format!("invalid text rules file: {e}")))?;
        Self::from_specs(file.rules)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, AdapterError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&yaml)
    }

    pub fn rules(&self) -> &[TextRule] {
        &self.rules
    }
}

/// Recovers canonical fields from the concatenated text of a document.
#[derive(Debug, Clone)]
pub struct DocumentTextExtractor {
    rules: TextRuleSet,
}

impl Default for DocumentTextExtractor {
    fn default() -> Self {
        Self::new(TextRuleSet::builtin())
    }
}

impl DocumentTextExtractor {
    pub fn new(rules: TextRuleSet) -> Self {
        Self { rules }
    }

    pub fn extract(&self, full_text: &str) -> Option<CanonicalRecord> {
        self.extract_at(full_text, Local::now())
    }

    /// `None` when the text is blank or no rule matches anything.
    ///
    /// Rules are independent; when several target the same field the first
    /// match in table order wins. Fields without a rule stay empty.
    pub fn extract_at(&self, full_text: &str, scanned_at: DateTime<Local>) -> Option<CanonicalRecord> {
        if full_text.trim().is_empty() {
            return None;
        }

        let mut record = CanonicalRecord::empty();
        let mut matched = 0usize;
        for rule in self.rules.rules() {
            if !record.get(rule.field).is_empty() {
                continue;
            }
            if let Some(value) = rule.apply(full_text) {
                record.set(rule.field, value);
                matched += 1;
            }
        }
        debug!(matched, rules = self.rules.rules().len(), "text extraction finished");

        if matched == 0 {
            return None;
        }
        record.stamp_scanned_at(scanned_at);
        Some(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 6, 1, 9, 30, 0).single().unwrap()
    }

    #[test]
    fn inline_layout_extracts_each_field_independently() {
        let text = "Identificador Electrónico 0901\nLibro 3\nSexo: HOMBRE\nFecha de Nacimiento: 05/03/2020\n";
        let record = DocumentTextExtractor::default().extract_at(text, at()).unwrap();
        assert_eq!(record.folio, "0901");
        assert_eq!(record.libro, "3");
        assert_eq!(record.sexo, "H");
        assert_eq!(record.fecha_nacimiento, "2020-03-05");
        assert_eq!(record.curp, "");
        assert_eq!(record.tomo, "");
        assert_eq!(record.foja, "");
        assert_eq!(record.fecha_escaneo, "2025-06-01 09:30:00");
    }

    #[test]
    fn entity_stops_at_line_end() {
        let text = "Entidad de Registro\nJALISCO\nMunicipio de Registro\nZAPOPAN\n";
        let record = DocumentTextExtractor::default().extract_at(text, at()).unwrap();
        assert_eq!(record.entidad, "JALISCO");
        assert_eq!(record.municipio, "ZAPOPAN");
    }

    #[test]
    fn unrecognized_sex_passes_through() {
        let record = DocumentTextExtractor::default()
            .extract_at("Sexo: NO ESPECIFICADO", at())
            .unwrap();
        assert_eq!(record.sexo, "NO ESPECIFICADO");
    }

    #[test]
    fn parent_names_follow_generic_labels() {
        let text = "Nombre del Padre: PEDRO RUIZ\nNombre de la Madre: ANA CANO\n";
        let record = DocumentTextExtractor::default().extract_at(text, at()).unwrap();
        assert_eq!(record.padre, "PEDRO RUIZ");
        assert_eq!(record.madre, "ANA CANO");
    }

    #[test]
    fn blank_or_unmatched_text_is_not_found() {
        let extractor = DocumentTextExtractor::default();
        assert!(extractor.extract_at("", at()).is_none());
        assert!(extractor.extract_at(" \n\t", at()).is_none());
        assert!(extractor.extract_at("Recibo de pago 123", at()).is_none());
    }

    #[test]
    fn yaml_rules_replace_the_builtin_layout() {
        let yaml = r#"
version: 1
rules:
  - field: Tomo
    label_pattern: 'Tomo\s+(\d+)'
  - field: FechaRegistro
    label_pattern: 'Registrada el\s+(\S+)'
    post: date
"#;
        let extractor = DocumentTextExtractor::new(TextRuleSet::from_yaml_str(yaml).unwrap());
        let record = extractor
            .extract_at("Tomo 7\nRegistrada el 01/02/2003", at())
            .unwrap();
        assert_eq!(record.tomo, "7");
        assert_eq!(record.fecha_registro, "2003-02-01");
    }

    #[test]
    fn rules_without_capture_groups_are_rejected() {
        let err = TextRuleSet::from_specs([TextRuleSpec {
            field: CanonicalField::Acta,
            label_pattern: r"Número de Acta \d+".into(),
            post: PostProcess::Verbatim,
        }])
        .unwrap_err();
        assert!(matches!(err, AdapterError::InvalidRule { field: CanonicalField::Acta, .. }));
    }

    #[test]
    fn bad_regex_is_rejected() {
        let err = TextRuleSet::from_yaml_str("version: 1\nrules:\n  - field: Acta\n    label_pattern: '(unclosed'\n")
            .unwrap_err();
        assert!(matches!(err, AdapterError::InvalidRule { .. }));
    }
}
