use std::collections::HashMap;
use std::path::Path;

use actas_core::CanonicalField;
use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::AdapterError;

const BUILTIN_ALIASES: &[(&str, CanonicalField)] = &[
    ("padre1", CanonicalField::Padre),
    ("padre2", CanonicalField::Madre),
    ("registrado", CanonicalField::Registrado),
    ("curp", CanonicalField::Curp),
    ("tomo", CanonicalField::Tomo),
    ("libro", CanonicalField::Libro),
    ("foja", CanonicalField::Foja),
    ("acta", CanonicalField::Acta),
    ("entidad", CanonicalField::Entidad),
    ("municipio", CanonicalField::Municipio),
    ("fechanacimiento", CanonicalField::FechaNacimiento),
    ("sexo", CanonicalField::Sexo),
    ("fechaimpresion", CanonicalField::FechaRegistro),
    ("impreso en", CanonicalField::Oficial),
    ("cadena", CanonicalField::Folio),
    ("padre", CanonicalField::Padre),
    ("madre", CanonicalField::Madre),
    ("folio", CanonicalField::Folio),
    ("oficial", CanonicalField::Oficial),
    ("fecharegistro", CanonicalField::FechaRegistro),
    ("fechaescaneo", CanonicalField::FechaEscaneo),
];

/// Fold a raw label into its lookup form: lower-cased, whitespace removed,
/// acute accents dropped from vowels.
pub fn fold_label(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'á' => 'a',
            'é' => 'e',
            'í' => 'i',
            'ó' => 'o',
            'ú' | 'ü' => 'u',
            other => other,
        })
        .collect()
}

/// One configured `label -> field` alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasSpec {
    pub label: String,
    pub field: CanonicalField,
}

#[derive(Debug, Clone, Deserialize)]
struct AliasFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    aliases: Vec<AliasSpec>,
}

/// Maps free-text field labels onto canonical field names.
#[derive(Debug, Clone)]
pub struct KeyNormalizer {
    aliases: HashMap<String, CanonicalField>,
}

impl Default for KeyNormalizer {
    fn default() -> Self {
        let aliases = BUILTIN_ALIASES
            .iter()
            .map(|(alias, field)| (fold_label(alias), *field))
            .collect();
        Self { aliases }
    }
}

impl KeyNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_alias(mut self, raw: &str, field: CanonicalField) -> Self {
        self.aliases.insert(fold_label(raw), field);
        self
    }

    pub fn with_aliases(self, specs: impl IntoIterator<Item = AliasSpec>) -> Self {
        specs
            .into_iter()
            .fold(self, |normalizer, spec| normalizer.with_alias(&spec.label, spec.field))
    }

    /// Built-in aliases extended with the `aliases:` list of a YAML file.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, AdapterError> {
        let file: AliasFile = serde_yaml::from_str(yaml)
            .map_err(|e| AdapterError::Message(format!("invalid alias file: {e}")))?;
        if let Some(spec) = file.aliases.iter().find(|a| fold_label(&a.label).is_empty()) {
            return Err(AdapterError::Message(format!(
                "alias for {} has an empty label",
                spec.field
            )));
        }
        Ok(Self::default().with_aliases(file.aliases))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, AdapterError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&yaml)
    }

    pub fn resolve(&self, raw_key: &str) -> Option<CanonicalField> {
        self.aliases.get(&fold_label(raw_key)).copied()
    }

    /// Canonical name for `raw_key`, or `raw_key` itself when no alias matches.
    pub fn normalize(&self, raw_key: &str) -> String {
        match self.resolve(raw_key) {
            Some(field) => field.as_str().to_string(),
            None => raw_key.to_string(),
        }
    }
}
