//! Core domain model for civil-registry certificate records.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "actas-core";

/// Format used for the capture timestamp stamped on every extracted record.
pub const SCAN_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub const FIELD_COUNT: usize = 16;

/// One column of the canonical certificate layout, in persisted order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CanonicalField {
    Tomo,
    Libro,
    Foja,
    Acta,
    Entidad,
    Municipio,
    #[serde(rename = "CURP")]
    Curp,
    Registrado,
    Padre,
    Madre,
    FechaNacimiento,
    Sexo,
    FechaRegistro,
    Oficial,
    Folio,
    FechaEscaneo,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; FIELD_COUNT] = [
        CanonicalField::Tomo,
        CanonicalField::Libro,
        CanonicalField::Foja,
        CanonicalField::Acta,
        CanonicalField::Entidad,
        CanonicalField::Municipio,
        CanonicalField::Curp,
        CanonicalField::Registrado,
        CanonicalField::Padre,
        CanonicalField::Madre,
        CanonicalField::FechaNacimiento,
        CanonicalField::Sexo,
        CanonicalField::FechaRegistro,
        CanonicalField::Oficial,
        CanonicalField::Folio,
        CanonicalField::FechaEscaneo,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CanonicalField::Tomo => "Tomo",
            CanonicalField::Libro => "Libro",
            CanonicalField::Foja => "Foja",
            CanonicalField::Acta => "Acta",
            CanonicalField::Entidad => "Entidad",
            CanonicalField::Municipio => "Municipio",
            CanonicalField::Curp => "CURP",
            CanonicalField::Registrado => "Registrado",
            CanonicalField::Padre => "Padre",
            CanonicalField::Madre => "Madre",
            CanonicalField::FechaNacimiento => "FechaNacimiento",
            CanonicalField::Sexo => "Sexo",
            CanonicalField::FechaRegistro => "FechaRegistro",
            CanonicalField::Oficial => "Oficial",
            CanonicalField::Folio => "Folio",
            CanonicalField::FechaEscaneo => "FechaEscaneo",
        }
    }

    /// Column position in the persisted header.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn is_date(self) -> bool {
        matches!(
            self,
            CanonicalField::FechaNacimiento | CanonicalField::FechaRegistro
        )
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownField(pub String);

impl fmt::Display for UnknownField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown canonical field `{}`", self.0)
    }
}

impl std::error::Error for UnknownField {}

impl FromStr for CanonicalField {
    type Err = UnknownField;

    /// Exact canonical name lookup; label normalization lives in the adapters.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CanonicalField::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| UnknownField(s.to_string()))
    }
}

/// Canonical header row, in persisted column order.
pub fn canonical_header() -> Vec<String> {
    CanonicalField::ALL
        .iter()
        .map(|f| f.as_str().to_string())
        .collect()
}

/// Normalized 16-field representation of one certificate.
///
/// Missing values are empty strings. Labels that could not be resolved to a
/// canonical field are kept verbatim in `extra` and are not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct CanonicalRecord {
    pub tomo: String,
    pub libro: String,
    pub foja: String,
    pub acta: String,
    pub entidad: String,
    pub municipio: String,
    #[serde(rename = "CURP")]
    pub curp: String,
    pub registrado: String,
    pub padre: String,
    pub madre: String,
    pub fecha_nacimiento: String,
    pub sexo: String,
    pub fecha_registro: String,
    pub oficial: String,
    pub folio: String,
    pub fecha_escaneo: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl CanonicalRecord {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, field: CanonicalField) -> &str {
        match field {
            CanonicalField::Tomo => &self.tomo,
            CanonicalField::Libro => &self.libro,
            CanonicalField::Foja => &self.foja,
            CanonicalField::Acta => &self.acta,
            CanonicalField::Entidad => &self.entidad,
            CanonicalField::Municipio => &self.municipio,
            CanonicalField::Curp => &self.curp,
            CanonicalField::Registrado => &self.registrado,
            CanonicalField::Padre => &self.padre,
            CanonicalField::Madre => &self.madre,
            CanonicalField::FechaNacimiento => &self.fecha_nacimiento,
            CanonicalField::Sexo => &self.sexo,
            CanonicalField::FechaRegistro => &self.fecha_registro,
            CanonicalField::Oficial => &self.oficial,
            CanonicalField::Folio => &self.folio,
            CanonicalField::FechaEscaneo => &self.fecha_escaneo,
        }
    }

    fn slot_mut(&mut self, field: CanonicalField) -> &mut String {
        match field {
            CanonicalField::Tomo => &mut self.tomo,
            CanonicalField::Libro => &mut self.libro,
            CanonicalField::Foja => &mut self.foja,
            CanonicalField::Acta => &mut self.acta,
            CanonicalField::Entidad => &mut self.entidad,
            CanonicalField::Municipio => &mut self.municipio,
            CanonicalField::Curp => &mut self.curp,
            CanonicalField::Registrado => &mut self.registrado,
            CanonicalField::Padre => &mut self.padre,
            CanonicalField::Madre => &mut self.madre,
            CanonicalField::FechaNacimiento => &mut self.fecha_nacimiento,
            CanonicalField::Sexo => &mut self.sexo,
            CanonicalField::FechaRegistro => &mut self.fecha_registro,
            CanonicalField::Oficial => &mut self.oficial,
            CanonicalField::Folio => &mut self.folio,
            CanonicalField::FechaEscaneo => &mut self.fecha_escaneo,
        }
    }

    pub fn set(&mut self, field: CanonicalField, value: impl Into<String>) {
        *self.slot_mut(field) = value.into();
    }

    pub fn set_extra(&mut self, label: impl Into<String>, value: impl Into<String>) {
        self.extra.insert(label.into(), value.into());
    }

    /// Stamp the capture timestamp; any value carried by the input is replaced.
    pub fn stamp_scanned_at(&mut self, scanned_at: DateTime<Local>) {
        self.fecha_escaneo = format_scan_timestamp(scanned_at);
    }

    /// Field that identifies this certificate: Folio when present, else CURP.
    pub fn uniqueness_key(&self) -> Option<(CanonicalField, &str)> {
        [CanonicalField::Folio, CanonicalField::Curp]
            .into_iter()
            .map(|f| (f, self.get(f).trim()))
            .find(|(_, v)| !v.is_empty())
    }

    /// True when no canonical field carries a value, ignoring the scan stamp.
    pub fn is_blank(&self) -> bool {
        CanonicalField::ALL
            .iter()
            .filter(|f| **f != CanonicalField::FechaEscaneo)
            .all(|f| self.get(*f).trim().is_empty())
    }
}

pub fn format_scan_timestamp(scanned_at: DateTime<Local>) -> String {
    scanned_at.format(SCAN_TIMESTAMP_FORMAT).to_string()
}

/// Channel a candidate record was recovered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMethod {
    Qr,
    Text,
    None,
}

impl ExtractionMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            ExtractionMethod::Qr => "qr",
            ExtractionMethod::Text => "text",
            ExtractionMethod::None => "none",
        }
    }
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn header_follows_canonical_order() {
        let header = canonical_header();
        assert_eq!(header.len(), FIELD_COUNT);
        assert_eq!(header[0], "Tomo");
        assert_eq!(header[6], "CURP");
        assert_eq!(header[15], "FechaEscaneo");
        for (idx, field) in CanonicalField::ALL.iter().enumerate() {
            assert_eq!(field.index(), idx);
            assert_eq!(field.as_str().parse::<CanonicalField>().unwrap(), *field);
        }
    }

    #[test]
    fn uniqueness_key_prefers_folio_then_curp() {
        let mut record = CanonicalRecord::empty();
        assert_eq!(record.uniqueness_key(), None);

        record.set(CanonicalField::Curp, "ABCD010101HDFRRL09");
        assert_eq!(
            record.uniqueness_key(),
            Some((CanonicalField::Curp, "ABCD010101HDFRRL09"))
        );

        record.set(CanonicalField::Folio, "  123456 ");
        assert_eq!(record.uniqueness_key(), Some((CanonicalField::Folio, "123456")));
    }

    #[test]
    fn serializes_with_canonical_names_and_flattened_extras() {
        let mut record = CanonicalRecord::empty();
        record.set(CanonicalField::Curp, "X");
        record.set(CanonicalField::FechaNacimiento, "2020-03-05");
        record.set_extra("Nacionalidad", "MEXICANA");

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["CURP"], "X");
        assert_eq!(value["FechaNacimiento"], "2020-03-05");
        assert_eq!(value["Tomo"], "");
        assert_eq!(value["Nacionalidad"], "MEXICANA");

        let back: CanonicalRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn scan_stamp_uses_fixed_format() {
        let at = Local.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).single().unwrap();
        let mut record = CanonicalRecord::empty();
        record.stamp_scanned_at(at);
        assert_eq!(record.fecha_escaneo, "2024-01-02 03:04:05");
        assert!(record.is_blank());
    }
}
