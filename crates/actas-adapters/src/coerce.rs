use actas_core::CanonicalField;

/// Reorder a `DD/MM/YYYY` date into `YYYY-MM-DD`.
///
/// Segments are swapped without calendar validation. Anything that does not
/// split into exactly three `/` segments is returned trimmed but otherwise unchanged.
pub fn to_iso_date(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.split('/').collect::<Vec<_>>().as_slice() {
        [day, month, year] => format!("{year}-{month}-{day}"),
        _ => trimmed.to_string(),
    }
}

/// Map free-text sex descriptions to the `H`/`M` codes.
pub fn sex_code(raw: &str) -> String {
    let upper = raw.to_uppercase();
    if upper.contains("HOMBRE") {
        "H".to_string()
    } else if upper.contains("MUJER") {
        "M".to_string()
    } else {
        raw.trim().to_string()
    }
}

pub fn coerce_field(field: CanonicalField, value: &str) -> String {
    if field.is_date() {
        to_iso_date(value)
    } else if field == CanonicalField::Sexo {
        sex_code(value)
    } else {
        value.to_string()
    }
}
