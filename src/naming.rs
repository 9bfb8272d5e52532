//! Identifier derivation for tree nodes.
//!
//! Series ids are `<number>_<description>`, study ids are
//! `<description>_<date>_<time>` and image labels are zero-padded instance
//! numbers. Every rule here is deterministic so a folder rescan produces the
//! same identifiers as the mutation that created the files.

use std::path::Path;

use uuid::Uuid;

pub const UNKNOWN_SUBJECT: &str = "Unknown";
pub const DEFAULT_STUDY_DESCRIPTION: &str = "Study";
pub const DEFAULT_SERIES_DESCRIPTION: &str = "Series";

pub fn subject_id(patient_id: Option<&str>) -> String {
    patient_id
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(UNKNOWN_SUBJECT)
        .to_string()
}

pub fn study_id(description: Option<&str>, date: &str, time: &str) -> String {
    let description = non_empty(description).unwrap_or(DEFAULT_STUDY_DESCRIPTION);
    format!("{}_{}_{}", description, date.trim(), time.trim())
}

/// Replaces the description part of a study id, keeping its date and time.
pub fn with_study_description(study_id: &str, description: &str) -> String {
    let mut parts = study_id.rsplitn(3, '_');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(time), Some(date), Some(_)) => study_id_from_parts(description, date, time),
        _ => description.trim().to_string(),
    }
}

fn study_id_from_parts(description: &str, date: &str, time: &str) -> String {
    study_id(Some(description), date, time)
}

pub fn series_id(number: Option<i64>, description: Option<&str>) -> String {
    match (number, non_empty(description)) {
        (Some(number), Some(description)) => format!("{number}_{description}"),
        (Some(number), None) => number.to_string(),
        (None, Some(description)) => description.to_string(),
        (None, None) => DEFAULT_SERIES_DESCRIPTION.to_string(),
    }
}

pub fn series_number(series_id: &str) -> Option<i64> {
    let head = series_id.split('_').next()?;
    if head.is_empty() || !head.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    head.parse().ok()
}

/// The description part of a series id, without its number prefix.
pub fn series_description(series_id: &str) -> &str {
    match series_number(series_id) {
        Some(_) => series_id
            .split_once('_')
            .map_or("", |(_, description)| description),
        None => series_id,
    }
}

/// Replaces the description part of a series id, keeping its number.
pub fn with_series_description(series_id_value: &str, description: &str) -> String {
    series_id(series_number(series_id_value), Some(description))
}

/// Highest series number among `sibling_ids` plus one, or 1 when none carry
/// a number.
pub fn next_series_number<'a>(sibling_ids: impl IntoIterator<Item = &'a str>) -> i64 {
    sibling_ids
        .into_iter()
        .filter_map(series_number)
        .max()
        .map_or(1, |max| max + 1)
}

pub fn image_label(instance_number: Option<i64>, path: &Path) -> String {
    match instance_number {
        Some(number) if number >= 0 => format!("{number:06}"),
        _ => path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default(),
    }
}

/// A fresh DICOM UID in the UUID-derived `2.25.` form.
pub fn new_uid() -> String {
    format!("2.25.{}", Uuid::new_v4().as_u128())
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
