//! Reader for the browser-storage export the dashboard kept before the
//! document store existed: one JSON object whose keys hold arrays of records
//! (sometimes double-encoded as a JSON string).

use crate::calc;
use crate::models::{Family, Student, Volunteer, Woman};
use anyhow::Context;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::Path;

pub const STUDENTS_KEY: &str = "kalams_students_data";
pub const FAMILIES_KEY: &str = "kalams_families_data";
pub const WOMEN_KEY: &str = "kalams_women_data";
pub const VOLUNTEERS_KEY: &str = "kalams_volunteers";

#[derive(Debug, Default)]
pub struct LegacyExport {
    pub students: Vec<Student>,
    pub families: Vec<Family>,
    pub women: Vec<Woman>,
    pub volunteers: Vec<Volunteer>,
    pub skipped: Vec<String>,
}

fn section(root: &Value, key: &str) -> anyhow::Result<Vec<Value>> {
    let Some(raw) = root.get(key) else {
        return Ok(Vec::new());
    };
    let value = match raw {
        Value::String(s) => serde_json::from_str::<Value>(s)
            .with_context(|| format!("{} holds a string that is not JSON", key))?,
        other => other.clone(),
    };
    match value {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        _ => anyhow::bail!("{} must be an array", key),
    }
}

fn read_section<T: DeserializeOwned>(
    root: &Value,
    key: &str,
    skipped: &mut Vec<String>,
) -> anyhow::Result<Vec<T>> {
    read_checked(root, key, skipped, |_| Ok(()))
}

/// Entries that do not parse, or that `check` refuses, are skipped.
fn read_checked<T, F>(
    root: &Value,
    key: &str,
    skipped: &mut Vec<String>,
    check: F,
) -> anyhow::Result<Vec<T>>
where
    T: DeserializeOwned,
    F: Fn(&mut T) -> Result<(), String>,
{
    let mut out = Vec::new();
    for (i, item) in section(root, key)?.into_iter().enumerate() {
        let parsed = serde_json::from_value::<T>(item)
            .map_err(|e| e.to_string())
            .and_then(|mut v| check(&mut v).map(|()| v));
        match parsed {
            Ok(v) => out.push(v),
            Err(e) => skipped.push(format!("{}[{}]: {}", key, i, e)),
        }
    }
    Ok(out)
}

pub fn parse_legacy_export(text: &str) -> anyhow::Result<LegacyExport> {
    let root: Value = serde_json::from_str(text).context("legacy export is not valid JSON")?;
    if !root.is_object() {
        anyhow::bail!("legacy export must be a JSON object");
    }
    let mut skipped = Vec::new();
    let students = read_checked(&root, STUDENTS_KEY, &mut skipped, |s: &mut Student| {
        calc::normalize_student(s).map_err(|e| e.to_string())
    })?;
    let families = read_section(&root, FAMILIES_KEY, &mut skipped)?;
    let women = read_section(&root, WOMEN_KEY, &mut skipped)?;
    let volunteers = read_section(&root, VOLUNTEERS_KEY, &mut skipped)?;
    Ok(LegacyExport {
        students,
        families,
        women,
        volunteers,
        skipped,
    })
}

pub fn read_legacy_export(path: &Path) -> anyhow::Result<LegacyExport> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read {}", path.display()))?;
    parse_legacy_export(&text)
}
