//! Volunteer list CSV export and import.
//!
//! Columns are fixed: `Name, Email, Phone, Skills, Availability, Experience,
//! Status, Registration Date`. Import expects the same header row.

use crate::models::{Volunteer, VolunteerStatus};
use serde::Deserialize;
use std::io::{Read, Write};
use std::path::Path;

pub const VOLUNTEER_HEADERS: [&str; 8] = [
    "Name",
    "Email",
    "Phone",
    "Skills",
    "Availability",
    "Experience",
    "Status",
    "Registration Date",
];

pub const DEFAULT_EXPORT_NAME: &str = "kalams_volunteers.csv";

#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("unexpected header row: {0}")]
    Header(String),
}

impl ExchangeError {
    pub fn code(&self) -> &'static str {
        match self {
            ExchangeError::Io(_) => "io_failed",
            ExchangeError::Csv(_) | ExchangeError::Header(_) => "bad_csv",
        }
    }
}

#[derive(Debug, Deserialize)]
struct VolunteerRow {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Email")]
    email: String,
    #[serde(rename = "Phone")]
    phone: String,
    #[serde(rename = "Skills")]
    skills: String,
    #[serde(rename = "Availability")]
    availability: String,
    #[serde(rename = "Experience")]
    experience: String,
    #[serde(rename = "Status")]
    status: String,
    #[serde(rename = "Registration Date")]
    registration_date: String,
}

impl From<&Volunteer> for VolunteerRow {
    fn from(v: &Volunteer) -> Self {
        VolunteerRow {
            name: v.name.clone(),
            email: v.email.clone(),
            phone: v.phone.clone(),
            skills: v.skills.clone(),
            availability: v.availability.clone(),
            experience: v.experience.clone(),
            status: v.status.as_str().to_string(),
            registration_date: v.registration_date.clone(),
        }
    }
}

impl From<VolunteerRow> for Volunteer {
    fn from(r: VolunteerRow) -> Self {
        Volunteer {
            name: r.name,
            email: r.email,
            phone: r.phone,
            skills: r.skills,
            availability: r.availability,
            experience: r.experience,
            status: VolunteerStatus::parse(&r.status).unwrap_or_default(),
            registration_date: r.registration_date,
        }
    }
}

pub fn write_volunteers<'a, W, I>(out: W, volunteers: I) -> Result<usize, ExchangeError>
where
    W: Write,
    I: IntoIterator<Item = &'a Volunteer>,
{
    let mut wtr = csv::Writer::from_writer(out);
    // Header is written explicitly so an empty export still carries it.
    wtr.write_record(VOLUNTEER_HEADERS)?;
    let mut count = 0usize;
    for v in volunteers {
        let row = VolunteerRow::from(v);
        wtr.write_record([
            &row.name,
            &row.email,
            &row.phone,
            &row.skills,
            &row.availability,
            &row.experience,
            &row.status,
            &row.registration_date,
        ])?;
        count += 1;
    }
    wtr.flush()?;
    Ok(count)
}

pub fn export_volunteers<'a, I>(path: &Path, volunteers: I) -> Result<usize, ExchangeError>
where
    I: IntoIterator<Item = &'a Volunteer>,
{
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = std::fs::File::create(path)?;
    let count = write_volunteers(file, volunteers)?;
    log::info!("exported {} volunteers to {}", count, path.display());
    Ok(count)
}

pub fn read_volunteers<R: Read>(input: R) -> Result<Vec<Volunteer>, ExchangeError> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(input);
    let headers = rdr.headers()?.clone();
    let matches = headers.len() == VOLUNTEER_HEADERS.len()
        && headers.iter().zip(VOLUNTEER_HEADERS).all(|(a, b)| a == b);
    if !matches {
        return Err(ExchangeError::Header(headers.iter().collect::<Vec<_>>().join(",")));
    }
    let mut out = Vec::new();
    for row in rdr.deserialize::<VolunteerRow>() {
        out.push(Volunteer::from(row?));
    }
    Ok(out)
}

pub fn import_volunteers(path: &Path) -> Result<Vec<Volunteer>, ExchangeError> {
    let file = std::fs::File::open(path)?;
    read_volunteers(file)
}
