use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// A document as the store hands it back: identity and write metadata
/// alongside the typed body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Stored<T> {
    pub id: String,
    pub created_at: String,
    pub updated_at: String,
    pub revision: i64,
    #[serde(flatten)]
    pub data: T,
}

/// Older records stored some references as numbers (`familyId: 12`).
fn de_loose_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match v {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(other) => Some(other.to_string()),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    #[default]
    Present,
    Absent,
}

impl AttendanceStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "present" => Some(AttendanceStatus::Present),
            "absent" => Some(AttendanceStatus::Absent),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAttendance {
    pub total_classes: u32,
    pub attended_classes: u32,
    pub percentage: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreEntry {
    pub date: String,
    pub marks: i64,
    pub max_marks: i64,
    pub percentage: i64,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceEntry {
    pub date: String,
    pub subject: String,
    pub status: AttendanceStatus,
    pub timestamp: String,
}

/// Append-only log.
///
/// Retention is unbounded unless a cap is passed to [`HistoryLog::append`];
/// with a cap, the oldest entries are dropped first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryLog<T>(Vec<T>);

impl<T> Default for HistoryLog<T> {
    fn default() -> Self {
        HistoryLog(Vec::new())
    }
}

impl<T> HistoryLog<T> {
    pub fn append(&mut self, entry: T, retention: Option<usize>) {
        self.0.push(entry);
        if let Some(cap) = retention {
            if self.0.len() > cap {
                let excess = self.0.len() - cap;
                self.0.drain(..excess);
            }
        }
    }

    pub fn entries(&self) -> &[T] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Student {
    pub name: String,
    pub age: Option<u32>,
    pub center: String,
    pub subjects: Vec<String>,
    #[serde(deserialize_with = "de_loose_string")]
    pub family_id: Option<String>,
    pub contact: Option<String>,
    pub education: Option<String>,
    pub enrollment_date: Option<String>,
    pub tutor_email: Option<String>,
    pub tutor: Option<String>,
    pub attendance: i64,
    pub subject_attendance: BTreeMap<String, SubjectAttendance>,
    pub subject_marks: BTreeMap<String, Vec<ScoreEntry>>,
    pub subject_averages: BTreeMap<String, i64>,
    pub last_test_score: Option<i64>,
    pub average_marks: Option<i64>,
    pub attendance_history: HistoryLog<AttendanceEntry>,
}

impl Student {
    /// Fresh enrolment: every subject starts at 0/0 classes and 100%.
    pub fn enrol(
        name: String,
        center: String,
        subjects: Vec<String>,
        enrollment_date: String,
    ) -> Self {
        let subject_attendance = subjects
            .iter()
            .map(|s| {
                (
                    s.clone(),
                    SubjectAttendance {
                        total_classes: 0,
                        attended_classes: 0,
                        percentage: 100,
                    },
                )
            })
            .collect();
        Student {
            name,
            center,
            subjects,
            enrollment_date: Some(enrollment_date),
            attendance: 100,
            last_test_score: Some(0),
            subject_attendance,
            ..Default::default()
        }
    }

    pub fn subject_attendance_for(&self, subject: &str) -> SubjectAttendance {
        self.subject_attendance
            .get(subject)
            .copied()
            .unwrap_or_default()
    }

    pub fn marks_for(&self, subject: &str) -> &[ScoreEntry] {
        self.subject_marks
            .get(subject)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Either assignment field, whichever is set.
    pub fn assigned_tutor(&self) -> Option<&str> {
        self.tutor_email
            .as_deref()
            .or(self.tutor.as_deref())
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FamilyStatus {
    #[default]
    Active,
    Inactive,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Family {
    pub family_name: String,
    pub head_of_family: Option<String>,
    pub contact: Option<String>,
    pub address: Option<String>,
    pub center: Option<String>,
    pub members: Option<u32>,
    pub status: FamilyStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TrainingStatus {
    #[default]
    Started,
    InProgress,
    Completed,
    #[serde(other)]
    NotStarted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    #[default]
    Unemployed,
    Employed,
    SelfEmployed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Woman {
    pub name: String,
    pub age: Option<u32>,
    pub skill: String,
    pub center: String,
    pub family: Option<String>,
    pub contact: Option<String>,
    pub training_status: TrainingStatus,
    pub job_status: JobStatus,
    pub employer: Option<String>,
    pub progress: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VolunteerStatus {
    Approved,
    Rejected,
    #[default]
    #[serde(other)]
    Pending,
}

impl VolunteerStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(VolunteerStatus::Pending),
            "approved" => Some(VolunteerStatus::Approved),
            "rejected" => Some(VolunteerStatus::Rejected),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VolunteerStatus::Pending => "pending",
            VolunteerStatus::Approved => "approved",
            VolunteerStatus::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Volunteer {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub skills: String,
    pub availability: String,
    pub experience: String,
    pub status: VolunteerStatus,
    pub registration_date: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttendanceRecord {
    pub student_id: String,
    pub date: String,
    pub subject: String,
    pub status: AttendanceStatus,
}
