use crate::models::{AttendanceStatus, ScoreEntry, Student, SubjectAttendance};
use serde::Serialize;
use std::collections::BTreeMap;

/// Half-up rounding to a whole percent: `floor(x + 0.5)`.
pub fn round_half_up(x: f64) -> i64 {
    (x + 0.5).floor() as i64
}

pub fn percent_of(part: i64, whole: i64) -> i64 {
    if whole <= 0 {
        return 0;
    }
    round_half_up(100.0 * part as f64 / whole as f64)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CalcError {
    #[error("marks must be between 0 and {max_marks}, got {marks}")]
    MarksOutOfRange { marks: i64, max_marks: i64 },
    #[error("maxMarks must be positive, got {0}")]
    InvalidMaxMarks(i64),
    #[error("{subject}: attended {attended} of {total} classes")]
    AttendedExceedsTotal {
        subject: String,
        attended: u32,
        total: u32,
    },
    #[error("{subject}: {total} classes is more than {max}", max = MAX_CLASSES)]
    TooManyClasses { subject: String, total: u32 },
}

impl CalcError {
    pub fn code(&self) -> &'static str {
        match self {
            CalcError::MarksOutOfRange { .. } => "invalid_marks",
            CalcError::InvalidMaxMarks(_) => "bad_params",
            CalcError::AttendedExceedsTotal { .. } | CalcError::TooManyClasses { .. } => {
                "invalid_attendance"
            }
        }
    }
}

/// Upper bound on recorded classes per subject.
pub const MAX_CLASSES: u32 = 100_000;

pub fn validate_marks(marks: i64, max_marks: i64) -> Result<(), CalcError> {
    if max_marks <= 0 {
        return Err(CalcError::InvalidMaxMarks(max_marks));
    }
    if marks < 0 || marks > max_marks {
        return Err(CalcError::MarksOutOfRange { marks, max_marks });
    }
    Ok(())
}

/// Unrounded mean of the entries' percentages, or `fallback` when there are none.
pub fn subject_average(scores: &[ScoreEntry], fallback: f64) -> f64 {
    if scores.is_empty() {
        return fallback;
    }
    let sum: i64 = scores.iter().map(|s| s.percentage).sum();
    sum as f64 / scores.len() as f64
}

/// Mean over subjects of each subject's mean. A subject key with no entries
/// still counts in the denominator and contributes 0.
pub fn two_level_average(subject_marks: &BTreeMap<String, Vec<ScoreEntry>>) -> Option<f64> {
    if subject_marks.is_empty() {
        return None;
    }
    let total: f64 = subject_marks
        .values()
        .map(|scores| subject_average(scores, 0.0))
        .sum();
    Some(total / subject_marks.len() as f64)
}

pub fn student_overall_average(student: &Student) -> i64 {
    match two_level_average(&student.subject_marks) {
        Some(avg) => round_half_up(avg),
        None => student.last_test_score.unwrap_or(0),
    }
}

/// Unweighted mean of every subject's percentage, rounded. 0 when empty.
pub fn overall_attendance(subject_attendance: &BTreeMap<String, SubjectAttendance>) -> i64 {
    if subject_attendance.is_empty() {
        return 0;
    }
    let sum: i64 = subject_attendance.values().map(|a| a.percentage).sum();
    round_half_up(sum as f64 / subject_attendance.len() as f64)
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceOutcome {
    pub subject_attendance: BTreeMap<String, SubjectAttendance>,
    pub overall: i64,
}

pub fn validate_attendance(subject: &str, a: &SubjectAttendance) -> Result<(), CalcError> {
    if a.total_classes > MAX_CLASSES {
        return Err(CalcError::TooManyClasses {
            subject: subject.to_string(),
            total: a.total_classes,
        });
    }
    if a.attended_classes > a.total_classes {
        return Err(CalcError::AttendedExceedsTotal {
            subject: subject.to_string(),
            attended: a.attended_classes,
            total: a.total_classes,
        });
    }
    Ok(())
}

pub fn recompute_attendance(
    subject_attendance: &BTreeMap<String, SubjectAttendance>,
    subject: &str,
    status: AttendanceStatus,
) -> Result<AttendanceOutcome, CalcError> {
    let present = status == AttendanceStatus::Present;
    let mut updated = subject_attendance.clone();
    let entry = match updated.get(subject) {
        Some(cur) => {
            validate_attendance(subject, cur)?;
            let total = cur.total_classes + 1;
            let attended = cur.attended_classes + u32::from(present);
            let next = SubjectAttendance {
                total_classes: total,
                attended_classes: attended,
                percentage: percent_of(attended as i64, total as i64),
            };
            validate_attendance(subject, &next)?;
            next
        }
        None => SubjectAttendance {
            total_classes: 1,
            attended_classes: u32::from(present),
            percentage: if present { 100 } else { 0 },
        },
    };
    updated.insert(subject.to_string(), entry);
    let overall = overall_attendance(&updated);
    Ok(AttendanceOutcome {
        subject_attendance: updated,
        overall,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarksOutcome {
    pub subject_marks: BTreeMap<String, Vec<ScoreEntry>>,
    pub percentage: i64,
    pub subject_average: i64,
    pub overall_average: i64,
}

pub fn recompute_marks(
    subject_marks: &BTreeMap<String, Vec<ScoreEntry>>,
    subject: &str,
    marks: i64,
    max_marks: i64,
    date: &str,
    timestamp: &str,
) -> Result<MarksOutcome, CalcError> {
    validate_marks(marks, max_marks)?;

    let percentage = percent_of(marks, max_marks);
    let mut updated = subject_marks.clone();
    updated
        .entry(subject.to_string())
        .or_default()
        .push(ScoreEntry {
            date: date.to_string(),
            marks,
            max_marks,
            percentage,
            timestamp: timestamp.to_string(),
        });

    let subject_avg = round_half_up(subject_average(&updated[subject], 0.0));
    let overall = two_level_average(&updated)
        .map(round_half_up)
        .unwrap_or(subject_avg);

    Ok(MarksOutcome {
        subject_marks: updated,
        percentage,
        subject_average: subject_avg,
        overall_average: overall,
    })
}

/// Summed attended/total classes across subjects, for report headlines.
pub fn attendance_totals(subject_attendance: &BTreeMap<String, SubjectAttendance>) -> (u64, u64) {
    subject_attendance
        .values()
        .fold((0, 0), |(att, tot), a| {
            (
                att + u64::from(a.attended_classes),
                tot + u64::from(a.total_classes),
            )
        })
}

/// Checks a student's counts and marks, then rederives every computed field
/// from them.
///
/// Subject percentages come from the counts (a subject with no classes yet
/// reads 100%). Without any per-subject attendance the stored overall value
/// is kept, clamped to 0..=100.
pub fn normalize_student(student: &mut Student) -> Result<(), CalcError> {
    for (subject, a) in student.subject_attendance.iter_mut() {
        validate_attendance(subject, a)?;
        a.percentage = if a.total_classes == 0 {
            100
        } else {
            percent_of(a.attended_classes as i64, a.total_classes as i64)
        };
    }
    student.attendance = if student.subject_attendance.is_empty() {
        student.attendance.clamp(0, 100)
    } else {
        overall_attendance(&student.subject_attendance)
    };

    for entries in student.subject_marks.values_mut() {
        for e in entries.iter_mut() {
            validate_marks(e.marks, e.max_marks)?;
            e.percentage = percent_of(e.marks, e.max_marks);
        }
    }
    student.subject_averages = student
        .subject_marks
        .iter()
        .filter(|(_, entries)| !entries.is_empty())
        .map(|(subject, entries)| (subject.clone(), round_half_up(subject_average(entries, 0.0))))
        .collect();
    student.average_marks = two_level_average(&student.subject_marks).map(round_half_up);
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceBadge {
    Excellent,
    Good,
    NeedsAttention,
    AtRisk,
}

impl PerformanceBadge {
    pub fn label(self) -> &'static str {
        match self {
            PerformanceBadge::Excellent => "Excellent",
            PerformanceBadge::Good => "Good",
            PerformanceBadge::NeedsAttention => "Needs Attention",
            PerformanceBadge::AtRisk => "At Risk",
        }
    }
}

pub fn performance_badge(attendance: i64, last_test_score: i64) -> PerformanceBadge {
    if attendance >= 90 && last_test_score >= 85 {
        PerformanceBadge::Excellent
    } else if attendance >= 75 && last_test_score >= 70 {
        PerformanceBadge::Good
    } else if attendance >= 60 || last_test_score >= 50 {
        PerformanceBadge::NeedsAttention
    } else {
        PerformanceBadge::AtRisk
    }
}
