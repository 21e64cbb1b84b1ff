//! Bulk attendance and marks sessions.
//!
//! A session captures the scoped students at open time, collects one input
//! per student, then writes each record in turn. Writes are sequential and
//! stop at the first failure; records already written stay written.

use crate::calc::{self, CalcError};
use crate::live::LiveCollection;
use crate::models::{AttendanceEntry, AttendanceStatus, Stored, Student};
use crate::store::{now_stamp, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const DEFAULT_SUBJECT: &str = "English";
pub const DEFAULT_MAX_MARKS: i64 = 100;

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Role {
    Admin,
    Tutor { email: String },
}

/// Which students a signed-in user may see and act on.
///
/// Tutors also see every student assigned to one of the fallback addresses,
/// not only their own.
#[derive(Debug, Clone)]
pub struct TutorScope {
    role: Role,
    fallback: Vec<String>,
}

impl TutorScope {
    pub fn new(role: Role, fallback: &[String]) -> Self {
        TutorScope {
            role,
            fallback: fallback.to_vec(),
        }
    }

    pub fn admin() -> Self {
        TutorScope::new(Role::Admin, &[])
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn admits(&self, student: &Student) -> bool {
        let email = match &self.role {
            Role::Admin => return true,
            Role::Tutor { email } => email,
        };
        [student.tutor_email.as_deref(), student.tutor.as_deref()]
            .into_iter()
            .flatten()
            .any(|assigned| assigned == email || self.fallback.iter().any(|f| f == assigned))
    }

    pub fn filter<'a>(&self, students: &'a [Stored<Student>]) -> Vec<&'a Stored<Student>> {
        students.iter().filter(|s| self.admits(&s.data)).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowKind {
    Attendance,
    Marks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    OpenForInput,
    Submitting,
    Cancelled,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordInput {
    Status(AttendanceStatus),
    Marks(Option<i64>),
}

/// Why one record of a submit could not be written.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Calc(#[from] CalcError),
    #[error("no input recorded for {0}")]
    MissingInput(String),
}

impl RecordError {
    pub fn code(&self) -> &'static str {
        match self {
            RecordError::Store(e) => e.code(),
            RecordError::Calc(e) => e.code(),
            RecordError::MissingInput(_) => "bad_params",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("no students in scope")]
    NoStudentsInScope,
    #[error("student {0} is not part of this session")]
    UnknownStudent(String),
    #[error("session is not open for input")]
    NotOpen(SessionState),
    #[error("{0}")]
    BadInput(String),
    #[error("invalid marks for {name}: {source}")]
    InvalidMarks {
        student_id: String,
        name: String,
        source: CalcError,
    },
    #[error("cancelled after {persisted} of {total} records")]
    Cancelled { persisted: usize, total: usize },
    #[error("stopped after {persisted} of {total} records: {source}")]
    Partial {
        persisted: usize,
        total: usize,
        source: RecordError,
    },
}

impl WorkflowError {
    pub fn code(&self) -> &'static str {
        match self {
            WorkflowError::NoStudentsInScope => "no_students_in_scope",
            WorkflowError::UnknownStudent(_) => "not_found",
            WorkflowError::NotOpen(_) => "session_closed",
            WorkflowError::BadInput(_) => "bad_params",
            WorkflowError::InvalidMarks { source, .. } => source.code(),
            WorkflowError::Cancelled { .. } => "cancelled",
            WorkflowError::Partial { .. } => "bulk_partial_failure",
        }
    }
}

/// Where submitted records come from and go to.
pub trait StudentSink {
    fn current(&self, id: &str) -> Option<Stored<Student>>;
    fn write(
        &self,
        id: &str,
        record: &Student,
        expected_revision: i64,
    ) -> Result<Stored<Student>, StoreError>;
}

impl StudentSink for LiveCollection<Student> {
    fn current(&self, id: &str) -> Option<Stored<Student>> {
        self.find(id)
    }

    fn write(
        &self,
        id: &str,
        record: &Student,
        expected_revision: i64,
    ) -> Result<Stored<Student>, StoreError> {
        self.replace(id, record, Some(expected_revision))
    }
}

pub fn today() -> String {
    chrono::Utc::now().date_naive().format("%Y-%m-%d").to_string()
}

/// One attendance mark applied to a student: counts, overall percentage and
/// a history entry.
pub fn apply_attendance(
    student: &Student,
    subject: &str,
    status: AttendanceStatus,
    date: &str,
    timestamp: &str,
    history_retention: Option<usize>,
) -> Result<Student, CalcError> {
    let outcome = calc::recompute_attendance(&student.subject_attendance, subject, status)?;
    let mut next = student.clone();
    next.subject_attendance = outcome.subject_attendance;
    next.attendance = outcome.overall;
    next.attendance_history.append(
        AttendanceEntry {
            date: date.to_string(),
            subject: subject.to_string(),
            status,
            timestamp: timestamp.to_string(),
        },
        history_retention,
    );
    Ok(next)
}

pub fn apply_marks(
    student: &Student,
    subject: &str,
    marks: i64,
    max_marks: i64,
    date: &str,
    timestamp: &str,
) -> Result<Student, CalcError> {
    let outcome =
        calc::recompute_marks(&student.subject_marks, subject, marks, max_marks, date, timestamp)?;
    let mut next = student.clone();
    next.subject_marks = outcome.subject_marks;
    next.last_test_score = Some(marks);
    next.average_marks = Some(outcome.overall_average);
    next.subject_averages
        .insert(subject.to_string(), outcome.subject_average);
    Ok(next)
}

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub subject: Option<String>,
    pub max_marks: Option<i64>,
    pub date: Option<String>,
    pub history_retention: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReport {
    pub kind: WorkflowKind,
    pub subject: String,
    pub date: String,
    pub persisted: usize,
    pub skipped: usize,
    pub total: usize,
}

#[derive(Debug)]
pub struct BulkSession {
    kind: WorkflowKind,
    subject: String,
    max_marks: i64,
    date: String,
    history_retention: Option<usize>,
    order: Vec<String>,
    names: BTreeMap<String, String>,
    inputs: BTreeMap<String, RecordInput>,
    state: SessionState,
    cancel: CancelToken,
}

impl BulkSession {
    pub fn open(
        kind: WorkflowKind,
        students: &[Stored<Student>],
        scope: &TutorScope,
        options: SessionOptions,
        cancel: CancelToken,
    ) -> Result<BulkSession, WorkflowError> {
        let max_marks = options.max_marks.unwrap_or(DEFAULT_MAX_MARKS);
        if max_marks <= 0 {
            return Err(WorkflowError::BadInput(format!(
                "maxMarks must be positive, got {}",
                max_marks
            )));
        }
        let scoped = scope.filter(students);
        if scoped.is_empty() {
            return Err(WorkflowError::NoStudentsInScope);
        }
        let default_input = match kind {
            WorkflowKind::Attendance => RecordInput::Status(AttendanceStatus::Present),
            WorkflowKind::Marks => RecordInput::Marks(None),
        };
        let order: Vec<String> = scoped.iter().map(|s| s.id.clone()).collect();
        let names = scoped
            .iter()
            .map(|s| (s.id.clone(), s.data.name.clone()))
            .collect();
        let inputs = order.iter().map(|id| (id.clone(), default_input)).collect();

        Ok(BulkSession {
            kind,
            subject: options
                .subject
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SUBJECT.to_string()),
            max_marks,
            date: options.date.unwrap_or_else(today),
            history_retention: options.history_retention,
            order,
            names,
            inputs,
            state: SessionState::OpenForInput,
            cancel,
        })
    }

    pub fn kind(&self) -> WorkflowKind {
        self.kind
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn max_marks(&self) -> i64 {
        self.max_marks
    }

    pub fn student_ids(&self) -> &[String] {
        &self.order
    }

    pub fn input(&self, student_id: &str) -> Option<RecordInput> {
        self.inputs.get(student_id).copied()
    }

    fn ensure_open(&self) -> Result<(), WorkflowError> {
        if self.state != SessionState::OpenForInput {
            return Err(WorkflowError::NotOpen(self.state));
        }
        Ok(())
    }

    pub fn set_subject(&mut self, subject: &str) -> Result<(), WorkflowError> {
        self.ensure_open()?;
        let subject = subject.trim();
        if subject.is_empty() {
            return Err(WorkflowError::BadInput("subject must not be empty".into()));
        }
        self.subject = subject.to_string();
        Ok(())
    }

    pub fn set_max_marks(&mut self, max_marks: i64) -> Result<(), WorkflowError> {
        self.ensure_open()?;
        if max_marks <= 0 {
            return Err(WorkflowError::BadInput(format!(
                "maxMarks must be positive, got {}",
                max_marks
            )));
        }
        self.max_marks = max_marks;
        Ok(())
    }

    fn name_of(&self, student_id: &str) -> String {
        self.names
            .get(student_id)
            .cloned()
            .unwrap_or_else(|| student_id.to_string())
    }

    pub fn set_status(
        &mut self,
        student_id: &str,
        status: AttendanceStatus,
    ) -> Result<(), WorkflowError> {
        self.ensure_open()?;
        if self.kind != WorkflowKind::Attendance {
            return Err(WorkflowError::BadInput(
                "marks sessions take marks, not a status".into(),
            ));
        }
        let slot = self
            .inputs
            .get_mut(student_id)
            .ok_or_else(|| WorkflowError::UnknownStudent(student_id.to_string()))?;
        *slot = RecordInput::Status(status);
        Ok(())
    }

    /// `None` clears the input; blank inputs are skipped on submit.
    pub fn set_marks(&mut self, student_id: &str, marks: Option<i64>) -> Result<(), WorkflowError> {
        self.ensure_open()?;
        if self.kind != WorkflowKind::Marks {
            return Err(WorkflowError::BadInput(
                "attendance sessions take a status, not marks".into(),
            ));
        }
        if !self.inputs.contains_key(student_id) {
            return Err(WorkflowError::UnknownStudent(student_id.to_string()));
        }
        if let Some(m) = marks {
            calc::validate_marks(m, self.max_marks).map_err(|source| {
                WorkflowError::InvalidMarks {
                    student_id: student_id.to_string(),
                    name: self.name_of(student_id),
                    source,
                }
            })?;
        }
        self.inputs
            .insert(student_id.to_string(), RecordInput::Marks(marks));
        Ok(())
    }

    fn validate_all(&self) -> Result<(), WorkflowError> {
        for id in &self.order {
            if let Some(RecordInput::Marks(Some(m))) = self.inputs.get(id) {
                calc::validate_marks(*m, self.max_marks).map_err(|source| {
                    WorkflowError::InvalidMarks {
                        student_id: id.clone(),
                        name: self.name_of(id),
                        source,
                    }
                })?;
            }
        }
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), WorkflowError> {
        self.ensure_open()?;
        self.state = SessionState::Cancelled;
        log::info!("bulk {:?} session cancelled", self.kind);
        Ok(())
    }

    pub fn submit(&mut self, sink: &impl StudentSink) -> Result<SubmitReport, WorkflowError> {
        self.ensure_open()?;
        if self.kind == WorkflowKind::Marks {
            // Nothing is written unless every input is in range.
            self.validate_all()?;
        }
        self.state = SessionState::Submitting;
        let total = self.order.len();
        let mut persisted = 0usize;
        let mut skipped = 0usize;

        for id in &self.order {
            if self.cancel.is_cancelled() {
                self.state = SessionState::Closed;
                log::warn!(
                    "bulk {:?} submit cancelled after {} of {} records",
                    self.kind,
                    persisted,
                    total
                );
                return Err(WorkflowError::Cancelled { persisted, total });
            }
            let input = self.inputs.get(id).copied();
            if let Some(RecordInput::Marks(None)) = input {
                skipped += 1;
                continue;
            }
            match self.write_one(sink, id, input) {
                Ok(()) => persisted += 1,
                Err(source) => {
                    self.state = SessionState::Closed;
                    log::error!(
                        "bulk {:?} submit stopped at {} after {} of {} records: {}",
                        self.kind,
                        id,
                        persisted,
                        total,
                        source
                    );
                    return Err(WorkflowError::Partial {
                        persisted,
                        total,
                        source,
                    });
                }
            }
        }

        self.state = SessionState::Closed;
        log::info!(
            "bulk {:?} submit for {} on {}: {} written, {} skipped",
            self.kind,
            self.subject,
            self.date,
            persisted,
            skipped
        );
        Ok(SubmitReport {
            kind: self.kind,
            subject: self.subject.clone(),
            date: self.date.clone(),
            persisted,
            skipped,
            total,
        })
    }

    fn write_one(
        &self,
        sink: &impl StudentSink,
        id: &str,
        input: Option<RecordInput>,
    ) -> Result<(), RecordError> {
        let current = sink.current(id).ok_or_else(|| StoreError::NotFound {
            collection: crate::store::STUDENTS.to_string(),
            id: id.to_string(),
        })?;
        let stamp = now_stamp();
        let next = match input {
            Some(RecordInput::Marks(Some(marks))) => apply_marks(
                &current.data,
                &self.subject,
                marks,
                self.max_marks,
                &self.date,
                &stamp,
            )?,
            Some(RecordInput::Status(status)) => apply_attendance(
                &current.data,
                &self.subject,
                status,
                &self.date,
                &stamp,
                self.history_retention,
            )?,
            Some(RecordInput::Marks(None)) | None => {
                return Err(RecordError::MissingInput(id.to_string()))
            }
        };
        sink.write(id, &next, current.revision)?;
        Ok(())
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            kind: self.kind,
            state: self.state,
            subject: self.subject.clone(),
            max_marks: match self.kind {
                WorkflowKind::Marks => Some(self.max_marks),
                WorkflowKind::Attendance => None,
            },
            date: self.date.clone(),
            students: self
                .order
                .iter()
                .map(|id| SessionRow {
                    student_id: id.clone(),
                    name: self.name_of(id),
                    status: match self.inputs.get(id) {
                        Some(RecordInput::Status(s)) => Some(*s),
                        _ => None,
                    },
                    marks: match self.inputs.get(id) {
                        Some(RecordInput::Marks(m)) => *m,
                        _ => None,
                    },
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRow {
    pub student_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AttendanceStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marks: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub kind: WorkflowKind,
    pub state: SessionState,
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_marks: Option<i64>,
    pub date: String,
    pub students: Vec<SessionRow>,
}
