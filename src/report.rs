use crate::calc::{self, percent_of};
use crate::chart::{self, Canvas};
use crate::models::{Stored, Student};
use anyhow::Context;
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const REPORT_WIDTH: u32 = 800;
pub const REPORT_HEIGHT: u32 = 1200;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Slice {
    pub label: String,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectLine {
    pub subject: String,
    pub percentage: i64,
    pub attended_classes: u32,
    pub total_classes: u32,
    /// Subject average; `None` when no marks were ever recorded.
    pub score: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentReport {
    pub student_id: String,
    pub name: String,
    pub age: Option<u32>,
    pub center: String,
    pub enrollment_date: Option<String>,
    pub generated_on: String,
    pub overall_attendance: i64,
    pub average_score: i64,
    pub total_classes: u64,
    pub attended_classes: u64,
    pub badge: calc::PerformanceBadge,
    pub attendance_pie: Vec<Slice>,
    pub score_pie: Vec<Slice>,
    pub subjects: Vec<SubjectLine>,
}

fn has_data(slices: &[Slice]) -> bool {
    slices.iter().any(|s| s.value > 0)
}

/// Subjects come from recorded attendance, then any marks-only subjects,
/// then enrolled subjects with nothing recorded yet.
fn subject_order(student: &Student) -> Vec<String> {
    let mut out: Vec<String> = student.subject_attendance.keys().cloned().collect();
    for s in student.subject_marks.keys().chain(student.subjects.iter()) {
        if !out.contains(s) {
            out.push(s.clone());
        }
    }
    out
}

impl StudentReport {
    pub fn build(student: &Stored<Student>, generated_on: &str) -> StudentReport {
        let s = &student.data;
        let subjects: Vec<SubjectLine> = subject_order(s)
            .into_iter()
            .map(|subject| {
                let att = s.subject_attendance_for(&subject);
                let marks = s.marks_for(&subject);
                let score = if marks.is_empty() {
                    None
                } else {
                    Some(calc::round_half_up(calc::subject_average(marks, 0.0)))
                };
                SubjectLine {
                    percentage: att.percentage,
                    attended_classes: att.attended_classes,
                    total_classes: att.total_classes,
                    score,
                    subject,
                }
            })
            .collect();

        let (attended, total) = calc::attendance_totals(&s.subject_attendance);
        let overall_attendance = percent_of(attended as i64, total as i64);
        let average_score = calc::student_overall_average(s);

        let attendance_pie = subjects
            .iter()
            .map(|l| Slice {
                label: l.subject.clone(),
                value: l.attended_classes as i64,
            })
            .collect();
        let score_pie = subjects
            .iter()
            .filter_map(|l| {
                l.score.map(|value| Slice {
                    label: l.subject.clone(),
                    value,
                })
            })
            .collect();

        StudentReport {
            student_id: student.id.clone(),
            name: s.name.clone(),
            age: s.age,
            center: s.center.clone(),
            enrollment_date: s.enrollment_date.clone(),
            generated_on: generated_on.to_string(),
            overall_attendance,
            average_score,
            total_classes: total,
            attended_classes: attended,
            badge: calc::performance_badge(s.attendance, s.last_test_score.unwrap_or(0)),
            attendance_pie,
            score_pie,
            subjects,
        }
    }

    pub fn file_name(&self) -> String {
        let safe: String = self
            .name
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
                c if c.is_control() => '_',
                c => c,
            })
            .collect();
        let safe = if safe.trim().is_empty() {
            "Student".to_string()
        } else {
            safe
        };
        format!("{}_Report_{}.png", safe, self.generated_on)
    }

    pub fn render(&self) -> Canvas {
        let mut c = Canvas::new(REPORT_WIDTH, REPORT_HEIGHT);
        let mid = REPORT_WIDTH as i64 / 2;

        c.fill_rect(0, 0, REPORT_WIDTH, 80, chart::BRAND);
        c.text_centered(mid, 16, "Kalam Foundation - Student Report", 3, chart::WHITE);
        c.text_centered(
            mid,
            54,
            &format!("Generated on {}", self.generated_on),
            2,
            chart::WHITE,
        );

        let dash = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".into());
        c.text(40, 106, &format!("Student: {}", self.name), 2, chart::INK);
        let info = [
            format!("Age: {}", self.age.map(|a| a.to_string()).unwrap_or_else(|| "-".into())),
            format!("Center: {}", self.center),
            format!("Enrollment Date: {}", dash(&self.enrollment_date)),
        ];
        for (i, line) in info.iter().enumerate() {
            c.text(40, 132 + i as i64 * 20, line, 2, chart::INK);
        }

        c.text(40, 206, "Overall Performance", 2, chart::BRAND);
        let perf = [
            format!("Overall Attendance: {}%", self.overall_attendance),
            format!("Average Test Score: {}%", self.average_score),
            format!("Total Classes: {}", self.total_classes),
            format!("Classes Attended: {}", self.attended_classes),
            format!("Standing: {}", self.badge.label()),
        ];
        for (i, line) in perf.iter().enumerate() {
            c.text(40, 230 + i as i64 * 18, line, 2, chart::INK);
        }

        draw_pie_panel(&mut c, 40, 330, "Attendance by Subject", &self.attendance_pie);
        draw_pie_panel(&mut c, 410, 330, "Test Scores by Subject", &self.score_pie);

        c.text(40, 680, "Subject-wise Performance", 2, chart::BRAND);
        let cols: [(i64, &str); 5] = [
            (40, "Subject"),
            (190, "Attendance"),
            (330, "Attended"),
            (460, "Total"),
            (580, "Test Score"),
        ];
        for (x, label) in cols {
            c.text(x, 706, label, 2, chart::INK);
        }
        c.fill_rect(40, 724, REPORT_WIDTH - 80, 1, chart::MUTED);
        for (i, line) in self.subjects.iter().enumerate() {
            let y = 732 + i as i64 * 22;
            if y > REPORT_HEIGHT as i64 - 60 {
                break;
            }
            let cells = [
                line.subject.clone(),
                format!("{}%", line.percentage),
                line.attended_classes.to_string(),
                line.total_classes.to_string(),
                line.score
                    .map(|s| format!("{}%", s))
                    .unwrap_or_else(|| "N/A".into()),
            ];
            for ((x, _), cell) in cols.iter().zip(cells.iter()) {
                c.text(*x, y, cell, 2, chart::INK);
            }
        }

        c.text_centered(
            mid,
            REPORT_HEIGHT as i64 - 28,
            "Generated by the Kalam Foundation Student Management System",
            1,
            chart::MUTED,
        );
        c
    }

    pub fn write_png(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create {}", parent.display()))?;
            }
        }
        self.render()
            .into_image()
            .save_with_format(path, image::ImageFormat::Png)
            .with_context(|| format!("write {}", path.display()))?;
        log::info!("wrote report for {} to {}", self.name, path.display());
        Ok(())
    }

    /// `path` wins; otherwise the conventional file name inside `dir`.
    pub fn output_path(&self, path: Option<&Path>, dir: &Path) -> PathBuf {
        match path {
            Some(p) => p.to_path_buf(),
            None => dir.join(self.file_name()),
        }
    }

    pub fn attendance_has_data(&self) -> bool {
        has_data(&self.attendance_pie)
    }

    pub fn scores_have_data(&self) -> bool {
        has_data(&self.score_pie)
    }
}

const PANEL_W: u32 = 350;
const PIE_RADIUS: u32 = 95;

fn draw_pie_panel(c: &mut Canvas, x: i64, y: i64, title: &str, slices: &[Slice]) {
    let cx = x + PANEL_W as i64 / 2;
    let cy = y + 130;
    c.text_centered(cx, y + 4, title, 2, chart::INK);

    let values: Vec<f64> = slices.iter().map(|s| s.value as f64).collect();
    if !has_data(slices) || !c.pie(cx, cy, PIE_RADIUS, &values) {
        c.no_data(cx, cy);
        return;
    }

    let total: i64 = slices.iter().map(|s| s.value.max(0)).sum();
    for (i, s) in slices.iter().enumerate() {
        let ly = y + 240 + i as i64 * 16;
        if ly > 660 {
            break;
        }
        c.fill_rect(x + 10, ly, 12, 12, chart::palette(i));
        let share = percent_of(s.value.max(0), total);
        c.text(
            x + 30,
            ly,
            &format!("{}: {} ({}%)", s.label, s.value, share),
            2,
            chart::INK,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ScoreEntry, SubjectAttendance};

    fn student() -> Stored<Student> {
        let mut s = Student {
            name: "Aisha Khan".into(),
            center: "Kurla".into(),
            subjects: vec!["Math".into(), "English".into(), "Science".into()],
            attendance: 85,
            last_test_score: Some(90),
            ..Default::default()
        };
        s.subject_attendance.insert(
            "Math".into(),
            SubjectAttendance {
                total_classes: 10,
                attended_classes: 8,
                percentage: 80,
            },
        );
        s.subject_attendance.insert(
            "English".into(),
            SubjectAttendance {
                total_classes: 10,
                attended_classes: 9,
                percentage: 90,
            },
        );
        s.subject_marks.insert(
            "Math".into(),
            vec![
                ScoreEntry {
                    date: "2025-07-01".into(),
                    marks: 80,
                    max_marks: 100,
                    percentage: 80,
                    timestamp: String::new(),
                },
                ScoreEntry {
                    date: "2025-07-08".into(),
                    marks: 45,
                    max_marks: 50,
                    percentage: 90,
                    timestamp: String::new(),
                },
            ],
        );
        Stored {
            id: "s1".into(),
            created_at: String::new(),
            updated_at: String::new(),
            revision: 3,
            data: s,
        }
    }

    #[test]
    fn model_uses_recorded_scores_only() {
        let r = StudentReport::build(&student(), "2025-07-10");
        assert_eq!((r.attended_classes, r.total_classes), (17, 20));
        assert_eq!(r.overall_attendance, 85);
        assert_eq!(r.average_score, 85);
        let names: Vec<&str> = r.subjects.iter().map(|l| l.subject.as_str()).collect();
        assert_eq!(names, vec!["English", "Math", "Science"]);
        assert_eq!(r.subjects[0].score, None);
        assert_eq!(r.subjects[1].score, Some(85));
        assert_eq!(r.subjects[2].total_classes, 0);
        assert_eq!(
            r.score_pie,
            vec![Slice {
                label: "Math".into(),
                value: 85
            }]
        );
        assert_eq!(r.badge, calc::PerformanceBadge::Good);
    }

    #[test]
    fn file_name_follows_convention() {
        let r = StudentReport::build(&student(), "2025-07-10");
        assert_eq!(r.file_name(), "Aisha Khan_Report_2025-07-10.png");
        let mut odd = student();
        odd.data.name = "A/B".into();
        assert_eq!(
            StudentReport::build(&odd, "2025-07-10").file_name(),
            "A_B_Report_2025-07-10.png"
        );
    }

    #[test]
    fn render_has_fixed_size_and_header_band() {
        let r = StudentReport::build(&student(), "2025-07-10");
        let c = r.render();
        assert_eq!((c.width(), c.height()), (REPORT_WIDTH, REPORT_HEIGHT));
        assert_eq!(c.pixel(2, 2), chart::BRAND);
        // a point inside the attendance pie is coloured
        assert_ne!(c.pixel(40 + 175 + 30, 330 + 130), chart::WHITE);
    }

    #[test]
    fn empty_student_renders_no_data_placeholders() {
        let blank = Stored {
            id: "s2".into(),
            created_at: String::new(),
            updated_at: String::new(),
            revision: 1,
            data: Student {
                name: "New".into(),
                ..Default::default()
            },
        };
        let r = StudentReport::build(&blank, "2025-07-10");
        assert!(!r.attendance_has_data());
        assert!(!r.scores_have_data());
        assert_eq!(r.average_score, 0);
        let c = r.render();
        // pie centre area carries placeholder text, not a slice colour
        let cy = 330 + 130;
        let row: Vec<_> = (100..330).map(|x| c.pixel(x, cy)).collect();
        assert!(row.iter().any(|p| *p == chart::MUTED));
        assert!(row.iter().all(|p| *p == chart::MUTED || *p == chart::WHITE));
    }

    #[test]
    fn png_is_written() {
        let dir = crate::store::testing::temp_dir("kalams-report-png");
        let r = StudentReport::build(&student(), "2025-07-10");
        let path = r.output_path(None, &dir);
        r.write_png(&path).expect("write png");
        let bytes = std::fs::read(&path).expect("read");
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
    }
}
