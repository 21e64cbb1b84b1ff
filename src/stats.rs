use crate::calc::{round_half_up, student_overall_average, two_level_average};
use crate::models::{Family, JobStatus, Stored, Student, TrainingStatus, Volunteer, VolunteerStatus, Woman};
use serde::Serialize;

/// UI label meaning "no center filter".
pub const ALL_CENTERS: &str = "All Centers";
pub const ALL_SKILLS: &str = "All Skills";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_families: usize,
    pub active_students: usize,
    pub women_empowered: usize,
    pub avg_attendance: i64,
    pub avg_marks: i64,
    pub women_completion_rate: i64,
}

fn mean_rounded(values: impl Iterator<Item = f64>) -> i64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0
    } else {
        round_half_up(sum / n as f64)
    }
}

/// Average marks count only students that have any subject marks.
pub fn dashboard_stats(
    students: &[Stored<Student>],
    families: &[Stored<Family>],
    women: &[Stored<Woman>],
) -> DashboardStats {
    let avg_attendance = mean_rounded(students.iter().map(|s| s.data.attendance as f64));
    let avg_marks = mean_rounded(
        students
            .iter()
            .filter_map(|s| two_level_average(&s.data.subject_marks)),
    );
    let completed = women
        .iter()
        .filter(|w| w.data.training_status == TrainingStatus::Completed)
        .count();
    let women_completion_rate = if women.is_empty() {
        0
    } else {
        round_half_up(completed as f64 / women.len() as f64 * 100.0)
    };
    DashboardStats {
        total_families: families.len(),
        active_students: students.len(),
        women_empowered: women.len(),
        avg_attendance,
        avg_marks,
        women_completion_rate,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentStats {
    pub total: usize,
    pub avg_attendance: i64,
    pub avg_score: i64,
}

/// Students page headline numbers. Unlike the dashboard, every student
/// counts toward the score average, using the last test score as fallback.
pub fn student_stats(students: &[&Stored<Student>]) -> StudentStats {
    StudentStats {
        total: students.len(),
        avg_attendance: mean_rounded(students.iter().map(|s| s.data.attendance as f64)),
        avg_score: mean_rounded(
            students
                .iter()
                .map(|s| student_overall_average(&s.data) as f64),
        ),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VolunteerCounts {
    pub total: usize,
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
}

pub fn volunteer_counts(volunteers: &[Stored<Volunteer>]) -> VolunteerCounts {
    volunteers
        .iter()
        .fold(VolunteerCounts::default(), |mut c, v| {
            c.total += 1;
            match v.data.status {
                VolunteerStatus::Pending => c.pending += 1,
                VolunteerStatus::Approved => c.approved += 1,
                VolunteerStatus::Rejected => c.rejected += 1,
            }
            c
        })
}

pub fn filter_volunteers(
    volunteers: &[Stored<Volunteer>],
    status: Option<VolunteerStatus>,
) -> Vec<&Stored<Volunteer>> {
    volunteers
        .iter()
        .filter(|v| status.map_or(true, |s| v.data.status == s))
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WomenStats {
    pub total: usize,
    pub employed: usize,
    pub completed: usize,
    pub in_progress: usize,
}

pub fn women_stats(women: &[&Stored<Woman>]) -> WomenStats {
    WomenStats {
        total: women.len(),
        employed: women
            .iter()
            .filter(|w| w.data.job_status == JobStatus::Employed)
            .count(),
        completed: women
            .iter()
            .filter(|w| w.data.training_status == TrainingStatus::Completed)
            .count(),
        in_progress: women
            .iter()
            .filter(|w| w.data.training_status == TrainingStatus::InProgress)
            .count(),
    }
}

/// Normalizes a UI selection: blank or the "All ..." label means no filter.
pub fn selection<'a>(raw: Option<&'a str>, all_label: &str) -> Option<&'a str> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty() && *s != all_label)
}

pub fn filter_students_by_center<'a>(
    students: &[&'a Stored<Student>],
    center: Option<&str>,
) -> Vec<&'a Stored<Student>> {
    students
        .iter()
        .copied()
        .filter(|s| center.map_or(true, |c| s.data.center == c))
        .collect()
}

pub fn filter_women<'a>(
    women: &'a [Stored<Woman>],
    center: Option<&str>,
    skill: Option<&str>,
) -> Vec<&'a Stored<Woman>> {
    women
        .iter()
        .filter(|w| center.map_or(true, |c| w.data.center == c))
        .filter(|w| skill.map_or(true, |k| w.data.skill == k))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScoreEntry;

    fn wrap<T>(id: &str, data: T) -> Stored<T> {
        Stored {
            id: id.into(),
            created_at: String::new(),
            updated_at: String::new(),
            revision: 1,
            data,
        }
    }

    fn score(pct: i64) -> ScoreEntry {
        ScoreEntry {
            date: "2025-07-01".into(),
            marks: pct,
            max_marks: 100,
            percentage: pct,
            timestamp: String::new(),
        }
    }

    #[test]
    fn dashboard_marks_average_ignores_students_without_marks() {
        let mut a = Student {
            attendance: 90,
            ..Default::default()
        };
        a.subject_marks.insert("Math".into(), vec![score(80), score(90)]);
        let b = Student {
            attendance: 71,
            last_test_score: Some(20),
            ..Default::default()
        };
        let students = vec![wrap("a", a), wrap("b", b)];
        let women = vec![
            wrap(
                "w1",
                Woman {
                    training_status: TrainingStatus::Completed,
                    ..Default::default()
                },
            ),
            wrap("w2", Woman::default()),
            wrap("w3", Woman::default()),
        ];
        let stats = dashboard_stats(&students, &[wrap("f", Family::default())], &women);
        assert_eq!(stats.avg_attendance, 81);
        assert_eq!(stats.avg_marks, 85);
        assert_eq!(stats.women_completion_rate, 33);
        assert_eq!(stats.total_families, 1);
    }

    #[test]
    fn empty_collections_give_zeroes() {
        let stats = dashboard_stats(&[], &[], &[]);
        assert_eq!(stats.avg_attendance, 0);
        assert_eq!(stats.avg_marks, 0);
        assert_eq!(stats.women_completion_rate, 0);
    }

    #[test]
    fn student_stats_fall_back_to_last_score() {
        let mut a = Student::default();
        a.subject_marks.insert("Math".into(), vec![score(80)]);
        let b = Student {
            last_test_score: Some(61),
            ..Default::default()
        };
        let students = [wrap("a", a), wrap("b", b)];
        let refs: Vec<&Stored<Student>> = students.iter().collect();
        // (80 + 61) / 2 = 70.5
        assert_eq!(student_stats(&refs).avg_score, 71);
    }

    #[test]
    fn approving_moves_volunteer_between_filtered_views() {
        let mut list = vec![
            wrap(
                "v1",
                Volunteer {
                    name: "Asha".into(),
                    ..Default::default()
                },
            ),
            wrap(
                "v2",
                Volunteer {
                    status: VolunteerStatus::Rejected,
                    ..Default::default()
                },
            ),
        ];
        assert_eq!(filter_volunteers(&list, Some(VolunteerStatus::Pending)).len(), 1);
        assert!(filter_volunteers(&list, Some(VolunteerStatus::Approved)).is_empty());

        list[0].data.status = VolunteerStatus::Approved;
        assert!(filter_volunteers(&list, Some(VolunteerStatus::Pending)).is_empty());
        assert_eq!(filter_volunteers(&list, Some(VolunteerStatus::Approved))[0].id, "v1");
        assert_eq!(filter_volunteers(&list, None).len(), 2);
        assert_eq!(
            volunteer_counts(&list),
            VolunteerCounts {
                total: 2,
                pending: 0,
                approved: 1,
                rejected: 1
            }
        );
    }

    #[test]
    fn women_filters_combine_center_and_skill() {
        let women = vec![
            wrap(
                "1",
                Woman {
                    center: "Kurla".into(),
                    skill: "Tailoring".into(),
                    job_status: JobStatus::Employed,
                    ..Default::default()
                },
            ),
            wrap(
                "2",
                Woman {
                    center: "Kurla".into(),
                    skill: "Computers".into(),
                    training_status: TrainingStatus::InProgress,
                    ..Default::default()
                },
            ),
            wrap(
                "3",
                Woman {
                    center: "Malad".into(),
                    skill: "Tailoring".into(),
                    ..Default::default()
                },
            ),
        ];
        let hits = filter_women(&women, Some("Kurla"), Some("Tailoring"));
        assert_eq!(hits.len(), 1);
        assert_eq!(filter_women(&women, None, Some("Tailoring")).len(), 2);
        let all = filter_women(&women, None, None);
        let s = women_stats(&all);
        assert_eq!((s.total, s.employed, s.in_progress), (3, 1, 1));
    }

    #[test]
    fn all_label_means_no_filter() {
        assert_eq!(selection(Some("All Centers"), ALL_CENTERS), None);
        assert_eq!(selection(Some("  "), ALL_CENTERS), None);
        assert_eq!(selection(Some(" Kurla "), ALL_CENTERS), Some("Kurla"));
        assert_eq!(selection(None, ALL_SKILLS), None);
    }
}
