//! Derived grades.
//!
//! Grades are never stored: every read recomputes percentage, letter and
//! performance label from the raw score and the assessment's maximum. The
//! threshold table is evaluated high-to-low and boundaries are closed above,
//! so exactly 90.0 is an A+.

use serde::Serialize;

pub const EXAM_MAX_SCORE: f64 = 100.0;
pub const DEFAULT_MAX_SCORE: f64 = 100.0;

/// The two gradable activity kinds a result can reference. Built once per
/// row at load time; nothing downstream probes column shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum Assessment {
    Exam {
        id: String,
        title: String,
    },
    Assignment {
        id: String,
        title: String,
        total_points: Option<f64>,
    },
}

impl Assessment {
    pub fn kind(&self) -> &'static str {
        match self {
            Assessment::Exam { .. } => "exam",
            Assessment::Assignment { .. } => "assignment",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Assessment::Exam { id, .. } | Assessment::Assignment { id, .. } => id,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Assessment::Exam { title, .. } | Assessment::Assignment { title, .. } => title,
        }
    }

    /// Exams are always out of 100; assignments default to 100 when no
    /// total was recorded.
    pub fn max_score(&self) -> f64 {
        match self {
            Assessment::Exam { .. } => EXAM_MAX_SCORE,
            Assessment::Assignment { total_points, .. } => {
                total_points.unwrap_or(DEFAULT_MAX_SCORE)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedGrade {
    pub percentage: f64,
    pub letter: &'static str,
    pub label: &'static str,
}

// First match wins, scanned top to bottom.
const GRADE_BANDS: [(f64, &str, &str); 11] = [
    (90.0, "A+", "Excellent"),
    (85.0, "A", "Very Good"),
    (80.0, "A-", "Good"),
    (75.0, "B+", "Above Average"),
    (70.0, "B", "Average"),
    (65.0, "B-", "Satisfactory"),
    (60.0, "C+", "Below Average"),
    (55.0, "C", "Needs Improvement"),
    (50.0, "C-", "Poor"),
    (45.0, "D+", "Very Poor"),
    (40.0, "D", "Fail"),
];

fn band_for(percentage: f64) -> (&'static str, &'static str) {
    for (cut, letter, label) in GRADE_BANDS {
        if percentage >= cut {
            return (letter, label);
        }
    }
    ("F", "Fail")
}

/// Score validity (non-negative) is the mutation path's concern; here a
/// score above the maximum legitimately yields more than 100%.
pub fn derive_grade(score: f64, max_score: f64) -> DerivedGrade {
    let max = if max_score > 0.0 {
        max_score
    } else {
        DEFAULT_MAX_SCORE
    };
    let percentage = 100.0 * score / max;
    let (letter, label) = band_for(percentage);
    DerivedGrade {
        percentage,
        letter,
        label,
    }
}

/// 1-decimal display rounding used in aggregate views.
pub fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LetterBucket {
    pub letter: &'static str,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultStats {
    pub count: usize,
    pub average_percent: f64,
    pub highest_percent: f64,
    pub lowest_percent: f64,
    pub distribution: Vec<LetterBucket>,
}

/// Aggregates already-derived percentages for a class or assessment view.
pub fn result_stats<I>(percentages: I) -> ResultStats
where
    I: IntoIterator<Item = f64>,
{
    let mut count = 0usize;
    let mut sum = 0.0f64;
    let mut highest = f64::NEG_INFINITY;
    let mut lowest = f64::INFINITY;
    let mut by_letter: Vec<(&'static str, usize)> = GRADE_BANDS
        .iter()
        .map(|(_, letter, _)| (*letter, 0usize))
        .chain(std::iter::once(("F", 0usize)))
        .collect();

    for p in percentages {
        count += 1;
        sum += p;
        if p > highest {
            highest = p;
        }
        if p < lowest {
            lowest = p;
        }
        let (letter, _) = band_for(p);
        if let Some(bucket) = by_letter.iter_mut().find(|(l, _)| *l == letter) {
            bucket.1 += 1;
        }
    }

    if count == 0 {
        return ResultStats {
            count: 0,
            average_percent: 0.0,
            highest_percent: 0.0,
            lowest_percent: 0.0,
            distribution: by_letter
                .into_iter()
                .map(|(letter, n)| LetterBucket { letter, count: n })
                .collect(),
        };
    }

    ResultStats {
        count,
        average_percent: round1(sum / count as f64),
        highest_percent: round1(highest),
        lowest_percent: round1(lowest),
        distribution: by_letter
            .into_iter()
            .map(|(letter, n)| LetterBucket { letter, count: n })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grade_92_of_100_is_a_plus() {
        let g = derive_grade(92.0, 100.0);
        assert_eq!(g.percentage, 92.0);
        assert_eq!(g.letter, "A+");
        assert_eq!(g.label, "Excellent");
    }

    #[test]
    fn grade_70_of_100_is_b_average() {
        let g = derive_grade(70.0, 100.0);
        assert_eq!(g.percentage, 70.0);
        assert_eq!(g.letter, "B");
        assert_eq!(g.label, "Average");
    }

    #[test]
    fn grade_39_of_100_fails() {
        let g = derive_grade(39.0, 100.0);
        assert_eq!(g.percentage, 39.0);
        assert_eq!(g.letter, "F");
        assert_eq!(g.label, "Fail");
    }

    #[test]
    fn max_score_scales_before_banding() {
        let g = derive_grade(45.0, 50.0);
        assert_eq!(g.percentage, 90.0);
        assert_eq!(g.letter, "A+");
        assert_eq!(g.label, "Excellent");
    }

    #[test]
    fn boundaries_are_closed_above() {
        assert_eq!(derive_grade(90.0, 100.0).letter, "A+");
        assert_eq!(derive_grade(89.999, 100.0).letter, "A");
        assert_eq!(derive_grade(40.0, 100.0).letter, "D");
        assert_eq!(derive_grade(39.999, 100.0).letter, "F");
    }

    #[test]
    fn every_band_maps_to_its_letter() {
        let expect = [
            (95.0, "A+"),
            (87.0, "A"),
            (82.0, "A-"),
            (77.0, "B+"),
            (72.0, "B"),
            (67.0, "B-"),
            (62.0, "C+"),
            (57.0, "C"),
            (52.0, "C-"),
            (47.0, "D+"),
            (42.0, "D"),
            (10.0, "F"),
        ];
        for (pct, letter) in expect {
            assert_eq!(derive_grade(pct, 100.0).letter, letter, "at {}", pct);
        }
    }

    #[test]
    fn score_above_max_exceeds_100_percent() {
        let g = derive_grade(110.0, 100.0);
        assert_eq!(g.percentage, 110.0);
        assert_eq!(g.letter, "A+");
    }

    #[test]
    fn assignment_max_defaults_to_100_when_unset() {
        let a = Assessment::Assignment {
            id: "a1".into(),
            title: "Essay".into(),
            total_points: None,
        };
        assert_eq!(a.max_score(), 100.0);
        let b = Assessment::Assignment {
            id: "a2".into(),
            title: "Quiz".into(),
            total_points: Some(50.0),
        };
        assert_eq!(b.max_score(), 50.0);
    }

    #[test]
    fn exam_max_is_fixed() {
        let e = Assessment::Exam {
            id: "e1".into(),
            title: "Final".into(),
        };
        assert_eq!(e.max_score(), 100.0);
        assert_eq!(e.kind(), "exam");
    }

    #[test]
    fn stats_aggregate_and_bucket_percentages() {
        let stats = result_stats([92.0, 70.0, 39.0]);
        assert_eq!(stats.count, 3);
        assert_eq!(stats.average_percent, 67.0);
        assert_eq!(stats.highest_percent, 92.0);
        assert_eq!(stats.lowest_percent, 39.0);
        let a_plus = stats
            .distribution
            .iter()
            .find(|b| b.letter == "A+")
            .map(|b| b.count);
        let f_count = stats
            .distribution
            .iter()
            .find(|b| b.letter == "F")
            .map(|b| b.count);
        assert_eq!(a_plus, Some(1));
        assert_eq!(f_count, Some(1));
    }

    #[test]
    fn stats_on_empty_input_are_zeroed() {
        let stats = result_stats(std::iter::empty::<f64>());
        assert_eq!(stats.count, 0);
        assert_eq!(stats.average_percent, 0.0);
        assert_eq!(stats.highest_percent, 0.0);
        assert_eq!(stats.lowest_percent, 0.0);
    }
}
