// src/generate/dedup.rs
//! Near-duplicate detection on question text and on the measurable fields.

use once_cell::sync::OnceCell;
use regex::Regex;

use super::question::{canonical_metric, QuestionRecord};

pub const DEFAULT_SIMILARITY: f64 = 0.9;
pub const DEFAULT_TARGET_TOLERANCE: f64 = 0.10;
pub const DEFAULT_WINDOW_DAYS: u32 = 30;

/// Lowercase, punctuation to spaces, whitespace collapsed.
pub fn normalize_question(s: &str) -> String {
    static RE_PUNCT: OnceCell<Regex> = OnceCell::new();
    let re = RE_PUNCT.get_or_init(|| Regex::new(r"[^\p{L}\p{N}]+").expect("punct regex"));
    re.replace_all(&s.to_lowercase(), " ").trim().to_string()
}

/// Digit runs in order. Questions with different numbers are different questions.
fn numbers(normalized: &str) -> Vec<&str> {
    normalized
        .split(|c: char| !c.is_ascii_digit())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Field-level match: same category and metric, targets within `tolerance`
/// of the larger one, timeframes less than `window_days` apart.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearTarget {
    /// Relative target gap. `0.0` turns the check off.
    pub tolerance: f64,
    pub window_days: u32,
}

impl Default for NearTarget {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TARGET_TOLERANCE,
            window_days: DEFAULT_WINDOW_DAYS,
        }
    }
}

impl NearTarget {
    pub const OFF: NearTarget = NearTarget {
        tolerance: 0.0,
        window_days: 0,
    };

    pub fn matches(&self, a: &QuestionRecord, b: &QuestionRecord) -> bool {
        if self.tolerance <= 0.0 || a.category != b.category {
            return false;
        }
        if canonical_metric(&a.metric) != canonical_metric(&b.metric) {
            return false;
        }
        let scale = a.target_value.abs().max(b.target_value.abs());
        let close =
            scale == 0.0 || (a.target_value - b.target_value).abs() / scale < self.tolerance;
        close && (a.timeframe - b.timeframe).num_days().abs() < i64::from(self.window_days)
    }
}

/// Tracks questions already admitted and refuses repeats.
#[derive(Debug, Clone)]
pub struct Deduper {
    threshold: f64,
    near: NearTarget,
    seen: Vec<String>,
    records: Vec<QuestionRecord>,
}

impl Deduper {
    /// `threshold >= 1.0` only drops exact (normalized) matches. Text only until
    /// `with_near_target` is set.
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            near: NearTarget::OFF,
            seen: Vec::new(),
            records: Vec::new(),
        }
    }

    pub fn with_near_target(mut self, near: NearTarget) -> Self {
        self.near = near;
        self
    }

    pub fn is_duplicate(&self, question: &str) -> bool {
        let norm = normalize_question(question);
        self.seen.iter().any(|prev| {
            if *prev == norm {
                return true;
            }
            self.threshold < 1.0
                && numbers(prev) == numbers(&norm)
                && strsim::normalized_levenshtein(prev, &norm) >= self.threshold
        })
    }

    /// `true` if admitted, `false` if it repeats an earlier question.
    pub fn admit(&mut self, question: &str) -> bool {
        if self.is_duplicate(question) {
            return false;
        }
        self.seen.push(normalize_question(question));
        true
    }

    /// Text check plus the field-level check against earlier records.
    pub fn admit_record(&mut self, record: &QuestionRecord) -> bool {
        if self.records.iter().any(|prev| self.near.matches(prev, record)) {
            return false;
        }
        if !self.admit(&record.question) {
            return false;
        }
        self.records.push(record.clone());
        true
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Keep the first occurrence of each question; returns the survivors and the drop count.
pub fn dedup_questions(
    records: Vec<QuestionRecord>,
    threshold: f64,
    near: NearTarget,
) -> (Vec<QuestionRecord>, usize) {
    let mut d = Deduper::new(threshold).with_near_target(near);
    let before = records.len();
    let kept: Vec<QuestionRecord> = records.into_iter().filter(|r| d.admit_record(r)).collect();
    let dropped = before - kept.len();
    (kept, dropped)
}
