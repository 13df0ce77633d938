// src/output.rs
//! Writes the delivered questions as a timestamped JSON array.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::generate::question::QuestionRecord;
use crate::ingest::types::Category;

pub const FILE_PREFIX: &str = "financial_questions";

/// `financial_questions_YYYY-MM-DD-HH-MM.json`
pub fn output_file_name(now: DateTime<Utc>) -> String {
    format!("{FILE_PREFIX}_{}.json", now.format("%Y-%m-%d-%H-%M"))
}

pub fn save_questions(records: &[QuestionRecord], dir: &Path, now: DateTime<Utc>) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("creating output dir {}", dir.display()))?;
    let path = dir.join(output_file_name(now));
    let body = serde_json::to_string_pretty(records).context("serializing questions")?;
    fs::write(&path, body).with_context(|| format!("writing {}", path.display()))?;
    tracing::info!(path = %path.display(), count = records.len(), "questions saved");
    Ok(path)
}

pub fn category_distribution(records: &[QuestionRecord]) -> BTreeMap<Category, usize> {
    let mut out = BTreeMap::new();
    for r in records {
        *out.entry(r.category).or_insert(0) += 1;
    }
    out
}

pub fn log_distribution(records: &[QuestionRecord]) {
    for (category, count) in category_distribution(records) {
        tracing::info!(category = %category, count, "questions by category");
    }
}
