// src/generate/question.rs
//! Question record shape and candidate validation.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::aggregate::ContextBundle;
use crate::ingest::types::{Category, SourceId, SourceRecord};

pub const TIMEFRAME_FORMAT: &str = "%Y/%m/%d";

/// A validated, grounded prediction question. Never mutated after validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionRecord {
    pub question: String,
    #[serde(with = "timeframe_serde")]
    pub timeframe: NaiveDate,
    pub category: Category,
    pub metric: String,
    pub target_value: f64,
    pub measurement_source: String,
}

/// `YYYY/MM/DD`, also accepting `YYYY-MM-DD`.
pub fn parse_timeframe(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, TIMEFRAME_FORMAT)
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .ok()
}

mod timeframe_serde {
    use super::{parse_timeframe, TIMEFRAME_FORMAT};
    use chrono::NaiveDate;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &NaiveDate, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&d.format(TIMEFRAME_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDate, D::Error> {
        let raw = String::deserialize(d)?;
        parse_timeframe(&raw).ok_or_else(|| de::Error::custom(format!("bad timeframe: {raw}")))
    }
}

/// How far a target may sit from its reference reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundingPolicy {
    /// Allowed band is `[ref / max_ratio, ref * max_ratio]` in absolute terms.
    pub max_ratio: f64,
    /// Reject questions whose metric has no reference record in the bundle.
    pub require_anchor: bool,
}

impl Default for GroundingPolicy {
    fn default() -> Self {
        Self {
            max_ratio: 10.0,
            require_anchor: false,
        }
    }
}

impl GroundingPolicy {
    pub fn admits(&self, target: f64, reference: f64) -> bool {
        if reference.abs() < f64::EPSILON {
            return true;
        }
        let ratio = target.abs() / reference.abs();
        ratio >= 1.0 / self.max_ratio && ratio <= self.max_ratio
    }
}

/// Why a candidate was dropped. The text goes back to the model in the corrective prompt.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Rejection {
    #[error("entry is not a JSON object")]
    NotAnObject,
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("question must start with \"Will \"")]
    NotAQuestion,
    #[error("target_value `{0}` is not a number")]
    NonNumericTarget(String),
    #[error("timeframe `{0}` is not a YYYY/MM/DD date")]
    TimeframeUnparseable(String),
    #[error("timeframe {0} is not in the future")]
    TimeframeNotFuture(NaiveDate),
    #[error("timeframe {0} is beyond the allowed horizon")]
    BeyondHorizon(NaiveDate),
    #[error("unknown category `{0}`")]
    UnknownCategory(String),
    #[error("no data available for category {0}")]
    UnavailableCategory(Category),
    #[error("measurement_source `{name}` is not a source for {category}")]
    UnresolvableSource { name: String, category: Category },
    #[error("no reference reading for metric `{0}`")]
    NoAnchor(String),
    #[error("target {target} is out of range of the reference value {reference}")]
    OutOfGroundingRange { target: f64, reference: f64 },
    #[error("duplicate of an earlier question")]
    Duplicate,
}

impl Rejection {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Rejection::NotAnObject => "not_object",
            Rejection::MissingField(_) => "missing_field",
            Rejection::NotAQuestion => "not_question",
            Rejection::NonNumericTarget(_) => "non_numeric_target",
            Rejection::TimeframeUnparseable(_) => "timeframe_unparseable",
            Rejection::TimeframeNotFuture(_) => "timeframe_past",
            Rejection::BeyondHorizon(_) => "beyond_horizon",
            Rejection::UnknownCategory(_) => "unknown_category",
            Rejection::UnavailableCategory(_) => "unavailable_category",
            Rejection::UnresolvableSource { .. } => "unresolvable_source",
            Rejection::NoAnchor(_) => "no_anchor",
            Rejection::OutOfGroundingRange { .. } => "out_of_range",
            Rejection::Duplicate => "duplicate",
        }
    }
}

/// Inputs every candidate is checked against.
pub struct ValidationContext<'a> {
    pub today: NaiveDate,
    pub max_horizon_days: u32,
    pub policy: &'a GroundingPolicy,
    pub bundle: &'a ContextBundle,
}

const REQUIRED_FIELDS: [&str; 6] = [
    "question",
    "timeframe",
    "category",
    "metric",
    "target_value",
    "measurement_source",
];

fn field_str<'v>(obj: &'v serde_json::Map<String, Value>, name: &'static str) -> Result<&'v str, Rejection> {
    match obj.get(name) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim()),
        _ => Err(Rejection::MissingField(name)),
    }
}

/// Numbers pass through; strings lose `$`, `%`, `,` and surrounding space first.
pub fn parse_target(v: &Value) -> Result<f64, Rejection> {
    let parsed = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s
            .replace(['$', '%', ','], "")
            .trim()
            .parse::<f64>()
            .ok(),
        _ => None,
    };
    parsed
        .filter(|f| f.is_finite())
        .ok_or_else(|| Rejection::NonNumericTarget(v.to_string()))
}

/// Question metric → record metric. Models tend to say `price_target` for a price.
pub fn canonical_metric(metric: &str) -> String {
    let m = metric.trim().to_ascii_lowercase().replace([' ', '-'], "_");
    match m.as_str() {
        "price_target" | "stock_price" | "close_price" | "closing_price" | "share_price" => {
            "price".to_string()
        }
        "fatality_count" | "deaths" => "fatalities".to_string(),
        "unemployment" => "unemployment_rate".to_string(),
        "fed_funds_rate" | "federal_funds_rate" => "interest_rate".to_string(),
        "protests" => "protest_count".to_string(),
        "riots" => "riot_count".to_string(),
        _ => m,
    }
}

/// Reference record a question is about: same metric, and when several match,
/// the one whose subject or label the question mentions.
pub fn find_anchor<'r>(records: &'r [SourceRecord], metric: &str, question: &str) -> Option<&'r SourceRecord> {
    let metric = canonical_metric(metric);
    let candidates: Vec<&SourceRecord> = records
        .iter()
        .filter(|r| r.value.is_some() && r.metric_name == metric)
        .collect();
    if candidates.len() <= 1 {
        return candidates.into_iter().next();
    }
    let q = question.to_ascii_lowercase();
    candidates.into_iter().find(|r| {
        let subject = r.subject.to_ascii_lowercase();
        let label = r.label.to_ascii_lowercase();
        (!subject.is_empty() && contains_word(&q, &subject)) || (!label.is_empty() && q.contains(&label))
    })
}

fn contains_word(haystack: &str, word: &str) -> bool {
    haystack
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|w| w == word)
}

/// Check one parsed candidate. Duplicates are handled by the caller.
pub fn validate_candidate(v: &Value, ctx: &ValidationContext<'_>) -> Result<QuestionRecord, Rejection> {
    let obj = v.as_object().ok_or(Rejection::NotAnObject)?;
    for name in REQUIRED_FIELDS {
        if obj.get(name).map_or(true, Value::is_null) {
            return Err(Rejection::MissingField(name));
        }
    }

    let question = field_str(obj, "question")?;
    if !question.starts_with("Will ") {
        return Err(Rejection::NotAQuestion);
    }

    let target_value = parse_target(&obj["target_value"])?;

    let raw_tf = field_str(obj, "timeframe")?;
    let timeframe =
        parse_timeframe(raw_tf).ok_or_else(|| Rejection::TimeframeUnparseable(raw_tf.to_string()))?;
    if timeframe <= ctx.today {
        return Err(Rejection::TimeframeNotFuture(timeframe));
    }
    let horizon = ctx
        .today
        .checked_add_signed(Duration::days(i64::from(ctx.max_horizon_days)))
        .unwrap_or(NaiveDate::MAX);
    if timeframe > horizon {
        return Err(Rejection::BeyondHorizon(timeframe));
    }

    let raw_cat = field_str(obj, "category")?;
    let category = Category::parse(raw_cat).ok_or_else(|| Rejection::UnknownCategory(raw_cat.to_string()))?;
    if !ctx.bundle.is_available(category) {
        return Err(Rejection::UnavailableCategory(category));
    }

    let raw_source = field_str(obj, "measurement_source")?;
    let source = SourceId::resolve_measurement_source(raw_source)
        .filter(|id| id.category() == Some(category))
        .ok_or_else(|| Rejection::UnresolvableSource {
            name: raw_source.to_string(),
            category,
        })?;

    let metric = field_str(obj, "metric")?.to_ascii_lowercase();

    match find_anchor(ctx.bundle.records(category), &metric, question) {
        Some(anchor) => {
            if let Some(reference) = anchor.value {
                if !ctx.policy.admits(target_value, reference) {
                    return Err(Rejection::OutOfGroundingRange {
                        target: target_value,
                        reference,
                    });
                }
            }
        }
        None if ctx.policy.require_anchor => return Err(Rejection::NoAnchor(metric)),
        None => {}
    }

    Ok(QuestionRecord {
        question: question.to_string(),
        timeframe,
        category,
        metric,
        target_value,
        measurement_source: source.canonical_measurement_name().to_string(),
    })
}
