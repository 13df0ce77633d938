// src/generate/prompt.rs
//! Prompt text for the question model.

use std::fmt::Write as _;

use chrono::NaiveDate;

use super::question::{Rejection, TIMEFRAME_FORMAT};
use crate::ingest::types::{Category, SourceId, SourceRecord};

/// Per-category line format and example metric.
fn category_format(category: Category) -> (&'static str, &'static str, &'static str) {
    match category {
        Category::Crypto => (
            "Will [coin] price exceed [X] by [date]?",
            "price_target",
            "a price near the current quote",
        ),
        Category::Economic => (
            "Will [indicator] [rise above / fall below] [X] by [date]?",
            "unemployment_rate",
            "a value near the latest reading",
        ),
        Category::Social => (
            "Will [event type] count in [country] exceed [X] by [date]?",
            "protest_count",
            "a count near the recent total",
        ),
        Category::Financial => (
            "Will [stock] price exceed [X] by [date]?",
            "price_target",
            "a price near the latest close",
        ),
    }
}

pub fn system_prompt() -> String {
    let mut s = String::from(
        "You are a financial analyst. Generate diverse, verifiable prediction questions \
         using this EXACT format for each category:\n\n",
    );
    for category in Category::ALL {
        let (question, metric, target) = category_format(category);
        let source = SourceId::for_category(category).canonical_measurement_name();
        let _ = write!(
            s,
            "For {category} questions:\n\
             {{\"question\": \"{question}\",\n \
             \"timeframe\": \"YYYY/MM/DD\",\n \
             \"category\": \"{category}\",\n \
             \"metric\": \"{metric}\",\n \
             \"target_value\": [{target}],\n \
             \"measurement_source\": \"{source}\"}}\n\n"
        );
    }
    s.push_str(
        "IMPORTANT RULES:\n\
         1. Use ONLY these exact categories and sources\n\
         2. Every question starts with \"Will \"\n\
         3. target_value is a plain number grounded in the data provided\n\
         4. Do not repeat similar questions\n\
         5. Answer with a single JSON array and nothing else",
    );
    s
}

fn format_value(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{v:.0}")
    } else if v.abs() >= 100.0 {
        format!("{v:.2}")
    } else {
        format!("{v:.4}")
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_string()
    }
}

/// One anchor line, e.g. `- Bitcoin (BTC): 68250.50 USD as of 2026/05/31`.
pub fn anchor_line(r: &SourceRecord) -> String {
    let mut line = match r.value {
        Some(v) => format!("- {} ({}): {} {}", r.label, r.subject, format_value(v), r.unit),
        None => format!("- {} ({})", r.label, r.subject),
    };
    let _ = write!(line, " as of {}", r.observed_at.format(TIMEFRAME_FORMAT));
    if let Some(yoy) = r.raw_reference.get("yoy_change_pct").and_then(|v| v.as_f64()) {
        let _ = write!(line, " (YoY change: {yoy:.1}%)");
    }
    if let Some(chg) = r.raw_reference.get("percent_change_24h").and_then(|v| v.as_f64()) {
        let _ = write!(line, " (24h change: {chg:.1}%)");
    }
    line
}

/// Everything the user prompt embeds.
pub struct PromptInput<'a> {
    pub count: usize,
    pub category: Category,
    pub anchors: &'a [SourceRecord],
    pub headlines: &'a [&'a SourceRecord],
    pub earliest: NaiveDate,
    pub latest: NaiveDate,
}

pub fn render_user_prompt(input: &PromptInput<'_>) -> String {
    let category = input.category;
    let (question, metric, _) = category_format(category);
    let source = SourceId::for_category(category).canonical_measurement_name();
    let earliest = input.earliest.format(TIMEFRAME_FORMAT);
    let latest = input.latest.format(TIMEFRAME_FORMAT);

    let mut s = format!(
        "Generate {n} questions in the {category} category in a SINGLE JSON array like this:\n\n\
         [\n  {{\n    \"question\": \"{question}\",\n    \"timeframe\": \"{latest}\",\n    \
         \"category\": \"{category}\",\n    \"metric\": \"{metric}\",\n    \"target_value\": 0,\n    \
         \"measurement_source\": \"{source}\"\n  }}\n]\n\n\
         IMPORTANT: Put ALL questions in ONE array. Use dates between {earliest} and {latest}.\n\n\
         USE THIS DATA:\n",
        n = input.count,
    );
    for r in input.anchors {
        s.push_str(&anchor_line(r));
        s.push('\n');
    }
    if !input.headlines.is_empty() {
        s.push_str("\nRECENT NEWS:\n");
        for h in input.headlines {
            let _ = writeln!(s, "- {}", h.label);
        }
    }
    s
}

/// Follow-up asking for exactly the residual slots, listing why earlier entries were dropped.
pub fn render_corrective_prompt(residual: usize, rejections: &[Rejection]) -> String {
    let mut reasons: Vec<String> = rejections.iter().map(|r| r.to_string()).collect();
    reasons.sort();
    reasons.dedup();

    let mut s = format!(
        "{} of your questions were rejected. Provide exactly {residual} replacement question{} \
         as a single JSON array in the same format.\n",
        rejections.len(),
        if residual == 1 { "" } else { "s" }
    );
    if !reasons.is_empty() {
        s.push_str("Problems found:\n");
        for r in reasons {
            let _ = writeln!(s, "- {r}");
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn btc() -> SourceRecord {
        SourceRecord {
            source_id: SourceId::CoinMarketCap,
            metric_name: "price".into(),
            subject: "BTC".into(),
            label: "Bitcoin".into(),
            value: Some(68250.5),
            unit: "USD".into(),
            observed_at: Utc.with_ymd_and_hms(2026, 5, 31, 23, 59, 0).unwrap(),
            raw_reference: json!({"percent_change_24h": 1.3}),
        }
    }

    #[test]
    fn anchor_line_carries_value_and_date() {
        assert_eq!(
            anchor_line(&btc()),
            "- Bitcoin (BTC): 68250.50 USD as of 2026/05/31 (24h change: 1.3%)"
        );
    }

    #[test]
    fn user_prompt_embeds_window_anchors_and_news() {
        let anchors = vec![btc()];
        let mut news = btc();
        news.label = "Bitcoin climbs".into();
        news.value = None;
        let headlines = vec![&news];
        let p = render_user_prompt(&PromptInput {
            count: 3,
            category: Category::Crypto,
            anchors: &anchors,
            headlines: &headlines,
            earliest: NaiveDate::from_ymd_opt(2026, 6, 2).unwrap(),
            latest: NaiveDate::from_ymd_opt(2027, 6, 1).unwrap(),
        });
        assert!(p.starts_with("Generate 3 questions in the cryptocurrency category"));
        assert!(p.contains("between 2026/06/02 and 2027/06/01"));
        assert!(p.contains("- Bitcoin (BTC): 68250.50 USD"));
        assert!(p.contains("RECENT NEWS:\n- Bitcoin climbs"));
        assert!(p.contains("\"measurement_source\": \"CoinMarketCap\""));
    }

    #[test]
    fn corrective_prompt_lists_distinct_reasons() {
        let rs = vec![
            Rejection::MissingField("target_value"),
            Rejection::MissingField("target_value"),
        ];
        let p = render_corrective_prompt(1, &rs);
        assert!(p.contains("exactly 1 replacement question as"));
        assert_eq!(p.matches("missing field `target_value`").count(), 1);
    }

    #[test]
    fn system_prompt_names_every_source() {
        let s = system_prompt();
        for name in ["FRED database", "ACLED database", "CoinMarketCap", "EOD Historical Data"] {
            assert!(s.contains(name), "{name}");
        }
    }
}
