// src/generate/mod.rs
//! Question generation for one batch: pick a category, prompt the model,
//! validate what comes back, retry once for the slots still empty.

pub mod backend;
pub mod dedup;
pub mod parse;
pub mod prompt;
pub mod question;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Duration as ChronoDuration, NaiveDate};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;

use crate::aggregate::ContextBundle;
use crate::clock::SharedClock;
use crate::error::PipelineError;
use crate::ingest::types::Category;

use backend::{ChatMessage, SharedBackend};
use dedup::{Deduper, NearTarget};
use prompt::PromptInput;
use question::{GroundingPolicy, QuestionRecord, Rejection, ValidationContext};

/// Records embedded per prompt at most.
pub const MAX_ANCHORS: usize = 40;
/// Headlines embedded per prompt at most.
pub const MAX_HEADLINES: usize = 3;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("generation_batches_total", "Batches sent to the model backend.");
        describe_counter!(
            "generation_failures_total",
            "Batches that ended in GenerationFailed."
        );
        describe_counter!("generation_retries_total", "Corrective follow-up calls.");
        describe_counter!(
            "questions_rejected_total",
            "Model candidates dropped by validation, by reason."
        );
        describe_histogram!("model_call_ms", "Model backend call latency in milliseconds.");
    });
}

/// One unit of work handed from the orchestrator to the generator.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub batch_index: usize,
    pub batch_size: usize,
    /// Explicit pick; otherwise chosen from `category_weights` by batch index.
    pub category: Option<Category>,
    pub category_weights: BTreeMap<Category, u32>,
    pub model_id: String,
    pub context: Arc<ContextBundle>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    pub batch_index: usize,
    pub category: Category,
    pub requested: usize,
    pub records: Vec<QuestionRecord>,
    /// Slots left empty after the corrective retry.
    pub shortfall: usize,
    pub rejections: Vec<Rejection>,
    pub retried: bool,
}

#[derive(Debug, Clone)]
pub struct GeneratorSettings {
    pub model_timeout: Duration,
    pub max_horizon_days: u32,
    pub grounding: GroundingPolicy,
    pub similarity_threshold: f64,
    pub near_target: NearTarget,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            model_timeout: Duration::from_secs(120),
            max_horizon_days: 365,
            grounding: GroundingPolicy::default(),
            similarity_threshold: dedup::DEFAULT_SIMILARITY,
            near_target: NearTarget::default(),
        }
    }
}

/// Available categories weighted by how much context each has.
pub fn category_weights(bundle: &ContextBundle) -> BTreeMap<Category, u32> {
    bundle
        .records
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(c, v)| (*c, u32::try_from(v.len()).unwrap_or(u32::MAX)))
        .collect()
}

/// Smooth weighted round-robin: the pick for `batch_index` is the `batch_index`-th
/// step of the sequence, so the same weights always give the same order.
pub fn select_category(weights: &BTreeMap<Category, u32>, batch_index: usize) -> Option<Category> {
    let live: Vec<(Category, i64)> = weights
        .iter()
        .filter(|(_, w)| **w > 0)
        .map(|(c, w)| (*c, i64::from(*w)))
        .collect();
    if live.is_empty() {
        return None;
    }
    let total: i64 = live.iter().map(|(_, w)| w).sum();
    let mut current = vec![0i64; live.len()];
    let mut pick = 0;
    for _ in 0..=batch_index {
        for (cur, (_, w)) in current.iter_mut().zip(&live) {
            *cur += w;
        }
        pick = (0..live.len())
            .max_by(|&a, &b| current[a].cmp(&current[b]).then(b.cmp(&a)))
            .unwrap_or(0);
        current[pick] -= total;
    }
    Some(live[pick].0)
}

#[derive(Debug, Clone, PartialEq)]
enum Slot {
    Pending,
    Retrying,
    Succeeded(QuestionRecord),
    Failed,
}

pub struct QuestionGenerator {
    backend: SharedBackend,
    clock: SharedClock,
    settings: GeneratorSettings,
}

impl QuestionGenerator {
    pub fn new(backend: SharedBackend, clock: SharedClock, settings: GeneratorSettings) -> Self {
        ensure_metrics_described();
        Self {
            backend,
            clock,
            settings,
        }
    }

    pub fn backend(&self) -> &SharedBackend {
        &self.backend
    }

    pub fn settings(&self) -> &GeneratorSettings {
        &self.settings
    }

    async fn call_model(&self, messages: &[ChatMessage]) -> anyhow::Result<String> {
        let t0 = Instant::now();
        let res = tokio::time::timeout(self.settings.model_timeout, self.backend.complete(messages)).await;
        histogram!("model_call_ms", "backend" => self.backend.name())
            .record(t0.elapsed().as_secs_f64() * 1_000.0);
        match res {
            Ok(inner) => inner,
            Err(_) => Err(anyhow::anyhow!(
                "model call timed out after {}s",
                self.settings.model_timeout.as_secs()
            )),
        }
    }

    /// Validate candidates into the slots in `want` state, in response order.
    fn fill(
        &self,
        text: &str,
        slots: &mut [Slot],
        want: &Slot,
        ctx: &ValidationContext<'_>,
        seen: &mut Deduper,
        rejections: &mut Vec<Rejection>,
    ) {
        for candidate in parse::extract_candidates(text) {
            let Some(slot) = slots.iter_mut().find(|s| **s == *want) else {
                break;
            };
            let verdict = question::validate_candidate(&candidate, ctx).and_then(|q| {
                if seen.admit_record(&q) {
                    Ok(q)
                } else {
                    Err(Rejection::Duplicate)
                }
            });
            match verdict {
                Ok(q) => *slot = Slot::Succeeded(q),
                Err(r) => {
                    tracing::debug!(reason = %r, "candidate rejected");
                    counter!("questions_rejected_total", "reason" => r.kind()).increment(1);
                    rejections.push(r);
                }
            }
        }
    }

    pub async fn generate(&self, req: &GenerationRequest) -> Result<BatchOutcome, PipelineError> {
        let idx = req.batch_index;
        let bundle = req.context.as_ref();
        counter!("generation_batches_total").increment(1);

        let category = req
            .category
            .filter(|c| bundle.is_available(*c))
            .or_else(|| select_category(&req.category_weights, idx))
            .filter(|c| bundle.is_available(*c))
            .ok_or_else(|| {
                counter!("generation_failures_total").increment(1);
                PipelineError::generation_failed(idx, "no category has context")
            })?;

        let today = self.clock.today();
        let earliest = today + ChronoDuration::days(1);
        let latest = today
            .checked_add_signed(ChronoDuration::days(i64::from(self.settings.max_horizon_days.max(1))))
            .unwrap_or(NaiveDate::MAX);
        let anchors = bundle.records(category);
        let anchors = &anchors[..anchors.len().min(MAX_ANCHORS)];
        let headlines = bundle.recent_headlines(MAX_HEADLINES);

        let mut messages = vec![
            ChatMessage::system(prompt::system_prompt()),
            ChatMessage::user(prompt::render_user_prompt(&PromptInput {
                count: req.batch_size,
                category,
                anchors,
                headlines: &headlines,
                earliest,
                latest,
            })),
        ];

        let first = self.call_model(&messages).await.map_err(|e| {
            tracing::warn!(error = ?e, batch = idx, model = %req.model_id, "model call failed");
            counter!("generation_failures_total").increment(1);
            PipelineError::generation_failed(idx, format!("{e:#}"))
        })?;

        let ctx = ValidationContext {
            today,
            max_horizon_days: self.settings.max_horizon_days,
            policy: &self.settings.grounding,
            bundle,
        };
        let mut slots = vec![Slot::Pending; req.batch_size];
        let mut seen = Deduper::new(self.settings.similarity_threshold)
            .with_near_target(self.settings.near_target);
        let mut rejections = Vec::new();
        self.fill(&first, &mut slots, &Slot::Pending, &ctx, &mut seen, &mut rejections);

        let residual = slots.iter().filter(|s| **s == Slot::Pending).count();
        let retried = residual > 0;
        if retried {
            for s in slots.iter_mut().filter(|s| **s == Slot::Pending) {
                *s = Slot::Retrying;
            }
            counter!("generation_retries_total").increment(1);
            tracing::info!(batch = idx, residual, rejected = rejections.len(), "corrective retry");

            messages.push(ChatMessage::assistant(first));
            messages.push(ChatMessage::user(prompt::render_corrective_prompt(
                residual,
                &rejections,
            )));
            match self.call_model(&messages).await {
                Ok(text) => {
                    self.fill(&text, &mut slots, &Slot::Retrying, &ctx, &mut seen, &mut rejections)
                }
                Err(e) => tracing::warn!(error = ?e, batch = idx, "corrective call failed"),
            }
            for s in slots.iter_mut().filter(|s| **s == Slot::Retrying) {
                *s = Slot::Failed;
            }
        }

        let shortfall = slots.iter().filter(|s| **s == Slot::Failed).count();
        let records: Vec<QuestionRecord> = slots
            .into_iter()
            .filter_map(|s| match s {
                Slot::Succeeded(q) => Some(q),
                _ => None,
            })
            .collect();

        if records.is_empty() {
            counter!("generation_failures_total").increment(1);
            return Err(PipelineError::generation_failed(
                idx,
                format!("no valid question records after retry ({} rejected)", rejections.len()),
            ));
        }
        if shortfall > 0 {
            tracing::warn!(batch = idx, shortfall, "batch short after retry");
        }
        tracing::info!(batch = idx, category = %category, records = records.len(), "batch generated");

        Ok(BatchOutcome {
            batch_index: idx,
            category,
            requested: req.batch_size,
            records,
            shortfall,
            rejections,
            retried,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights(pairs: &[(Category, u32)]) -> BTreeMap<Category, u32> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn round_robin_follows_weights() {
        let w = weights(&[(Category::Economic, 2), (Category::Crypto, 1)]);
        let picks: Vec<Category> = (0..6).filter_map(|i| select_category(&w, i)).collect();
        assert_eq!(
            picks,
            vec![
                Category::Economic,
                Category::Crypto,
                Category::Economic,
                Category::Economic,
                Category::Crypto,
                Category::Economic,
            ]
        );
    }

    #[test]
    fn zero_weight_categories_are_never_picked() {
        let w = weights(&[(Category::Social, 0), (Category::Financial, 3)]);
        assert!((0..10).all(|i| select_category(&w, i) == Some(Category::Financial)));
        assert_eq!(select_category(&BTreeMap::new(), 0), None);
    }

    #[test]
    fn selection_is_deterministic() {
        let w = weights(&[(Category::Economic, 5), (Category::Social, 3), (Category::Crypto, 2)]);
        let a: Vec<_> = (0..20).map(|i| select_category(&w, i)).collect();
        let b: Vec<_> = (0..20).map(|i| select_category(&w, i)).collect();
        assert_eq!(a, b);
    }
}
