// src/orchestrator.rs
//! Splits the question target into batches and runs them sequentially or on a
//! bounded task pool, then merges results in submission order.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::aggregate::{Aggregator, CategoryFilters, ContextBundle, Omission};
use crate::error::PipelineError;
use crate::generate::dedup::dedup_questions;
use crate::generate::question::QuestionRecord;
use crate::generate::{category_weights, select_category, BatchOutcome, GenerationRequest, QuestionGenerator};
use crate::ingest::types::Category;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencyMode {
    Sequential,
    Parallel { worker_limit: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedBatch {
    pub batch_index: usize,
    pub cause: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Shortfall {
    pub batch_index: usize,
    pub missing: usize,
}

/// Result of a run: the records plus everything that kept it short.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub records: Vec<QuestionRecord>,
    pub requested: usize,
    pub delivered: usize,
    pub batches: usize,
    pub failed_batches: Vec<FailedBatch>,
    pub shortfalls: Vec<Shortfall>,
    pub omitted_categories: Vec<Category>,
    pub omissions: Vec<Omission>,
    /// Batches never started because the target was already met.
    pub skipped_batches: usize,
    pub duplicates_removed: usize,
}

impl RunReport {
    pub fn is_short(&self) -> bool {
        self.delivered < self.requested
    }

    pub fn summary(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "requested {}, delivered {}", self.requested, self.delivered)?;
        if !self.failed_batches.is_empty() {
            write!(f, "; {} batch(es) failed", self.failed_batches.len())?;
        }
        let missing: usize = self.shortfalls.iter().map(|s| s.missing).sum();
        if missing > 0 {
            write!(f, "; {missing} slot(s) unfilled after retry")?;
        }
        if self.duplicates_removed > 0 {
            write!(f, "; {} duplicate(s) removed", self.duplicates_removed)?;
        }
        if !self.omitted_categories.is_empty() {
            let names: Vec<&str> = self.omitted_categories.iter().map(|c| c.as_str()).collect();
            write!(f, "; no data for {}", names.join(", "))?;
        }
        Ok(())
    }
}

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "questions_delivered_total",
            "Validated questions handed to the writer."
        );
        describe_counter!(
            "batches_skipped_total",
            "Batches not started because the target was reached."
        );
    });
}

/// Batch sizes for `total` questions: full batches, then the remainder.
pub fn plan_batches(total: usize, batch_size: usize) -> Vec<usize> {
    if total == 0 || batch_size == 0 {
        return Vec::new();
    }
    let n = total.div_ceil(batch_size);
    (0..n).map(|i| batch_size.min(total - i * batch_size)).collect()
}

pub struct Orchestrator {
    aggregator: Arc<Aggregator>,
    generator: Arc<QuestionGenerator>,
    filters: CategoryFilters,
}

impl Orchestrator {
    pub fn new(aggregator: Arc<Aggregator>, generator: Arc<QuestionGenerator>, filters: CategoryFilters) -> Self {
        ensure_metrics_described();
        Self {
            aggregator,
            generator,
            filters,
        }
    }

    /// Build the context bundle, then generate against it.
    pub async fn run(&self, total_questions: usize, batch_size: usize, mode: ConcurrencyMode) -> RunReport {
        let bundle = Arc::new(self.aggregator.build(&self.filters).await);
        self.run_with_bundle(bundle, total_questions, batch_size, mode).await
    }

    pub async fn run_with_bundle(
        &self,
        bundle: Arc<ContextBundle>,
        total_questions: usize,
        batch_size: usize,
        mode: ConcurrencyMode,
    ) -> RunReport {
        let backend = self.generator.backend();
        let batch_size = match backend.max_batch_size() {
            Some(ceiling) if batch_size > ceiling => {
                tracing::info!(requested = batch_size, ceiling, "batch size clamped to backend limit");
                ceiling
            }
            _ => batch_size,
        };
        let plan = plan_batches(total_questions, batch_size);
        self.run_planned(bundle, total_questions, plan, mode).await
    }

    /// Run an explicit batch plan. Sizes are used as given. A plan with more
    /// capacity than `total_questions` stops starting batches once the target is met.
    pub async fn run_planned(
        &self,
        bundle: Arc<ContextBundle>,
        total_questions: usize,
        plan: Vec<usize>,
        mode: ConcurrencyMode,
    ) -> RunReport {
        let backend = self.generator.backend();
        let mode = match mode {
            ConcurrencyMode::Parallel { .. } if !backend.supports_concurrency() => {
                tracing::warn!(backend = backend.name(), "backend does not support concurrent calls; running sequentially");
                ConcurrencyMode::Sequential
            }
            m => m,
        };

        let weights = category_weights(&bundle);
        let requests: Vec<GenerationRequest> = plan
            .iter()
            .enumerate()
            .map(|(i, &size)| GenerationRequest {
                batch_index: i,
                batch_size: size,
                category: select_category(&weights, i),
                category_weights: weights.clone(),
                model_id: backend.model_id().to_string(),
                context: Arc::clone(&bundle),
            })
            .collect();

        tracing::info!(
            total = total_questions,
            batches = requests.len(),
            batch_size = plan.first().copied().unwrap_or(0),
            parallel = matches!(mode, ConcurrencyMode::Parallel { .. }),
            "starting generation"
        );

        let (results, skipped) = if weights.is_empty() {
            tracing::error!("no category has context; nothing to generate");
            (BTreeMap::new(), requests.len())
        } else {
            match mode {
                ConcurrencyMode::Sequential => self.run_sequential(requests, total_questions).await,
                ConcurrencyMode::Parallel { worker_limit } => {
                    self.run_parallel(requests, total_questions, worker_limit.max(1)).await
                }
            }
        };
        if skipped > 0 {
            counter!("batches_skipped_total").increment(skipped as u64);
        }

        let mut report = self.assemble(results, total_questions, plan.len(), skipped);
        report.omitted_categories = bundle.empty_categories.iter().copied().collect();
        report.omissions = bundle.omissions.clone();
        counter!("questions_delivered_total").increment(report.delivered as u64);
        if report.is_short() {
            tracing::warn!(summary = %report, "run finished short");
        } else {
            tracing::info!(summary = %report, "run finished");
        }
        report
    }

    async fn run_sequential(
        &self,
        requests: Vec<GenerationRequest>,
        target: usize,
    ) -> (BTreeMap<usize, Result<BatchOutcome, PipelineError>>, usize) {
        let mut results = BTreeMap::new();
        let mut collected: Vec<QuestionRecord> = Vec::new();
        let total = requests.len();
        let settings = self.generator.settings();

        for (done, req) in requests.into_iter().enumerate() {
            let unique =
                dedup_questions(collected.clone(), settings.similarity_threshold, settings.near_target)
                    .0
                    .len();
            if unique >= target {
                return (results, total - done);
            }
            let res = self.generator.generate(&req).await;
            if let Err(e) = &res {
                tracing::warn!(error = %e, "batch failed; continuing");
            }
            if let Ok(outcome) = &res {
                collected.extend(outcome.records.iter().cloned());
            }
            results.insert(req.batch_index, res);
        }
        (results, 0)
    }

    async fn run_parallel(
        &self,
        requests: Vec<GenerationRequest>,
        target: usize,
        worker_limit: usize,
    ) -> (BTreeMap<usize, Result<BatchOutcome, PipelineError>>, usize) {
        let sem = Arc::new(Semaphore::new(worker_limit));
        let stop = Arc::new(AtomicBool::new(false));
        let produced = Arc::new(AtomicUsize::new(0));
        let mut set = JoinSet::new();
        let mut skipped = 0;

        for req in requests {
            let Ok(permit) = Arc::clone(&sem).acquire_owned().await else {
                break;
            };
            if stop.load(Ordering::SeqCst) {
                skipped += 1;
                continue;
            }
            let generator = Arc::clone(&self.generator);
            let stop = Arc::clone(&stop);
            let produced = Arc::clone(&produced);
            set.spawn(async move {
                let _permit = permit;
                let res = generator.generate(&req).await;
                if let Ok(outcome) = &res {
                    let before = produced.fetch_add(outcome.records.len(), Ordering::SeqCst);
                    if before + outcome.records.len() >= target {
                        stop.store(true, Ordering::SeqCst);
                    }
                }
                (req.batch_index, res)
            });
        }

        let mut results = BTreeMap::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, res)) => {
                    if let Err(e) = &res {
                        tracing::warn!(error = %e, "batch failed; siblings continue");
                    }
                    results.insert(idx, res);
                }
                Err(e) => tracing::error!(error = %e, "batch task aborted"),
            }
        }
        (results, skipped)
    }

    fn assemble(
        &self,
        results: BTreeMap<usize, Result<BatchOutcome, PipelineError>>,
        target: usize,
        batches: usize,
        skipped: usize,
    ) -> RunReport {
        let mut records = Vec::new();
        let mut failed_batches = Vec::new();
        let mut shortfalls = Vec::new();

        // BTreeMap iteration is submission order.
        for (idx, res) in results {
            match res {
                Ok(outcome) => {
                    if outcome.shortfall > 0 {
                        shortfalls.push(Shortfall {
                            batch_index: idx,
                            missing: outcome.shortfall,
                        });
                    }
                    records.extend(outcome.records);
                }
                Err(e) => failed_batches.push(FailedBatch {
                    batch_index: idx,
                    cause: e.to_string(),
                }),
            }
        }

        let settings = self.generator.settings();
        let (mut records, duplicates_removed) =
            dedup_questions(records, settings.similarity_threshold, settings.near_target);
        records.truncate(target);

        RunReport {
            delivered: records.len(),
            records,
            requested: target,
            batches,
            failed_batches,
            shortfalls,
            omitted_categories: Vec::new(),
            omissions: Vec::new(),
            skipped_batches: skipped,
            duplicates_removed,
        }
    }
}
