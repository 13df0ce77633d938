// src/aggregate.rs
//! Builds the per-run context bundle from the enabled source adapters.
//!
//! Adapters run concurrently; the bundle is assembled in a fixed order so two
//! builds over the same cache state serialize to the same bytes.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use crate::clock::SharedClock;
use crate::error::PipelineError;
use crate::ingest::providers::acled;
use crate::ingest::types::{Category, DateWindow, SourceAdapter, SourceId, SourceQuery, SourceRecord};

/// What to fetch: one query per requested category, plus optional news context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryFilters {
    pub categories: BTreeMap<Category, SourceQuery>,
    #[serde(default)]
    pub news: Option<SourceQuery>,
}

impl CategoryFilters {
    pub fn with_category(mut self, category: Category, query: SourceQuery) -> Self {
        self.categories.insert(category, query);
        self
    }

    pub fn with_news(mut self, query: SourceQuery) -> Self {
        self.news = Some(query);
        self
    }
}

/// A source that contributed nothing, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Omission {
    pub source_id: SourceId,
    pub category: Option<Category>,
    pub cause: String,
}

/// Reference data for one run. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextBundle {
    pub records: BTreeMap<Category, Vec<SourceRecord>>,
    /// News context shared by every category.
    pub headlines: Vec<SourceRecord>,
    pub filters: CategoryFilters,
    /// Conflict-event date range, when social events were requested.
    pub date_range: Option<DateWindow>,
    pub empty_categories: BTreeSet<Category>,
    pub omissions: Vec<Omission>,
}

impl ContextBundle {
    pub fn records(&self, category: Category) -> &[SourceRecord] {
        self.records.get(&category).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Categories with at least one record, in canonical order.
    pub fn available_categories(&self) -> Vec<Category> {
        self.records
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(c, _)| *c)
            .collect()
    }

    pub fn is_available(&self, category: Category) -> bool {
        !self.records(category).is_empty()
    }

    pub fn record_count(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }

    /// The `n` most recent headlines.
    pub fn recent_headlines(&self, n: usize) -> Vec<&SourceRecord> {
        let mut v: Vec<&SourceRecord> = self.headlines.iter().collect();
        v.sort_by(|a, b| b.observed_at.cmp(&a.observed_at));
        v.truncate(n);
        v
    }
}

pub struct Aggregator {
    adapters: BTreeMap<SourceId, Arc<dyn SourceAdapter>>,
    clock: SharedClock,
}

impl Aggregator {
    pub fn new(adapters: Vec<Arc<dyn SourceAdapter>>, clock: SharedClock) -> Self {
        let adapters = adapters
            .into_iter()
            .map(|a| (a.source_id(), a))
            .collect();
        Self { adapters, clock }
    }

    pub fn source_ids(&self) -> Vec<SourceId> {
        self.adapters.keys().copied().collect()
    }

    pub async fn build(&self, filters: &CategoryFilters) -> ContextBundle {
        let mut jobs: Vec<(SourceId, SourceQuery)> = Vec::new();
        let mut omissions = Vec::new();

        for (category, query) in &filters.categories {
            let id = SourceId::for_category(*category);
            if self.adapters.contains_key(&id) {
                jobs.push((id, query.clone()));
            } else {
                tracing::warn!(source = %id, category = %category, "no adapter configured; category skipped");
                omissions.push(Omission {
                    source_id: id,
                    category: Some(*category),
                    cause: "not configured".to_string(),
                });
            }
        }
        if let Some(news) = &filters.news {
            if self.adapters.contains_key(&SourceId::NewsApi) {
                jobs.push((SourceId::NewsApi, news.clone()));
            } else {
                tracing::debug!("news adapter not configured; prompts go without headlines");
            }
        }

        let mut set = JoinSet::new();
        for (id, query) in jobs {
            let Some(adapter) = self.adapters.get(&id).cloned() else {
                continue;
            };
            set.spawn(async move { (id, adapter.fetch(&query).await) });
        }

        let mut results: BTreeMap<SourceId, Result<Vec<SourceRecord>, PipelineError>> = BTreeMap::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((id, res)) => {
                    results.insert(id, res);
                }
                Err(e) => tracing::error!(error = %e, "adapter task aborted"),
            }
        }

        let mut bundle = ContextBundle {
            filters: filters.clone(),
            ..Default::default()
        };
        for category in filters.categories.keys() {
            let id = SourceId::for_category(*category);
            let records = match results.remove(&id) {
                Some(Ok(records)) => records,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, category = %category, "source omitted");
                    omissions.push(Omission {
                        source_id: id,
                        category: Some(*category),
                        cause: e.to_string(),
                    });
                    Vec::new()
                }
                None => {
                    if self.adapters.contains_key(&id) {
                        omissions.push(Omission {
                            source_id: id,
                            category: Some(*category),
                            cause: "adapter task aborted".to_string(),
                        });
                    }
                    Vec::new()
                }
            };
            if records.is_empty() {
                bundle.empty_categories.insert(*category);
            }
            bundle.records.insert(*category, records);
        }

        match results.remove(&SourceId::NewsApi) {
            Some(Ok(mut headlines)) => {
                headlines.sort_by(|a, b| {
                    b.observed_at
                        .cmp(&a.observed_at)
                        .then_with(|| a.label.cmp(&b.label))
                });
                bundle.headlines = headlines;
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "news omitted");
                omissions.push(Omission {
                    source_id: SourceId::NewsApi,
                    category: None,
                    cause: e.to_string(),
                });
            }
            None => {}
        }

        if let Some(q) = filters.categories.get(&Category::Social) {
            bundle.date_range = DateWindow::ending_yesterday(
                self.clock.today(),
                q.lookback_days.unwrap_or(acled::DEFAULT_LOOKBACK_DAYS),
            );
        }

        omissions.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        bundle.omissions = omissions;

        tracing::info!(
            records = bundle.record_count(),
            headlines = bundle.headlines.len(),
            empty = bundle.empty_categories.len(),
            omitted = bundle.omissions.len(),
            "context bundle built"
        );
        bundle
    }
}
