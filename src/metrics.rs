// src/metrics.rs
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use metrics::{describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::config::GeneratorConfig;

pub const ENV_METRICS_PATH: &str = "QGEN_METRICS_PATH";

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and publish the run's static settings.
    pub fn init(config: &GeneratorConfig) -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;

        describe_gauge!("run_questions_requested", "Question target of the current run.");
        describe_gauge!("run_batch_size", "Configured batch size.");
        gauge!("run_questions_requested").set(config.questions as f64);
        gauge!("run_batch_size").set(config.batch_size as f64);

        Ok(Self { handle })
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Dump the exposition text for scraping by a file-based collector.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        fs::write(path, self.render()).with_context(|| format!("writing metrics to {}", path.display()))
    }
}
