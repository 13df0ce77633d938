//! Question generator: one batch run.
//! Loads configuration and credentials, builds the context bundle, generates
//! questions in batches and writes them to a timestamped JSON file.
//!
//! See `README.md` for configuration keys and environment variables.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use prediction_question_generator::clock::{Clock, SharedClock, SystemClock};
use prediction_question_generator::config::{Credentials, GeneratorConfig};
use prediction_question_generator::generate::backend::{OllamaBackend, DEFAULT_OLLAMA_HOST};
use prediction_question_generator::metrics::{Metrics, ENV_METRICS_PATH};
use prediction_question_generator::output::{log_distribution, save_questions};
use prediction_question_generator::run_pipeline;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Compact logs by default; `QGEN_LOG_JSON=1` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("prediction_question_generator=info,warn"));

    let json = std::env::var("QGEN_LOG_JSON").ok().is_some_and(|v| v == "1");
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env in local/dev; missing file is fine.
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = match GeneratorConfig::load() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = ?e, "config load failed");
            return ExitCode::from(2);
        }
    };
    let creds = Credentials::from_env();
    tracing::info!(?creds, model = %config.model, questions = config.questions, "starting run");

    let metrics = match Metrics::init(&config) {
        Ok(m) => Some(m),
        Err(e) => {
            tracing::warn!(error = ?e, "metrics disabled");
            None
        }
    };

    if !config.model.is_remote() {
        let host = creds.ollama_host.as_deref().unwrap_or(DEFAULT_OLLAMA_HOST);
        match OllamaBackend::new(host, config.model.model_id(), config.http_timeout()) {
            Ok(client) => match client.server_version().await {
                Ok(version) => tracing::info!(host, version = %version, "ollama reachable"),
                Err(e) => {
                    tracing::error!(error = ?e, host, "ollama not reachable; start it with `ollama serve`");
                    return ExitCode::from(2);
                }
            },
            Err(e) => {
                tracing::error!(error = ?e, "ollama client");
                return ExitCode::from(2);
            }
        }
    }

    let clock: SharedClock = Arc::new(SystemClock);
    let report = match run_pipeline(&config, &creds, clock.clone()).await {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(error = %e, "run aborted");
            return ExitCode::from(2);
        }
    };

    for o in &report.omissions {
        tracing::warn!(source = %o.source_id, cause = %o.cause, "source omitted");
    }
    for f in &report.failed_batches {
        tracing::warn!(batch = f.batch_index, cause = %f.cause, "batch failed");
    }
    log_distribution(&report.records);

    let mut code = ExitCode::SUCCESS;
    if report.records.is_empty() {
        tracing::error!(summary = %report, "no questions generated");
        code = ExitCode::FAILURE;
    } else if let Err(e) = save_questions(&report.records, &config.output_dir, clock.now()) {
        tracing::error!(error = ?e, "saving questions failed");
        code = ExitCode::FAILURE;
    }
    tracing::info!(summary = %report, "done");

    if let (Some(m), Ok(path)) = (metrics.as_ref(), std::env::var(ENV_METRICS_PATH)) {
        if let Err(e) = m.write_to(&PathBuf::from(path)) {
            tracing::warn!(error = ?e, "metrics dump failed");
        }
    }
    code
}
