// tests/config_load.rs
// Config file discovery and credential loading. Tests touch process env, so they run serially.
use std::io::Write;

use serial_test::serial;

use prediction_question_generator::config::credentials::{
    ENV_ACLED_API_KEY, ENV_ACLED_EMAIL, ENV_FRED_API_KEY, ENV_OPENAI_API_KEY,
};
use prediction_question_generator::config::{Credentials, GeneratorConfig, ENV_CONFIG_PATH};
use prediction_question_generator::generate::backend::ModelChoice;
use prediction_question_generator::orchestrator::ConcurrencyMode;

#[test]
#[serial]
fn env_path_points_at_the_config_file() {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        f,
        r#"
questions = 12
batch_size = 4
model = "remote-v2"
parallel = true
worker_limit = 3
countries = ["USA", "DEU"]

[news]
keywords = ["inflation"]
"#
    )
    .unwrap();
    std::env::set_var(ENV_CONFIG_PATH, f.path());

    let c = GeneratorConfig::load().unwrap();
    std::env::remove_var(ENV_CONFIG_PATH);

    assert_eq!(c.questions, 12);
    assert_eq!(c.model, ModelChoice::RemoteV2);
    assert_eq!(c.concurrency_mode(), ConcurrencyMode::Parallel { worker_limit: 3 });
    assert!(c.countries.contains("DEU"));
    assert!(c.news.enabled);
    assert_eq!(c.news.category, "business");
    c.validate().unwrap();
}

#[test]
#[serial]
fn missing_file_means_defaults() {
    let dir = tempfile::tempdir().unwrap();
    std::env::set_var(ENV_CONFIG_PATH, dir.path().join("nope.toml"));
    let c = GeneratorConfig::load().unwrap();
    std::env::remove_var(ENV_CONFIG_PATH);
    assert_eq!(c, GeneratorConfig::default());
}

#[test]
#[serial]
fn malformed_file_is_an_error_naming_the_path() {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    writeln!(f, "questions = \"many\"").unwrap();
    std::env::set_var(ENV_CONFIG_PATH, f.path());
    let err = GeneratorConfig::load().unwrap_err();
    std::env::remove_var(ENV_CONFIG_PATH);
    assert!(err.to_string().contains(&f.path().display().to_string()));
}

#[test]
fn unknown_model_is_rejected_at_parse_time() {
    assert!(GeneratorConfig::from_toml_str(r#"model = "remote-v9""#).is_err());
}

#[test]
#[serial]
fn credentials_come_from_env_and_blank_means_missing() {
    std::env::set_var(ENV_OPENAI_API_KEY, "sk-test");
    std::env::set_var(ENV_FRED_API_KEY, "   ");
    std::env::set_var(ENV_ACLED_API_KEY, "acled");
    std::env::remove_var(ENV_ACLED_EMAIL);

    let creds = Credentials::from_env();
    for k in [ENV_OPENAI_API_KEY, ENV_FRED_API_KEY, ENV_ACLED_API_KEY] {
        std::env::remove_var(k);
    }

    assert_eq!(creds.openai_api_key.as_deref(), Some("sk-test"));
    assert!(creds.fred_api_key.is_none());
    assert!(creds.acled().is_none(), "ACLED needs the e-mail too");

    let dbg = format!("{creds:?}");
    assert!(!dbg.contains("sk-test"));
    assert!(dbg.contains("openai_api_key: \"set\""));
}
