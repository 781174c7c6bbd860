use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use carbonex_core::config::AppConfig;
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

use crate::commands::{load_config, CommandResult};

const UNSET: &str = "<unset>";

struct Field {
    key: &'static str,
    env_keys: &'static [&'static str],
    value: String,
}

impl Field {
    fn new(key: &'static str, env_keys: &'static [&'static str], value: impl ToString) -> Self {
        Self { key, env_keys, value: value.to_string() }
    }
}

pub fn run() -> CommandResult {
    match load_config("config") {
        Ok(config) => CommandResult { exit_code: 0, output: render(&config) },
        Err(failure) => failure,
    }
}

pub fn render(config: &AppConfig) -> String {
    let file_path = detect_config_path();
    let file_doc = file_path.as_deref().and_then(load_config_file_doc);

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(config) {
        let source = field_source(&field, file_doc.as_ref(), file_path.as_deref());
        lines.push(format!("- {} = {} (source: {source})", field.key, field.value));
    }
    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let database = &config.database;
    let llm = &config.llm;
    let store = &config.vector_store;
    let server = &config.server;
    let logging = &config.logging;

    vec![
        Field::new("database.url", &["CARBONEX_DATABASE_URL"], &database.url),
        Field::new(
            "database.max_connections",
            &["CARBONEX_DATABASE_MAX_CONNECTIONS"],
            database.max_connections,
        ),
        Field::new(
            "database.timeout_secs",
            &["CARBONEX_DATABASE_TIMEOUT_SECS"],
            database.timeout_secs,
        ),
        Field::new("llm.provider", &["CARBONEX_LLM_PROVIDER"], format!("{:?}", llm.provider)),
        Field::new("llm.api_key", &["CARBONEX_LLM_API_KEY"], redact_secret(llm.api_key.as_ref())),
        Field::new(
            "llm.base_url",
            &["CARBONEX_LLM_BASE_URL"],
            llm.base_url.as_deref().unwrap_or(UNSET),
        ),
        Field::new("llm.model", &["CARBONEX_LLM_MODEL"], &llm.model),
        Field::new("llm.embedding_model", &["CARBONEX_LLM_EMBEDDING_MODEL"], &llm.embedding_model),
        Field::new("llm.timeout_secs", &["CARBONEX_LLM_TIMEOUT_SECS"], llm.timeout_secs),
        Field::new("llm.max_retries", &["CARBONEX_LLM_MAX_RETRIES"], llm.max_retries),
        Field::new(
            "vector_store.provider",
            &["CARBONEX_VECTOR_STORE_PROVIDER"],
            format!("{:?}", store.provider),
        ),
        Field::new("vector_store.url", &["CARBONEX_VECTOR_STORE_URL"], &store.url),
        Field::new(
            "vector_store.api_key",
            &["CARBONEX_VECTOR_STORE_API_KEY"],
            redact_secret(store.api_key.as_ref()),
        ),
        Field::new(
            "vector_store.education_collection",
            &["CARBONEX_VECTOR_STORE_EDUCATION_COLLECTION"],
            &store.education_collection,
        ),
        Field::new(
            "vector_store.formalities_collection",
            &["CARBONEX_VECTOR_STORE_FORMALITIES_COLLECTION"],
            &store.formalities_collection,
        ),
        Field::new("vector_store.top_k", &["CARBONEX_VECTOR_STORE_TOP_K"], store.top_k),
        Field::new(
            "vector_store.vector_size",
            &["CARBONEX_VECTOR_STORE_VECTOR_SIZE"],
            store.vector_size,
        ),
        Field::new("server.bind_address", &["CARBONEX_SERVER_BIND_ADDRESS"], &server.bind_address),
        Field::new("server.port", &["CARBONEX_SERVER_PORT"], server.port),
        Field::new(
            "server.health_check_port",
            &["CARBONEX_SERVER_HEALTH_CHECK_PORT"],
            server.health_check_port,
        ),
        Field::new(
            "server.graceful_shutdown_secs",
            &["CARBONEX_SERVER_GRACEFUL_SHUTDOWN_SECS"],
            server.graceful_shutdown_secs,
        ),
        Field::new(
            "logging.level",
            &["CARBONEX_LOGGING_LEVEL", "CARBONEX_LOG_LEVEL"],
            &logging.level,
        ),
        Field::new(
            "logging.format",
            &["CARBONEX_LOGGING_FORMAT", "CARBONEX_LOG_FORMAT"],
            format!("{:?}", logging.format),
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("carbonex.toml"), PathBuf::from("config/carbonex.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: &Path) -> Option<Value> {
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(field: &Field, file_doc: Option<&Value>, file_path: Option<&Path>) -> String {
    if let Some(env_key) = field.env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = file_doc {
        if contains_path(doc, field.key) {
            let file_path = file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

/// Keeps a `sk-` style prefix so operators can tell keys apart.
fn redact_secret(secret: Option<&SecretString>) -> String {
    let Some(secret) = secret else {
        return UNSET.to_string();
    };
    let trimmed = secret.expose_secret().trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    match trimmed.split_once('-') {
        Some((prefix, _)) if prefix.len() <= 4 => format!("{prefix}-***"),
        _ => "<redacted>".to_string(),
    }
}
