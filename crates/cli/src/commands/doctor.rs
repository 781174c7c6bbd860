use carbonex_agent::retrieval::QdrantStore;
use carbonex_agent::VectorStore;
use carbonex_core::config::{AppConfig, LoadOptions, VectorStoreProvider};
use carbonex_db::{connect_with_settings, connection};
use serde::Serialize;

use crate::commands::{escape_json, exit, CommandResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn skipped(name: &'static str) -> Self {
        Self {
            name,
            status: CheckStatus::Skipped,
            details: "skipped because configuration did not load".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code =
        if report.overall_status == CheckStatus::Pass { exit::OK } else { exit::CHECKS_FAILED };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            let (database, vector_store) = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime.block_on(async {
                    (check_database(&config).await, check_vector_store(&config).await)
                }),
                Err(error) => {
                    let details = format!("failed to initialize async runtime: {error}");
                    (
                        DoctorCheck {
                            name: "database_connectivity",
                            status: CheckStatus::Fail,
                            details: details.clone(),
                        },
                        DoctorCheck {
                            name: "vector_store_reachability",
                            status: CheckStatus::Fail,
                            details,
                        },
                    )
                }
            };
            checks.push(database);
            checks.push(vector_store);
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.push(DoctorCheck::skipped("database_connectivity"));
            checks.push(DoctorCheck::skipped("vector_store_reachability"));
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

async fn check_database(config: &AppConfig) -> DoctorCheck {
    let result = async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| format!("failed to connect to database: {error}"))?;
        let ping = connection::ping(&pool)
            .await
            .map_err(|error| format!("database query failed: {error}"));
        pool.close().await;
        ping
    }
    .await;

    match result {
        Ok(()) => DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Pass,
            details: format!("connected using `{}`", config.database.url),
        },
        Err(details) => {
            DoctorCheck { name: "database_connectivity", status: CheckStatus::Fail, details }
        }
    }
}

async fn check_vector_store(config: &AppConfig) -> DoctorCheck {
    let name = "vector_store_reachability";
    if config.vector_store.provider == VectorStoreProvider::Memory {
        return DoctorCheck {
            name,
            status: CheckStatus::Pass,
            details: "in-process vector store (contents are not persisted)".to_string(),
        };
    }

    let result = match QdrantStore::from_config(&config.vector_store) {
        Ok(store) => store.ping().await,
        Err(error) => Err(error),
    };
    match result {
        Ok(()) => DoctorCheck {
            name,
            status: CheckStatus::Pass,
            details: format!("qdrant reachable at `{}`", config.vector_store.url),
        },
        Err(error) => DoctorCheck { name, status: CheckStatus::Fail, details: error.to_string() },
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = vec![report.summary.clone()];

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}
