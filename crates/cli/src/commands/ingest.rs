use std::path::Path;

use carbonex_agent::{AgentRuntime, KnowledgeDomain};

use crate::commands::{async_runtime, exit, load_config, CommandResult};

pub fn run(domain: KnowledgeDomain, dir: &Path) -> CommandResult {
    let config = match load_config("ingest") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match async_runtime("ingest") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };
    let agents = match AgentRuntime::from_config(&config) {
        Ok(agents) => agents,
        Err(error) => {
            return CommandResult::failure(
                "ingest",
                "collaborator_setup",
                error.to_string(),
                exit::COLLABORATOR,
            )
        }
    };

    runtime.block_on(ingest_with(&agents, domain, dir))
}

/// Indexes `dir` into the collection backing `domain`. Succeeds when at
/// least one document was indexed or there was nothing to index.
pub async fn ingest_with(
    agents: &AgentRuntime,
    domain: KnowledgeDomain,
    dir: &Path,
) -> CommandResult {
    let collection = agents.collection(domain).to_string();

    let report = match agents.ingestor().ingest_dir(dir, &collection).await {
        Ok(report) => report,
        Err(error) => {
            return CommandResult::failure("ingest", "ingestion", error.to_string(), exit::INGESTION)
        }
    };

    let summary = format!(
        "indexed {} documents ({} chunks) into `{collection}`, {} skipped",
        report.documents, report.chunks, report.skipped
    );
    if report.documents == 0 && report.skipped > 0 {
        return CommandResult::failure("ingest", "ingestion", summary, exit::INGESTION);
    }
    CommandResult::success("ingest", summary)
}
