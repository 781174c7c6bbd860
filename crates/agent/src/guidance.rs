use std::sync::Arc;

use tracing::warn;

use carbonex_core::domain::workflow::{WorkflowKind, WorkflowStep};
use carbonex_core::errors::DomainError;
use carbonex_core::workflows;

use crate::llm::LlmClient;
use crate::retrieval::KnowledgeBase;

pub const NEXT_STEP_FOOTER: &str = "When you're ready to move to the next step, let me know by \
saying 'ready for next step' or 'complete this step'.";

const DOCUMENT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant providing guidance on obtaining government documents.";
const DOCUMENT_QUERY_LIMIT: usize = 3;
const DOCUMENT_CONTEXT_CHUNKS: usize = 2;

/// Renders one workflow step, enriched with retrieved advice on obtaining
/// its documents when that advice is available.
#[derive(Clone)]
pub struct StepGuide {
    knowledge: KnowledgeBase,
    llm: Arc<dyn LlmClient>,
}

impl StepGuide {
    pub fn new(knowledge: KnowledgeBase, llm: Arc<dyn LlmClient>) -> Self {
        Self { knowledge, llm }
    }

    pub async fn guidance_for(
        &self,
        workflow: WorkflowKind,
        step_number: u32,
    ) -> Result<String, DomainError> {
        let step = workflows::step(workflow, step_number).ok_or_else(|| {
            DomainError::InvariantViolation(format!(
                "{workflow} has no step {step_number}"
            ))
        })?;

        let mut guidance = static_guidance(step);
        if !step.required_documents.is_empty() {
            if let Some(advice) = self.document_advice(step).await {
                guidance.push_str(&format!("**How to Obtain Documents:**\n\n{advice}\n\n"));
            }
        }
        guidance.push_str(NEXT_STEP_FOOTER);
        Ok(guidance)
    }

    async fn document_advice(&self, step: &WorkflowStep) -> Option<String> {
        let documents = step.required_documents.join(", ");
        let query = format!("How to obtain {documents} for {}", step.title);

        let chunks = match self.knowledge.search(&query, DOCUMENT_QUERY_LIMIT).await {
            Ok(chunks) if chunks.is_empty() => return None,
            Ok(chunks) => chunks,
            Err(error) => {
                warn!(
                    event_name = "agent.guidance.retrieval_failed",
                    step = step.number,
                    error = %error,
                    "document retrieval failed; using static guidance"
                );
                return None;
            }
        };

        let context = chunks
            .iter()
            .take(DOCUMENT_CONTEXT_CHUNKS)
            .map(|chunk| format!("[{}]\n{}", chunk.section, chunk.text))
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = format!(
            "Based on the following context documents, provide a brief explanation of how to \
             obtain the required documents for {title}.\n\n\
             Required Documents: {documents}\n\n\
             Context:\n{context}\n\n\
             Provide a concise answer (2-3 sentences) on how to obtain these documents.",
            title = step.title
        );

        match self.llm.complete(&prompt, Some(DOCUMENT_SYSTEM_PROMPT)).await {
            Ok(advice) => Some(advice),
            Err(error) => {
                warn!(
                    event_name = "agent.guidance.completion_failed",
                    step = step.number,
                    error = %error,
                    "document advice failed; using static guidance"
                );
                None
            }
        }
    }
}

/// Title, description and document checklist of a step.
pub fn static_guidance(step: &WorkflowStep) -> String {
    let mut guidance =
        format!("## Step {}: {}\n\n{}\n\n", step.number, step.title, step.description);
    if !step.required_documents.is_empty() {
        guidance.push_str("**Required Documents:**\n\n");
        for document in step.required_documents {
            guidance.push_str(&format!("- {document}\n"));
        }
        guidance.push('\n');
    }
    guidance
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use carbonex_core::domain::workflow::WorkflowKind;
    use carbonex_core::workflows;

    use super::{static_guidance, StepGuide, NEXT_STEP_FOOTER};
    use crate::memory::{InMemoryVectorStore, ScriptedLlmClient};
    use crate::retrieval::{KnowledgeBase, VectorStore};

    async fn guide_with(
        sections: &[(&str, &str)],
    ) -> (Arc<ScriptedLlmClient>, StepGuide) {
        let llm = Arc::new(ScriptedLlmClient::new());
        let store = Arc::new(InMemoryVectorStore::default());
        store.ensure_collection("formalities_kb", 256).await.expect("collection");
        for (section, text) in sections {
            store.insert_text(llm.as_ref(), "formalities_kb", section, text).await.expect("insert");
        }
        let knowledge = KnowledgeBase::new(llm.clone(), store, "formalities_kb");
        (llm.clone(), StepGuide::new(knowledge, llm))
    }

    fn first_step_with_documents(workflow: WorkflowKind) -> u32 {
        workflows::steps_for(workflow)
            .iter()
            .find(|step| !step.required_documents.is_empty())
            .map(|step| step.number)
            .expect("a step with documents")
    }

    #[test]
    fn static_portion_lists_every_required_document() {
        let step = workflows::step(WorkflowKind::SellerRegistration, 1).expect("step");
        let text = static_guidance(step);

        assert!(text.starts_with(&format!("## Step 1: {}\n\n", step.title)));
        for document in step.required_documents {
            assert!(text.contains(&format!("- {document}\n")));
        }
    }

    #[tokio::test]
    async fn retrieved_advice_is_appended_before_the_footer() {
        let workflow = WorkflowKind::SellerRegistration;
        let number = first_step_with_documents(workflow);
        let step = workflows::step(workflow, number).expect("step");
        let (llm, guide) = guide_with(&[("Obtaining Documents", step.required_documents[0])]).await;
        llm.push_completion("Apply online through the issuing office.");

        let text = guide.guidance_for(workflow, number).await.expect("guidance");

        assert!(text.contains(
            "**How to Obtain Documents:**\n\nApply online through the issuing office.\n\n"
        ));
        assert!(text.ends_with(NEXT_STEP_FOOTER));
        assert_eq!(llm.completion_calls(), 1);
        assert!(llm.prompts()[0]
            .prompt
            .contains(&format!("[Obtaining Documents]\n{}", step.required_documents[0])));
    }

    #[tokio::test]
    async fn collaborator_failures_degrade_to_static_guidance() {
        let workflow = WorkflowKind::BuyerRegistration;
        let number = first_step_with_documents(workflow);
        let step = workflows::step(workflow, number).expect("step");
        let expected = format!("{}{NEXT_STEP_FOOTER}", static_guidance(step));

        let (llm, guide) = guide_with(&[("Documents", step.required_documents[0])]).await;
        llm.push_completion_error("model unavailable");
        assert_eq!(guide.guidance_for(workflow, number).await.expect("guidance"), expected);

        let (llm, guide) = guide_with(&[]).await;
        llm.fail_embeddings("embedding service down");
        assert_eq!(guide.guidance_for(workflow, number).await.expect("guidance"), expected);
        assert_eq!(llm.completion_calls(), 0);
    }

    #[tokio::test]
    async fn empty_retrieval_skips_the_completion_call() {
        let (llm, guide) = guide_with(&[]).await;
        let number = first_step_with_documents(WorkflowKind::MrvCompliance);

        let text = guide.guidance_for(WorkflowKind::MrvCompliance, number).await.expect("guidance");
        assert!(!text.contains("How to Obtain Documents"));
        assert_eq!(llm.completion_calls(), 0);
    }

    #[tokio::test]
    async fn unknown_step_is_an_invariant_violation() {
        let (_, guide) = guide_with(&[]).await;
        assert!(guide.guidance_for(WorkflowKind::BuyerRegistration, 99).await.is_err());
    }
}
