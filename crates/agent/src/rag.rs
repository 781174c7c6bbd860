use std::sync::Arc;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::warn;

use carbonex_core::errors::CollaboratorError;

use crate::llm::LlmClient;
use crate::retrieval::{KnowledgeBase, RetrievedChunk};
use crate::stream::{ControlMessage, TurnSink};

pub const NO_RESULTS_MESSAGE: &str = "I couldn't find relevant information about that in the \
knowledge base. Could you rephrase your question or ask about another carbon credit topic?";

pub const FAILURE_MESSAGE: &str =
    "I'm sorry, I ran into a problem while answering your question. Please try again.";

pub const EDUCATION_SYSTEM_PROMPT: &str = "You are a carbon credit expert helping users of a \
carbon credit marketplace understand carbon markets, emission scopes, credit standards and \
trading.
Answer only from the provided context documents.
Cite the sections you relied on by name in square brackets, for example [Carbon Credit Basics].
If the context does not answer the question, say so instead of guessing.";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RagAnswer {
    pub answer: String,
    pub sources: Vec<String>,
}

impl RagAnswer {
    fn apology(message: &str) -> Self {
        Self { answer: message.to_string(), sources: Vec::new() }
    }
}

/// Question answering grounded in one knowledge base. Never fails: every
/// collaborator error becomes an apology with no sources.
#[derive(Clone)]
pub struct RetrievalResponder {
    knowledge: KnowledgeBase,
    llm: Arc<dyn LlmClient>,
    top_k: usize,
    system_prompt: String,
}

impl RetrievalResponder {
    pub fn new(knowledge: KnowledgeBase, llm: Arc<dyn LlmClient>, top_k: usize) -> Self {
        Self { knowledge, llm, top_k, system_prompt: EDUCATION_SYSTEM_PROMPT.to_string() }
    }

    pub async fn answer(&self, question: &str) -> RagAnswer {
        let chunks = match self.retrieve(question).await {
            Ok(chunks) if chunks.is_empty() => return RagAnswer::apology(NO_RESULTS_MESSAGE),
            Ok(chunks) => chunks,
            Err(_) => return RagAnswer::apology(FAILURE_MESSAGE),
        };

        let prompt = user_prompt(question, &chunks);
        match self.llm.complete(&prompt, Some(&self.system_prompt)).await {
            Ok(answer) => RagAnswer { answer, sources: distinct_sections(&chunks) },
            Err(error) => {
                warn!(
                    event_name = "agent.rag.completion_failed",
                    collection = self.knowledge.collection(),
                    error = %error,
                    "answer generation failed"
                );
                RagAnswer::apology(FAILURE_MESSAGE)
            }
        }
    }

    /// Streaming variant: answer fragments, then a sources control message.
    pub async fn answer_into(&self, question: &str, sink: TurnSink) {
        let chunks = match self.retrieve(question).await {
            Ok(chunks) if chunks.is_empty() => {
                sink.text(NO_RESULTS_MESSAGE);
                sink.finish(ControlMessage::Sources { sources: Vec::new() });
                return;
            }
            Ok(chunks) => chunks,
            Err(_) => {
                sink.text(FAILURE_MESSAGE);
                sink.finish(ControlMessage::Sources { sources: Vec::new() });
                return;
            }
        };

        let prompt = user_prompt(question, &chunks);
        match self.stream_completion(&prompt, &sink).await {
            Ok(()) => sink.finish(ControlMessage::Sources { sources: distinct_sections(&chunks) }),
            Err((error, streamed_any)) => {
                warn!(
                    event_name = "agent.rag.completion_failed",
                    collection = self.knowledge.collection(),
                    error = %error,
                    streamed_any,
                    "answer stream failed"
                );
                let separator = if streamed_any { "\n\n" } else { "" };
                sink.text(format!("{separator}{FAILURE_MESSAGE}"));
                sink.finish(ControlMessage::Sources { sources: Vec::new() });
            }
        }
    }

    async fn retrieve(&self, question: &str) -> Result<Vec<RetrievedChunk>, CollaboratorError> {
        self.knowledge.search(question, self.top_k).await.map_err(|error| {
            warn!(
                event_name = "agent.rag.retrieval_failed",
                collection = self.knowledge.collection(),
                error = %error,
                "retrieval failed"
            );
            error
        })
    }

    async fn stream_completion(
        &self,
        prompt: &str,
        sink: &TurnSink,
    ) -> Result<(), (CollaboratorError, bool)> {
        let mut fragments = self
            .llm
            .complete_stream(prompt, Some(&self.system_prompt))
            .await
            .map_err(|error| (error, false))?;
        let mut streamed_any = false;
        while let Some(fragment) = fragments.next().await {
            let fragment = fragment.map_err(|error| (error, streamed_any))?;
            streamed_any |= !fragment.is_empty();
            sink.text(fragment);
        }
        Ok(())
    }
}

fn user_prompt(question: &str, chunks: &[RetrievedChunk]) -> String {
    let context = chunks
        .iter()
        .map(|chunk| format!("[{}]\n{}", chunk.section, chunk.text))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "Context documents:\n\n{context}\n\nQuestion: {question}\n\n\
         Answer the question using the context above and cite the sections you used."
    )
}

/// Section names in retrieval order, each listed once.
pub fn distinct_sections(chunks: &[RetrievedChunk]) -> Vec<String> {
    let mut sections: Vec<String> = Vec::new();
    for chunk in chunks {
        if !sections.contains(&chunk.section) {
            sections.push(chunk.section.clone());
        }
    }
    sections
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{RetrievalResponder, FAILURE_MESSAGE, NO_RESULTS_MESSAGE};
    use crate::memory::{InMemoryVectorStore, ScriptedLlmClient};
    use crate::retrieval::{KnowledgeBase, VectorStore};
    use crate::stream::{collect_turn, ControlMessage, TurnSink};

    async fn responder_with(
        sections: &[(&str, &str)],
    ) -> (Arc<ScriptedLlmClient>, RetrievalResponder) {
        let llm = Arc::new(ScriptedLlmClient::new());
        let store = Arc::new(InMemoryVectorStore::default());
        store.ensure_collection("carbon_credits_kb", 256).await.expect("collection");
        for (section, text) in sections {
            store
                .insert_text(llm.as_ref(), "carbon_credits_kb", section, text)
                .await
                .expect("insert");
        }
        let knowledge = KnowledgeBase::new(llm.clone(), store, "carbon_credits_kb");
        (llm.clone(), RetrievalResponder::new(knowledge, llm, 5))
    }

    #[tokio::test]
    async fn empty_retrieval_apologises_without_calling_the_model() {
        let (llm, responder) = responder_with(&[]).await;

        let answer = responder.answer("what is a vintage?").await;

        assert_eq!(answer.answer, NO_RESULTS_MESSAGE);
        assert!(answer.sources.is_empty());
        assert_eq!(llm.completion_calls(), 0);
        assert_eq!(llm.stream_calls(), 0);
    }

    #[tokio::test]
    async fn answer_cites_distinct_sections_and_grounds_the_prompt() {
        let (llm, responder) = responder_with(&[
            ("Vintage", "The vintage is the year the emission reduction happened."),
            ("Vintage", "Older vintage credits usually trade at lower prices."),
            ("Registries", "Credits are issued and retired on registries."),
        ])
        .await;
        llm.push_completion("A vintage is the reduction year [Vintage].");

        let answer = responder.answer("what does vintage mean for credits").await;

        assert_eq!(answer.answer, "A vintage is the reduction year [Vintage].");
        assert_eq!(answer.sources.first().map(String::as_str), Some("Vintage"));
        assert_eq!(
            answer.sources.iter().filter(|section| section.as_str() == "Vintage").count(),
            1
        );
        let prompt = &llm.prompts()[0];
        assert!(prompt.prompt.contains("[Vintage]\nThe vintage is the year"));
        assert!(prompt.system.as_deref().is_some_and(|system| system.contains("carbon credit")));
    }

    #[tokio::test]
    async fn completion_failure_becomes_an_apology() {
        let (llm, responder) = responder_with(&[("Vintage", "vintage year of reduction")]).await;
        llm.push_completion_error("rate limited");

        let answer = responder.answer("vintage").await;
        assert_eq!(answer.answer, FAILURE_MESSAGE);
        assert!(answer.sources.is_empty());
    }

    #[tokio::test]
    async fn embedding_failure_becomes_an_apology() {
        let (llm, responder) = responder_with(&[("Vintage", "vintage year of reduction")]).await;
        llm.fail_embeddings("embedding service down");

        let answer = responder.answer("vintage").await;
        assert_eq!(answer.answer, FAILURE_MESSAGE);
        assert_eq!(llm.completion_calls(), 0);
    }

    #[tokio::test]
    async fn stream_ends_with_sources() {
        let (llm, responder) = responder_with(&[("Vintage", "vintage year of reduction")]).await;
        llm.push_stream(&["A vintage ", "is a year."]);

        let (sink, events) = TurnSink::channel();
        responder.answer_into("vintage", sink).await;
        let turn = collect_turn(events).await;

        assert_eq!(turn.text, "A vintage is a year.");
        assert_eq!(turn.control, Some(ControlMessage::Sources { sources: vec!["Vintage".into()] }));
    }

    #[tokio::test]
    async fn mid_stream_failure_appends_apology_and_empty_sources() {
        let (llm, responder) = responder_with(&[("Vintage", "vintage year of reduction")]).await;
        llm.push_failing_stream(&["A vintage "], "connection reset");

        let (sink, events) = TurnSink::channel();
        responder.answer_into("vintage", sink).await;
        let turn = collect_turn(events).await;

        assert_eq!(turn.text, format!("A vintage \n\n{FAILURE_MESSAGE}"));
        assert_eq!(turn.control, Some(ControlMessage::Sources { sources: Vec::new() }));
    }
}
