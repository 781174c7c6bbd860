use std::sync::Arc;

use futures_util::StreamExt;
use tracing::{error, info, warn, Instrument};

use carbonex_core::domain::conversation::{FormalitiesState, Turn};
use carbonex_core::errors::ApplicationError;
use carbonex_core::flows::formalities::{self, FormalitiesAction};

use crate::guidance::StepGuide;
use crate::llm::LlmClient;
use crate::retrieval::KnowledgeBase;
use crate::stream::{
    collect_turn, failure_apology, ControlMessage, Delivery, TurnReply, TurnSink, TurnStream,
};

const RECENT_TURNS: usize = 5;

pub const ADVISOR_SYSTEM_PROMPT: &str = "You are a Formalities Advisor helping users navigate \
government procedures for carbon credit registration and compliance.
You guide users step-by-step through workflows (buyer registration, seller registration, MRV compliance).
You provide clear, helpful information about required documents and processes.
You maintain conversation context and guide users through each step of the process.
Keep answers concise but informative.";

/// Guides buyers and sellers through the registration and compliance
/// workflows, answering anything else from the formalities knowledge base.
#[derive(Clone)]
pub struct FormalitiesAgent {
    llm: Arc<dyn LlmClient>,
    knowledge: KnowledgeBase,
    guide: StepGuide,
    top_k: usize,
}

impl FormalitiesAgent {
    pub fn new(llm: Arc<dyn LlmClient>, knowledge: KnowledgeBase, top_k: usize) -> Self {
        let guide = StepGuide::new(knowledge.clone(), llm.clone());
        Self { llm, knowledge, guide, top_k }
    }

    pub async fn reply(
        &self,
        message: &str,
        state: FormalitiesState,
    ) -> TurnReply<FormalitiesState> {
        let (sink, events) = TurnSink::channel();
        let state = self.run_turn(message, state, sink, Delivery::Whole).await;
        let turn = collect_turn(events).await;
        let error = match turn.control {
            Some(ControlMessage::Error { message, .. }) => Some(message),
            _ => None,
        };
        TurnReply { answer: turn.text, conversation_state: state, error }
    }

    pub fn stream(&self, message: impl Into<String>, state: FormalitiesState) -> TurnStream {
        let (sink, events) = TurnSink::channel();
        let agent = self.clone();
        let message = message.into();
        tokio::spawn(
            async move {
                agent.run_turn(&message, state, sink, Delivery::Incremental).await;
            }
            .in_current_span(),
        );
        events
    }

    pub async fn run_turn(
        &self,
        message: &str,
        mut state: FormalitiesState,
        sink: TurnSink,
        delivery: Delivery,
    ) -> FormalitiesState {
        formalities::sanitize(&mut state);
        let prior = state.clone();

        match self.advance(message, &mut state, &sink, delivery).await {
            Ok(action) => {
                info!(
                    event_name = "agent.formalities.turn_completed",
                    action = ?action,
                    workflow = state.workflow.map(|workflow| workflow.as_str()).unwrap_or("none"),
                    step = state.current_step,
                    "formalities turn completed"
                );
                sink.finish(ControlMessage::state(&state));
                state
            }
            Err(failure) => {
                error!(
                    event_name = "agent.formalities.turn_failed",
                    error = %failure,
                    "formalities turn failed"
                );
                sink.text(failure_apology(&failure));
                sink.finish(ControlMessage::error(failure.to_string(), &prior));
                prior
            }
        }
    }

    async fn advance(
        &self,
        message: &str,
        state: &mut FormalitiesState,
        sink: &TurnSink,
        delivery: Delivery,
    ) -> Result<FormalitiesAction, ApplicationError> {
        let outcome = formalities::apply_message(state, message);
        let action = formalities::next_action(state, &outcome);

        let reply = match action {
            FormalitiesAction::GuideStep { workflow, step } => {
                // Guidance carries markdown structure, so it goes out whole.
                let guidance = self.guide.guidance_for(workflow, step).await?;
                sink.text(guidance.clone());
                guidance
            }
            FormalitiesAction::Freeform => {
                self.answer_freely(message, state, sink, delivery).await?
            }
            _ => {
                let text = formalities::render_action(&action).unwrap_or_default();
                sink.text(text.clone());
                text
            }
        };

        state.history.push(Turn::assistant(reply));
        Ok(action)
    }

    async fn answer_freely(
        &self,
        question: &str,
        state: &FormalitiesState,
        sink: &TurnSink,
        delivery: Delivery,
    ) -> Result<String, ApplicationError> {
        let context = match self.knowledge.search(question, self.top_k).await {
            Ok(chunks) => chunks
                .iter()
                .map(|chunk| format!("[Section: {}]\n{}", chunk.section, chunk.text))
                .collect::<Vec<_>>()
                .join("\n\n"),
            Err(failure) => {
                warn!(
                    event_name = "agent.formalities.retrieval_failed",
                    error = %failure,
                    "answering without retrieved context"
                );
                String::new()
            }
        };
        let prompt = advisor_prompt(question, &context, state);

        if delivery == Delivery::Whole {
            let answer = self.llm.complete(&prompt, Some(ADVISOR_SYSTEM_PROMPT)).await?;
            sink.text(answer.clone());
            return Ok(answer);
        }

        let mut fragments = self.llm.complete_stream(&prompt, Some(ADVISOR_SYSTEM_PROMPT)).await?;
        let mut answer = String::new();
        while let Some(fragment) = fragments.next().await {
            let fragment = fragment?;
            sink.text(fragment.clone());
            answer.push_str(&fragment);
        }
        Ok(answer)
    }
}

fn advisor_prompt(question: &str, context: &str, state: &FormalitiesState) -> String {
    let conversation = state
        .recent_history(RECENT_TURNS)
        .iter()
        .map(|turn| format!("{}: {}", turn.role.as_str(), turn.content))
        .collect::<Vec<_>>()
        .join("\n");

    let context_section =
        if context.is_empty() { String::new() } else { format!("Context Documents:\n{context}\n") };
    let conversation_section = if conversation.is_empty() {
        String::new()
    } else {
        format!("Recent Conversation:\n{conversation}\n")
    };

    let mut user_context = String::new();
    if let Some(role) = state.role {
        user_context.push_str(&format!("\n\nUser is a {}.", role.as_str()));
    }
    if let Some(workflow) = state.workflow {
        user_context.push_str(&format!(" Current workflow: {}.", workflow.as_str()));
    }
    if let Some(step) = state.current_step {
        user_context.push_str(&format!(" Current step: {step}."));
    }

    format!(
        "Based on the following context documents and conversation history, answer the user's \
         question about formalities.\n\n\
         {context_section}\n\
         {conversation_section}\n\
         User Question: {question}\n\
         {user_context}\n\n\
         Provide a clear, helpful answer. If the user needs guidance on a specific step, provide \
         step-by-step instructions."
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures_util::StreamExt;

    use carbonex_core::domain::conversation::FormalitiesState;
    use carbonex_core::domain::workflow::{UserRole, WorkflowKind};
    use carbonex_core::flows::formalities::{CONGRATULATIONS, ROLE_QUESTION};

    use super::FormalitiesAgent;
    use crate::guidance::NEXT_STEP_FOOTER;
    use crate::memory::{InMemoryVectorStore, ScriptedLlmClient};
    use crate::retrieval::{KnowledgeBase, VectorStore};
    use crate::stream::{ControlMessage, TurnEvent};

    async fn agent_with(sections: &[(&str, &str)]) -> (Arc<ScriptedLlmClient>, FormalitiesAgent) {
        let llm = Arc::new(ScriptedLlmClient::new());
        let store = Arc::new(InMemoryVectorStore::default());
        store.ensure_collection("formalities_kb", 256).await.expect("collection");
        for (section, text) in sections {
            store.insert_text(llm.as_ref(), "formalities_kb", section, text).await.expect("insert");
        }
        let knowledge = KnowledgeBase::new(llm.clone(), store, "formalities_kb");
        (llm.clone(), FormalitiesAgent::new(llm, knowledge, 5))
    }

    fn finished(workflow: WorkflowKind) -> FormalitiesState {
        FormalitiesState {
            role: Some(UserRole::Buyer),
            workflow: Some(workflow),
            current_step: None,
            completed_steps: (1..=5).collect(),
            history: Vec::new(),
        }
    }

    #[tokio::test]
    async fn clarifying_questions_come_before_guidance() {
        let (llm, agent) = agent_with(&[]).await;

        let reply = agent.reply("hello", FormalitiesState::default()).await;
        assert_eq!(reply.answer, ROLE_QUESTION);

        let reply = agent.reply("I'm a seller", reply.conversation_state).await;
        assert!(reply.answer.contains("seller registration"));
        assert_eq!(llm.completion_calls(), 0);
    }

    #[tokio::test]
    async fn registration_renders_step_one_guidance() {
        let (_, agent) = agent_with(&[]).await;
        let state = FormalitiesState { role: Some(UserRole::Seller), ..Default::default() };

        let reply = agent.reply("registration", state).await;

        assert_eq!(reply.conversation_state.workflow, Some(WorkflowKind::SellerRegistration));
        assert_eq!(reply.conversation_state.current_step, Some(1));
        assert!(reply.answer.starts_with("## Step 1: "));
        assert!(reply.answer.ends_with(NEXT_STEP_FOOTER));
        assert_eq!(reply.conversation_state.history.len(), 2);
    }

    #[tokio::test]
    async fn finishing_the_last_step_congratulates() {
        let (_, agent) = agent_with(&[]).await;
        let mut state = finished(WorkflowKind::BuyerRegistration);
        state.completed_steps.remove(&5);
        state.current_step = Some(5);

        let reply = agent.reply("this step is done", state).await;

        assert_eq!(reply.answer, CONGRATULATIONS);
        assert_eq!(reply.conversation_state.current_step, None);
    }

    #[tokio::test]
    async fn finished_workflow_answers_from_the_knowledge_base() {
        let (llm, agent) =
            agent_with(&[("Audits", "annual audits are done by accredited verifiers")]).await;
        llm.push_completion("Audits happen once a year.");

        let reply = agent
            .reply("how do annual audits work?", finished(WorkflowKind::BuyerRegistration))
            .await;

        assert_eq!(reply.answer, "Audits happen once a year.");
        let prompt = &llm.prompts()[0];
        assert!(prompt.prompt.contains("[Section: Audits]\nannual audits"));
        assert!(prompt.prompt.contains("user: how do annual audits work?"));
        assert!(prompt.prompt.contains("User is a buyer. Current workflow: buyer_registration."));
        assert!(prompt
            .system
            .as_deref()
            .is_some_and(|system| system.starts_with("You are a Formalities Advisor")));
    }

    #[tokio::test]
    async fn completion_failure_returns_the_prior_state() {
        let (llm, agent) = agent_with(&[]).await;
        llm.push_completion_error("model unavailable");
        let state = finished(WorkflowKind::BuyerRegistration);

        let reply = agent.reply("what next?", state.clone()).await;

        assert!(reply.answer.starts_with("I encountered an error"));
        assert!(reply.error.is_some());
        assert_eq!(reply.conversation_state, state);
    }

    #[tokio::test]
    async fn mid_stream_failure_ends_with_an_error_event() {
        let (llm, agent) = agent_with(&[]).await;
        llm.push_failing_stream(&["Partial "], "connection reset");

        let events: Vec<_> =
            agent.stream("what next?", finished(WorkflowKind::BuyerRegistration)).collect().await;

        assert_eq!(events.first(), Some(&TurnEvent::Text("Partial ".into())));
        let Some(TurnEvent::Control(ControlMessage::Error { message, conversation_state })) =
            events.last()
        else {
            panic!("expected a terminal error event, got {:?}", events.last());
        };
        assert!(message.contains("connection reset"));
        assert!(conversation_state
            .as_ref()
            .is_some_and(|state| state["history"].as_array().is_some_and(Vec::is_empty)));
        assert_eq!(
            events.iter().filter(|event| matches!(event, TurnEvent::Control(_))).count(),
            1
        );
    }
}
