use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::{error, info, warn, Instrument};

use carbonex_core::domain::calculation::CalculationResult;
use carbonex_core::domain::conversation::{CalculatorState, Turn};
use carbonex_core::domain::question::AnswerValue;
use carbonex_core::domain::sector::Sector;
use carbonex_core::errors::{ApplicationError, DomainError};
use carbonex_core::flows::calculator::{self, CalculatorAction};
use carbonex_core::questionnaire::questions_for;

use crate::extraction::AnswerExtractor;
use crate::llm::LlmClient;
use crate::stream::{
    collect_turn, failure_apology, ControlMessage, Delivery, TurnReply, TurnSink, TurnStream,
};

const EXPLANATION_SYSTEM_PROMPT: &str = "You are a carbon accounting assistant for a carbon \
credit marketplace. You explain emission calculations to company representatives in plain \
language. Never change or recompute the numbers you are given.";

/// Notified once per conversation, on the turn that completes the
/// questionnaire.
#[async_trait]
pub trait CalculationObserver: Send + Sync {
    async fn calculation_completed(
        &self,
        sector: Sector,
        answers: &BTreeMap<String, AnswerValue>,
        result: &CalculationResult,
    );
}

#[derive(Clone)]
pub struct CalculatorAgent {
    llm: Arc<dyn LlmClient>,
    extractor: AnswerExtractor,
    observer: Option<Arc<dyn CalculationObserver>>,
}

impl CalculatorAgent {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { extractor: AnswerExtractor::new(llm.clone()), llm, observer: None }
    }

    pub fn with_observer(mut self, observer: Arc<dyn CalculationObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub async fn reply(&self, message: &str, state: CalculatorState) -> TurnReply<CalculatorState> {
        let (sink, events) = TurnSink::channel();
        let state = self.run_turn(message, state, sink, Delivery::Whole).await;
        let turn = collect_turn(events).await;
        let error = match turn.control {
            Some(ControlMessage::Error { message, .. }) => Some(message),
            _ => None,
        };
        TurnReply { answer: turn.text, conversation_state: state, error }
    }

    /// Runs the turn on a background task and returns its event stream.
    pub fn stream(&self, message: impl Into<String>, state: CalculatorState) -> TurnStream {
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

    /// Drives one turn into `sink` and returns the state the client should
    /// hold next. On failure that is the state the turn started from.
    pub async fn run_turn(
        &self,
        message: &str,
        mut state: CalculatorState,
        sink: TurnSink,
        delivery: Delivery,
    ) -> CalculatorState {
        calculator::sanitize(&mut state);
        let prior = state.clone();

        match self.advance(message, &mut state, &sink, delivery).await {
            Ok(()) => {
                info!(
                    event_name = "agent.calculator.turn_completed",
                    sector = state.sector.as_deref().unwrap_or("none"),
                    answered = state.answers.len(),
                    complete = state.is_complete(),
                    "calculator turn completed"
                );
                sink.finish(ControlMessage::state(&state));
                state
            }
            Err(failure) => {
                error!(
                    event_name = "agent.calculator.turn_failed",
                    error = %failure,
                    "calculator turn failed"
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
        state: &mut CalculatorState,
        sink: &TurnSink,
        delivery: Delivery,
    ) -> Result<(), ApplicationError> {
        let start = calculator::begin_turn(state, message);

        if let Some(question) = start.pending {
            // The message that names the sector is rarely an answer to the
            // first question, so only a literal match counts there.
            let outcome =
                self.extractor.extract_with(question, message, !start.sector_selected).await;
            if let Some(value) = outcome.value() {
                calculator::record_answer(state, value);
            }
        }

        let reply = match calculator::next_action(state) {
            CalculatorAction::Finalize { sector } => {
                self.complete(state, sector, sink, delivery).await
            }
            action => {
                let text = calculator::render_action(&action).ok_or_else(|| {
                    DomainError::InvariantViolation(format!("no prompt for {action:?}"))
                })?;
                sink.text(text.clone());
                text
            }
        };

        state.history.push(Turn::assistant(reply));
        Ok(())
    }

    async fn complete(
        &self,
        state: &mut CalculatorState,
        sector: Sector,
        sink: &TurnSink,
        delivery: Delivery,
    ) -> String {
        let (result, newly_completed) = calculator::finalize(state, sector);
        if newly_completed {
            if let Some(observer) = &self.observer {
                observer.calculation_completed(sector, &state.answers, &result).await;
            }
        }
        self.explain(sector, &state.answers, &result, sink, delivery).await
    }

    /// Emits an explanation of `result` and returns the text sent. Falls
    /// back to the templated summary when the model is unavailable.
    async fn explain(
        &self,
        sector: Sector,
        answers: &BTreeMap<String, AnswerValue>,
        result: &CalculationResult,
        sink: &TurnSink,
        delivery: Delivery,
    ) -> String {
        let prompt = explanation_prompt(sector, answers, result);

        if delivery == Delivery::Whole {
            let text = match self.llm.complete(&prompt, Some(EXPLANATION_SYSTEM_PROMPT)).await {
                Ok(text) => text,
                Err(error) => {
                    warn!(
                        event_name = "agent.calculator.explanation_failed",
                        error = %error,
                        "explanation unavailable; sending summary"
                    );
                    result.summary()
                }
            };
            sink.text(text.clone());
            return text;
        }

        let mut fragments =
            match self.llm.complete_stream(&prompt, Some(EXPLANATION_SYSTEM_PROMPT)).await {
                Ok(fragments) => fragments,
                Err(error) => {
                    warn!(
                        event_name = "agent.calculator.explanation_failed",
                        error = %error,
                        "explanation unavailable; sending summary"
                    );
                    let summary = result.summary();
                    sink.text(summary.clone());
                    return summary;
                }
            };

        let mut sent = String::new();
        while let Some(fragment) = fragments.next().await {
            match fragment {
                Ok(fragment) => {
                    sink.text(fragment.clone());
                    sent.push_str(&fragment);
                }
                Err(error) => {
                    warn!(
                        event_name = "agent.calculator.explanation_failed",
                        error = %error,
                        streamed = sent.len(),
                        "explanation stream broke; appending summary"
                    );
                    let tail = if sent.is_empty() {
                        result.summary()
                    } else {
                        format!("\n\n{}", result.summary())
                    };
                    sink.text(tail.clone());
                    sent.push_str(&tail);
                    break;
                }
            }
        }
        if sent.is_empty() {
            sent = result.summary();
            sink.text(sent.clone());
        }
        sent
    }
}

fn explanation_prompt(
    sector: Sector,
    answers: &BTreeMap<String, AnswerValue>,
    result: &CalculationResult,
) -> String {
    let reported = questions_for(sector)
        .iter()
        .filter_map(|question| {
            let answer = answers.get(question.id)?;
            let unit = question.unit.map(|unit| format!(" {unit}")).unwrap_or_default();
            Some(format!("- {}: {answer}{unit}", question.prompt))
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "A company in the {sector} sector reported:\n{reported}\n\n{summary}\n\n\
         Explain these results in a short, friendly paragraph: which sources drive the \
         emissions, what each scope means, and what offsetting with {credits} carbon credits \
         would cost. Quote every number exactly as given.",
        sector = sector.display_name(),
        summary = result.summary(),
        credits = result.credits_needed,
    )
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use futures_util::StreamExt;

    use carbonex_core::domain::calculation::CalculationResult;
    use carbonex_core::domain::conversation::{CalculatorPhase, CalculatorState, Speaker};
    use carbonex_core::domain::question::AnswerValue;
    use carbonex_core::domain::sector::Sector;
    use carbonex_core::flows::calculator::SECTOR_INTRO;
    use carbonex_core::questionnaire::questions_for;

    use super::{CalculationObserver, CalculatorAgent};
    use crate::memory::ScriptedLlmClient;
    use crate::stream::{ControlMessage, TurnEvent};

    #[derive(Default)]
    struct RecordingObserver {
        seen: Mutex<Vec<(Sector, f64)>>,
    }

    #[async_trait]
    impl CalculationObserver for RecordingObserver {
        async fn calculation_completed(
            &self,
            sector: Sector,
            _answers: &BTreeMap<String, AnswerValue>,
            result: &CalculationResult,
        ) {
            self.seen.lock().expect("observer lock").push((sector, result.total_emissions));
        }
    }

    fn agent() -> (Arc<ScriptedLlmClient>, CalculatorAgent) {
        let llm = Arc::new(ScriptedLlmClient::new());
        (llm.clone(), CalculatorAgent::new(llm))
    }

    #[tokio::test]
    async fn first_turn_introduces_the_calculator() {
        let (llm, agent) = agent();
        let reply = agent.reply("hi", CalculatorState::default()).await;

        assert_eq!(reply.answer, SECTOR_INTRO);
        assert!(reply.error.is_none());
        assert_eq!(reply.conversation_state.history.len(), 2);
        assert_eq!(reply.conversation_state.history[1].role, Speaker::Assistant);
        assert_eq!(llm.completion_calls(), 0);
    }

    #[tokio::test]
    async fn naming_the_sector_asks_the_first_question_without_the_model() {
        let (llm, agent) = agent();
        let reply = agent.reply("cement", CalculatorState::default()).await;
        let first = &questions_for(Sector::Cement)[0];

        assert_eq!(reply.conversation_state.sector.as_deref(), Some("cement"));
        assert_eq!(reply.conversation_state.cursor, 0);
        assert!(reply.answer.contains(first.prompt));
        assert_eq!(llm.completion_calls(), 0);
    }

    #[tokio::test]
    async fn unanswerable_message_keeps_the_cursor() {
        let (llm, agent) = agent();
        llm.push_completion("null");
        let state = agent.reply("cement", CalculatorState::default()).await.conversation_state;

        let reply = agent.reply("no idea honestly", state).await;

        assert_eq!(reply.conversation_state.cursor, 0);
        assert!(reply.conversation_state.answers.is_empty());
        assert!(reply.answer.starts_with("Question 1 of 4"));
    }

    #[tokio::test]
    async fn answering_every_question_completes_and_notifies_once() {
        let llm = Arc::new(ScriptedLlmClient::new());
        let observer = Arc::new(RecordingObserver::default());
        let agent = CalculatorAgent::new(llm.clone()).with_observer(observer.clone());
        llm.push_completion("Your emissions are mostly from clinker.");

        let mut state =
            agent.reply("we make cement", CalculatorState::default()).await.conversation_state;
        for answer in ["1000 tonnes", "200", "500 MWh"] {
            state = agent.reply(answer, state).await.conversation_state;
            assert_eq!(state.phase, CalculatorPhase::Asking);
        }
        let reply = agent.reply("50 kL", state).await;

        assert_eq!(reply.answer, "Your emissions are mostly from clinker.");
        assert_eq!(reply.conversation_state.phase, CalculatorPhase::Complete);
        let result = reply.conversation_state.result.clone().expect("result");
        assert_eq!(
            observer.seen.lock().expect("lock").as_slice(),
            &[(Sector::Cement, result.total_emissions)]
        );

        let again = agent.reply("thanks", reply.conversation_state).await;
        assert_eq!(again.answer, result.summary());
        assert_eq!(observer.seen.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn explanation_failure_falls_back_to_summary() {
        let (llm, agent) = agent();
        llm.push_completion_error("model overloaded");
        let mut state = CalculatorState { sector: Some("iron_steel".into()), ..Default::default() };
        state.answers.insert("production_method".into(), AnswerValue::Text("Both".into()));
        state.answers.insert("steel_production".into(), AnswerValue::Number(100.0));

        let reply = agent.reply("1200 MWh", state).await;

        let result = reply.conversation_state.result.clone().expect("result");
        assert_eq!(reply.answer, result.summary());
        assert!(reply.error.is_none());
    }

    #[tokio::test]
    async fn stream_sends_fragments_then_exactly_one_state_event() {
        let (llm, agent) = agent();
        llm.push_failing_stream(&["Mostly ", "clinker."], "connection reset");
        let mut state = CalculatorState { sector: Some("textiles".into()), ..Default::default() };
        for question in &questions_for(Sector::Textiles)[..3] {
            state.answers.insert(question.id.into(), AnswerValue::Number(10.0));
        }

        let events: Vec<_> = agent.stream("40", state).collect().await;

        let (last, fragments) = events.split_last().expect("events");
        let TurnEvent::Control(ControlMessage::State { conversation_state }) = last else {
            panic!("expected a terminal state event, got {last:?}");
        };
        assert_eq!(conversation_state["phase"], "complete");
        assert!(fragments.iter().all(|event| matches!(event, TurnEvent::Text(_))));
        let text: String = fragments
            .iter()
            .filter_map(|event| match event {
                TurnEvent::Text(text) => Some(text.as_str()),
                TurnEvent::Control(_) => None,
            })
            .collect();
        assert!(text.starts_with("Mostly clinker.\n\nHere are your emission results:"));
    }

    #[tokio::test]
    async fn reset_phrase_starts_a_new_calculation() {
        let (_, agent) = agent();
        let state = agent.reply("cement", CalculatorState::default()).await.conversation_state;
        let state = agent.reply("1000", state).await.conversation_state;
        assert_eq!(state.answers.len(), 1);

        let reply = agent.reply("start over", state).await;
        assert!(reply.conversation_state.sector.is_none());
        assert!(reply.conversation_state.answers.is_empty());
        assert_eq!(reply.answer, SECTOR_INTRO);
    }
}
