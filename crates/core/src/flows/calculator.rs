use crate::domain::calculation::CalculationResult;
use crate::domain::conversation::{CalculatorPhase, CalculatorState, SectorSelection, Turn};
use crate::domain::question::{AnswerValue, Question};
use crate::domain::sector::Sector;
use crate::emissions;
use crate::questionnaire::questions_for;

pub const SECTOR_INTRO: &str = "Welcome to the carbon emissions calculator! Which sector does your \
company operate in? I can currently help with Cement, Iron & Steel, and Textiles.";

const RESET_PHRASES: &[&str] = &["start over", "restart", "new calculation"];

/// What the dialogue should do after the deterministic part of a turn.
#[derive(Clone, Debug, PartialEq)]
pub enum CalculatorAction {
    AskSector,
    ReportUnsupported(String),
    AskQuestion { sector: Sector, index: usize },
    Finalize { sector: Sector },
}

/// Result of opening a turn: the question the message should answer, if any.
#[derive(Clone, Debug, PartialEq)]
pub struct TurnStart {
    pub reset: bool,
    pub sector_selected: bool,
    pub pending: Option<&'static Question>,
}

/// Brings a client-supplied state back within its invariants.
pub fn sanitize(state: &mut CalculatorState) {
    let SectorSelection::Selected(sector) = state.selection() else {
        state.answers.clear();
        state.cursor = 0;
        state.phase = CalculatorPhase::Asking;
        state.result = None;
        return;
    };
    let questions = questions_for(sector);

    state.answers.retain(|key, _| questions.iter().any(|question| question.id == key.as_str()));
    state.cursor = first_unanswered(state, questions).unwrap_or(questions.len());

    let answered_all = state.cursor == questions.len();
    match state.phase {
        CalculatorPhase::Complete if !answered_all => {
            state.phase = CalculatorPhase::Asking;
            state.result = None;
        }
        CalculatorPhase::Complete if state.result.is_none() => {
            state.result = Some(emissions::calculate(sector, &state.answers));
        }
        CalculatorPhase::Asking => state.result = None,
        CalculatorPhase::Complete => {}
    }
}

pub fn is_reset_request(message: &str) -> bool {
    let normalized = message.to_lowercase();
    RESET_PHRASES.iter().any(|phrase| normalized.contains(phrase))
}

/// Applies reset and sector detection, records the user turn and reports
/// which question (if any) the message should be read against.
pub fn begin_turn(state: &mut CalculatorState, message: &str) -> TurnStart {
    let reset = is_reset_request(message);
    if reset {
        let history = std::mem::take(&mut state.history);
        *state = CalculatorState { history, ..CalculatorState::default() };
    }

    let mut sector_selected = false;
    if !matches!(state.selection(), SectorSelection::Selected(_)) {
        if let Some(sector) = Sector::detect(message) {
            state.select_sector(sector);
            state.answers.clear();
            state.phase = CalculatorPhase::Asking;
            state.result = None;
            sector_selected = true;
        }
    }

    state.history.push(Turn::user(message));

    TurnStart { reset, sector_selected, pending: pending_question(state) }
}

/// The question at the cursor while answers are still being collected.
pub fn pending_question(state: &CalculatorState) -> Option<&'static Question> {
    match (state.selection(), state.phase) {
        (SectorSelection::Selected(sector), CalculatorPhase::Asking) => {
            questions_for(sector).get(state.cursor)
        }
        _ => None,
    }
}

/// Stores an extracted answer under the pending question and advances the
/// cursor. Returns false when there was no pending question.
pub fn record_answer(state: &mut CalculatorState, value: AnswerValue) -> bool {
    let Some(question) = pending_question(state) else {
        return false;
    };
    state.answers.insert(question.id.to_string(), value);
    state.cursor += 1;
    true
}

pub fn next_action(state: &CalculatorState) -> CalculatorAction {
    match state.selection() {
        SectorSelection::Unselected => CalculatorAction::AskSector,
        SectorSelection::Unsupported(code) => CalculatorAction::ReportUnsupported(code.to_string()),
        SectorSelection::Selected(sector) => {
            let questions = questions_for(sector);
            if questions.is_empty() {
                return CalculatorAction::ReportUnsupported(sector.code().to_string());
            }
            match first_unanswered(state, questions) {
                None => CalculatorAction::Finalize { sector },
                Some(index) => CalculatorAction::AskQuestion { sector, index },
            }
        }
    }
}

/// Runs the calculator over the collected answers and marks the state
/// complete. Returns the result and whether this call made the transition.
pub fn finalize(state: &mut CalculatorState, sector: Sector) -> (CalculationResult, bool) {
    let result = emissions::calculate(sector, &state.answers);
    let newly_completed = state.phase == CalculatorPhase::Asking;
    state.phase = CalculatorPhase::Complete;
    state.cursor = questions_for(sector).len();
    state.result = Some(result.clone());
    (result, newly_completed)
}

pub fn question_prompt(sector: Sector, index: usize) -> Option<String> {
    let questions = questions_for(sector);
    let question = questions.get(index)?;
    Some(format!("Question {} of {}: {}", index + 1, questions.len(), question.render_prompt()))
}

pub fn unsupported_sector_message(code: &str) -> String {
    let supported: Vec<_> = Sector::ALL.iter().map(|sector| sector.display_name()).collect();
    format!(
        "Sorry, the '{code}' sector is not supported yet. Please choose one of: {}.",
        supported.join(", ")
    )
}

/// Deterministic message for the current state, used for every action that
/// does not need a collaborator.
pub fn render_action(action: &CalculatorAction) -> Option<String> {
    match action {
        CalculatorAction::AskSector => Some(SECTOR_INTRO.to_string()),
        CalculatorAction::ReportUnsupported(code) => Some(unsupported_sector_message(code)),
        CalculatorAction::AskQuestion { sector, index } => question_prompt(*sector, *index),
        CalculatorAction::Finalize { .. } => None,
    }
}

fn first_unanswered(state: &CalculatorState, questions: &[Question]) -> Option<usize> {
    questions.iter().position(|question| !state.answers.contains_key(question.id))
}

#[cfg(test)]
mod tests {
    use super::{
        begin_turn, finalize, next_action, record_answer, render_action, sanitize,
        CalculatorAction, SECTOR_INTRO,
    };
    use crate::domain::conversation::{CalculatorPhase, CalculatorState, Speaker};
    use crate::domain::question::AnswerValue;
    use crate::domain::sector::Sector;
    use crate::questionnaire::questions_for;

    #[test]
    fn empty_state_asks_for_sector() {
        let mut state = CalculatorState::default();
        let start = begin_turn(&mut state, "hello");

        assert!(!start.sector_selected);
        assert!(start.pending.is_none());
        assert_eq!(next_action(&state), CalculatorAction::AskSector);
        assert_eq!(render_action(&next_action(&state)).as_deref(), Some(SECTOR_INTRO));
        assert_eq!(state.history.len(), 1);
        assert_eq!(state.history[0].role, Speaker::User);
    }

    #[test]
    fn naming_a_sector_selects_it_and_asks_the_first_question() {
        let mut state = CalculatorState::default();
        let start = begin_turn(&mut state, "cement");

        assert!(start.sector_selected);
        assert_eq!(state.sector.as_deref(), Some("cement"));
        assert_eq!(state.cursor, 0);
        assert_eq!(start.pending.map(|question| question.id), Some("clinker_production"));

        let prompt = render_action(&next_action(&state)).expect("prompt");
        assert!(prompt.starts_with("Question 1 of 4: "));
        assert!(prompt.contains(questions_for(Sector::Cement)[0].prompt));
    }

    #[test]
    fn completes_exactly_when_every_question_is_answered() {
        let mut state = CalculatorState::default();
        begin_turn(&mut state, "textiles");
        let total = questions_for(Sector::Textiles).len();

        for answered in 1..=total {
            assert!(record_answer(&mut state, AnswerValue::Number(10.0)));
            let action = next_action(&state);
            if answered < total {
                assert_eq!(
                    action,
                    CalculatorAction::AskQuestion { sector: Sector::Textiles, index: answered }
                );
            } else {
                assert_eq!(action, CalculatorAction::Finalize { sector: Sector::Textiles });
            }
        }

        let (result, newly_completed) = finalize(&mut state, Sector::Textiles);
        assert!(newly_completed);
        assert_eq!(state.phase, CalculatorPhase::Complete);
        assert_eq!(state.result.as_ref(), Some(&result));

        let (_, again) = finalize(&mut state, Sector::Textiles);
        assert!(!again);
        assert!(!record_answer(&mut state, AnswerValue::Number(1.0)));
    }

    #[test]
    fn reset_phrase_clears_progress_but_keeps_history() {
        let mut state = CalculatorState::default();
        begin_turn(&mut state, "cement");
        record_answer(&mut state, AnswerValue::Number(5.0));

        let start = begin_turn(&mut state, "let's start over");
        assert!(start.reset);
        assert!(state.sector.is_none());
        assert!(state.answers.is_empty());
        assert_eq!(state.history.len(), 2);
    }

    #[test]
    fn unsupported_sector_is_reported_until_a_known_one_is_named() {
        let mut state = CalculatorState { sector: Some("aluminium".into()), ..Default::default() };
        begin_turn(&mut state, "not sure");
        assert_eq!(next_action(&state), CalculatorAction::ReportUnsupported("aluminium".into()));
        let message = render_action(&next_action(&state)).expect("message");
        assert!(message.contains("'aluminium'"));
        assert!(message.contains("Iron & Steel"));

        begin_turn(&mut state, "ok, steel then");
        assert_eq!(state.sector.as_deref(), Some("iron_steel"));
    }

    #[test]
    fn sanitize_drops_foreign_keys_and_recomputes_cursor() {
        let mut state = CalculatorState {
            sector: Some("cement".into()),
            cursor: 42,
            phase: CalculatorPhase::Complete,
            ..Default::default()
        };
        state.answers.insert("clinker_production".into(), AnswerValue::Number(1.0));
        state.answers.insert("steel_production".into(), AnswerValue::Number(1.0));

        sanitize(&mut state);

        assert_eq!(state.cursor, 1);
        assert_eq!(state.answers.len(), 1);
        assert_eq!(state.phase, CalculatorPhase::Asking);
        assert!(state.result.is_none());
    }

    #[test]
    fn sanitize_restores_missing_result_of_complete_state() {
        let mut state = CalculatorState { sector: Some("iron_steel".into()), ..Default::default() };
        for question in questions_for(Sector::IronSteel) {
            state.answers.insert(question.id.into(), AnswerValue::Number(2.0));
        }
        state.phase = CalculatorPhase::Complete;

        sanitize(&mut state);

        assert_eq!(state.cursor, 3);
        assert!(state.result.is_some());
    }
}
