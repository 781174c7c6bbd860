use std::sync::OnceLock;

use regex::Regex;

use crate::domain::conversation::{FormalitiesState, Turn};
use crate::domain::workflow::{UserRole, WorkflowKind};
use crate::workflows::step_count;

pub const ROLE_QUESTION: &str = "Are you a buyer or a seller? (Please say 'buyer' or 'seller')";
pub const CONGRATULATIONS: &str =
    "Congratulations! You've completed all steps. Is there anything else you'd like to know?";

const COMPLETION_PHRASES: &[&str] = &["complete", "done", "finished", "ready for next"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FormalitiesAction {
    AskRole,
    AskWorkflow(UserRole),
    GuideStep { workflow: WorkflowKind, step: u32 },
    Congratulate,
    Freeform,
}

/// Signals picked up from one user message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub role_detected: Option<UserRole>,
    pub workflow_selected: Option<WorkflowKind>,
    pub jumped_to: Option<u32>,
    pub completed_step: Option<u32>,
    pub finished_workflow: bool,
}

pub fn workflow_question(role: UserRole) -> String {
    format!(
        "Would you like help with {role} registration or MRV compliance? \
         (Please say 'registration' or 'compliance')"
    )
}

/// Removes step numbers that fall outside the selected workflow.
pub fn sanitize(state: &mut FormalitiesState) {
    let Some(workflow) = state.workflow else {
        state.current_step = None;
        state.completed_steps.clear();
        return;
    };
    let count = step_count(workflow);
    state.current_step = state.current_step.filter(|step| (1..=count).contains(step));
    state.completed_steps.retain(|step| (1..=count).contains(step));
}

/// A workflow is finished once its last step has been completed, however
/// the user got there.
pub fn is_finished(state: &FormalitiesState) -> bool {
    state.workflow.is_some_and(|workflow| state.completed_steps.contains(&step_count(workflow)))
}

/// Folds one user message into the state: role, workflow, step jumps and
/// step completion, in that order. The message is appended to history.
pub fn apply_message(state: &mut FormalitiesState, message: &str) -> TransitionOutcome {
    let mut outcome = TransitionOutcome::default();
    let normalized = message.to_lowercase();

    if state.role.is_none() {
        state.role = UserRole::detect(&normalized);
        outcome.role_detected = state.role;
    }

    if let (Some(role), None) = (state.role, state.workflow) {
        state.workflow = WorkflowKind::detect(&normalized, role);
        outcome.workflow_selected = state.workflow;
    }

    if let Some(workflow) = state.workflow {
        let count = step_count(workflow);
        if let Some(step) = step_reference(&normalized).filter(|step| (1..=count).contains(step)) {
            state.current_step = Some(step);
            outcome.jumped_to = Some(step);
        }

        let completion = COMPLETION_PHRASES.iter().any(|phrase| normalized.contains(phrase));
        if let Some(current) = state.current_step.filter(|_| completion) {
            if state.completed_steps.insert(current) {
                outcome.completed_step = Some(current);
                outcome.finished_workflow = current == count;
                state.current_step = (current < count).then_some(current + 1);
            }
        }
    }

    state.history.push(Turn::user(message));

    if state.workflow.is_some() && state.current_step.is_none() && !is_finished(state) {
        state.current_step = Some(1);
    }

    outcome
}

pub fn next_action(state: &FormalitiesState, outcome: &TransitionOutcome) -> FormalitiesAction {
    let Some(role) = state.role else {
        return FormalitiesAction::AskRole;
    };
    let Some(workflow) = state.workflow else {
        return FormalitiesAction::AskWorkflow(role);
    };
    if outcome.finished_workflow {
        return FormalitiesAction::Congratulate;
    }
    match state.current_step {
        Some(step) => FormalitiesAction::GuideStep { workflow, step },
        None => FormalitiesAction::Freeform,
    }
}

/// Deterministic reply for actions that need no collaborator.
pub fn render_action(action: &FormalitiesAction) -> Option<String> {
    match action {
        FormalitiesAction::AskRole => Some(ROLE_QUESTION.to_string()),
        FormalitiesAction::AskWorkflow(role) => Some(workflow_question(*role)),
        FormalitiesAction::Congratulate => Some(CONGRATULATIONS.to_string()),
        FormalitiesAction::GuideStep { .. } | FormalitiesAction::Freeform => None,
    }
}

fn step_reference(normalized: &str) -> Option<u32> {
    static STEP_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = STEP_PATTERN.get_or_init(|| Regex::new(r"\bstep\s*(\d{1,3})\b").ok()).as_ref()?;
    pattern.captures(normalized)?.get(1)?.as_str().parse().ok()
}
