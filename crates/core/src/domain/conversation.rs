use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::domain::calculation::CalculationResult;
use crate::domain::question::AnswerValue;
use crate::domain::sector::Sector;
use crate::domain::workflow::{UserRole, WorkflowKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Assistant,
}

impl Speaker {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Speaker,
    #[serde(alias = "text")]
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Speaker::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Speaker::Assistant, content: content.into() }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculatorPhase {
    #[default]
    Asking,
    Complete,
}

/// Where a calculator conversation stands with respect to its sector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SectorSelection<'a> {
    Unselected,
    Selected(Sector),
    /// The client sent a sector code that has no questionnaire.
    Unsupported(&'a str),
}

/// Client-held calculator dialogue state. The server never stores it; each
/// turn receives the last value and returns the next one.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalculatorState {
    pub sector: Option<String>,
    pub answers: BTreeMap<String, AnswerValue>,
    pub cursor: usize,
    pub history: Vec<Turn>,
    pub phase: CalculatorPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<CalculationResult>,
}

impl CalculatorState {
    pub fn selection(&self) -> SectorSelection<'_> {
        match self.sector.as_deref() {
            None => SectorSelection::Unselected,
            Some(code) => match code.parse::<Sector>() {
                Ok(sector) => SectorSelection::Selected(sector),
                Err(_) => SectorSelection::Unsupported(code),
            },
        }
    }

    pub fn select_sector(&mut self, sector: Sector) {
        self.sector = Some(sector.code().to_string());
        self.cursor = 0;
    }

    pub fn is_complete(&self) -> bool {
        self.phase == CalculatorPhase::Complete
    }
}

/// Client-held formalities dialogue state. Field aliases accept the
/// names older clients send.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormalitiesState {
    #[serde(alias = "user_type")]
    pub role: Option<UserRole>,
    #[serde(alias = "current_workflow")]
    pub workflow: Option<WorkflowKind>,
    #[serde(alias = "currentStep")]
    pub current_step: Option<u32>,
    #[serde(alias = "completedSteps")]
    pub completed_steps: BTreeSet<u32>,
    #[serde(alias = "conversation_history")]
    pub history: Vec<Turn>,
}

impl FormalitiesState {
    /// Most recent turns, oldest first.
    pub fn recent_history(&self, limit: usize) -> &[Turn] {
        let start = self.history.len().saturating_sub(limit);
        &self.history[start..]
    }
}

#[cfg(test)]
mod tests {
    use super::{CalculatorState, FormalitiesState, SectorSelection, Speaker, Turn};
    use crate::domain::sector::Sector;
    use crate::domain::workflow::{UserRole, WorkflowKind};

    #[test]
    fn empty_json_object_is_a_fresh_calculator_state() {
        let state: CalculatorState = serde_json::from_str("{}").expect("deserialize");
        assert_eq!(state, CalculatorState::default());
        assert_eq!(state.selection(), SectorSelection::Unselected);
    }

    #[test]
    fn unknown_sector_code_is_reported_as_unsupported() {
        let state = CalculatorState { sector: Some("aluminium".into()), ..Default::default() };
        assert_eq!(state.selection(), SectorSelection::Unsupported("aluminium"));

        let mut state = CalculatorState::default();
        state.select_sector(Sector::Textiles);
        assert_eq!(state.selection(), SectorSelection::Selected(Sector::Textiles));
    }

    #[test]
    fn formalities_state_accepts_legacy_field_names() {
        let state: FormalitiesState = serde_json::from_value(serde_json::json!({
            "user_type": "seller",
            "current_workflow": "seller_registration",
            "current_step": 2,
            "completed_steps": [1],
            "conversation_history": [{"role": "user", "content": "hi"}]
        }))
        .expect("deserialize");

        assert_eq!(state.role, Some(UserRole::Seller));
        assert_eq!(state.workflow, Some(WorkflowKind::SellerRegistration));
        assert_eq!(state.current_step, Some(2));
        assert!(state.completed_steps.contains(&1));
        assert_eq!(state.history, vec![Turn::user("hi")]);
    }

    #[test]
    fn turns_accept_text_alias_and_serialize_content() {
        let turn: Turn =
            serde_json::from_str(r#"{"role":"assistant","text":"hello"}"#).expect("deserialize");
        assert_eq!(turn.role, Speaker::Assistant);
        let json = serde_json::to_value(&turn).expect("serialize");
        assert_eq!(json["content"], "hello");
    }

    #[test]
    fn recent_history_keeps_the_tail() {
        let state = FormalitiesState {
            history: (0..8).map(|n| Turn::user(n.to_string())).collect(),
            ..Default::default()
        };
        let recent = state.recent_history(5);
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0].content, "3");
    }
}
