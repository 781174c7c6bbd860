use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    Number,
    Select,
}

/// One entry of a sector questionnaire. Definitions are static, so every
/// field borrows from the binary.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Question {
    pub id: &'static str,
    #[serde(rename = "question")]
    pub prompt: &'static str,
    #[serde(rename = "type")]
    pub kind: QuestionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<&'static str>,
    #[serde(skip_serializing_if = "no_options")]
    pub options: &'static [&'static str],
}

fn no_options(options: &&'static [&'static str]) -> bool {
    options.is_empty()
}

impl Question {
    pub const fn number(id: &'static str, prompt: &'static str, unit: &'static str) -> Self {
        Self { id, prompt, kind: QuestionKind::Number, unit: Some(unit), options: &[] }
    }

    pub const fn select(
        id: &'static str,
        prompt: &'static str,
        options: &'static [&'static str],
    ) -> Self {
        Self { id, prompt, kind: QuestionKind::Select, unit: None, options }
    }

    /// Prompt text shown to the user, including the unit or the option list.
    pub fn render_prompt(&self) -> String {
        match self.kind {
            QuestionKind::Number => match self.unit {
                Some(unit) => format!("{}? Please reply with a number in {unit}.", self.prompt),
                None => format!("{}? Please reply with a number.", self.prompt),
            },
            QuestionKind::Select => {
                format!("{}? Please choose one of: {}.", self.prompt, self.options.join(", "))
            }
        }
    }
}

/// A collected answer. Numeric questions store numbers, select questions
/// store the verbatim option text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Number(f64),
    Text(String),
}

impl AnswerValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Text(text) => text.trim().replace(',', "").parse::<f64>().ok(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Number(_) => None,
        }
    }

    /// Positive, finite numeric value; anything else contributes nothing to a calculation.
    pub fn positive_number(&self) -> Option<f64> {
        self.as_number().filter(|value| value.is_finite() && *value > 0.0)
    }
}

impl fmt::Display for AnswerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(value) => write!(f, "{value}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}
