use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::debug;

use carbonex_core::domain::question::{AnswerValue, Question, QuestionKind};

use crate::llm::LlmClient;

const EXTRACTION_SYSTEM_PROMPT: &str =
    "You extract a single answer from a user's message. Reply with the answer only.";

/// How an answer was obtained, if at all.
#[derive(Clone, Debug, PartialEq)]
pub enum ExtractionOutcome {
    Deterministic(AnswerValue),
    Model(AnswerValue),
    NoMatch,
}

impl ExtractionOutcome {
    pub fn value(self) -> Option<AnswerValue> {
        match self {
            Self::Deterministic(value) | Self::Model(value) => Some(value),
            Self::NoMatch => None,
        }
    }
}

/// Reads the answer to one question out of free text. Pattern matching runs
/// first; a single completion call is the fallback. Never fails.
#[derive(Clone)]
pub struct AnswerExtractor {
    llm: Arc<dyn LlmClient>,
}

impl AnswerExtractor {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn extract(&self, question: &Question, message: &str) -> ExtractionOutcome {
        self.extract_with(question, message, true).await
    }

    /// With `allow_fallback` false only the deterministic matchers run.
    pub async fn extract_with(
        &self,
        question: &Question,
        message: &str,
        allow_fallback: bool,
    ) -> ExtractionOutcome {
        let deterministic = match question.kind {
            QuestionKind::Number => first_positive_number(message).map(AnswerValue::Number),
            QuestionKind::Select => match_option(question.options, message)
                .map(|option| AnswerValue::Text(option.to_string())),
        };
        if let Some(value) = deterministic {
            return ExtractionOutcome::Deterministic(value);
        }
        if !allow_fallback {
            return ExtractionOutcome::NoMatch;
        }

        let prompt = fallback_prompt(question, message);
        let reply = match self.llm.complete(&prompt, Some(EXTRACTION_SYSTEM_PROMPT)).await {
            Ok(reply) => reply,
            Err(error) => {
                debug!(
                    event_name = "agent.extraction.fallback",
                    question_id = question.id,
                    error = %error,
                    "extraction fallback failed; treating as no match"
                );
                return ExtractionOutcome::NoMatch;
            }
        };

        let parsed = match question.kind {
            QuestionKind::Number => parse_number_reply(&reply).map(AnswerValue::Number),
            QuestionKind::Select => parse_option_reply(question.options, &reply)
                .map(|option| AnswerValue::Text(option.to_string())),
        };
        debug!(
            event_name = "agent.extraction.fallback",
            question_id = question.id,
            matched = parsed.is_some(),
            "extraction fallback answered"
        );
        parsed.map(ExtractionOutcome::Model).unwrap_or(ExtractionOutcome::NoMatch)
    }
}

fn fallback_prompt(question: &Question, message: &str) -> String {
    match question.kind {
        QuestionKind::Number => format!(
            "Question: {}\nUser's answer: {message}\n\nExtract the numeric value the user gave. \
             Reply with only the number, without units or thousands separators, or with null \
             if no number was given.",
            question.prompt
        ),
        QuestionKind::Select => format!(
            "Question: {}\nOptions: {}\nUser's answer: {message}\n\nWhich option did the user \
             choose? Reply with exactly one of the options as written, or with null if none \
             applies.",
            question.prompt,
            question.options.join(", ")
        ),
    }
}

/// First integer or decimal token, after thousands separators between
/// digits are removed. Zero, negatives and non-finite values are rejected.
pub fn first_positive_number(message: &str) -> Option<f64> {
    static NUMBER_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = NUMBER_PATTERN
        .get_or_init(|| Regex::new(r"-?(?:\d+(?:\.\d+)?|\.\d+)").ok())
        .as_ref()?;

    let cleaned = strip_thousands_separators(message);
    let token = pattern.find(&cleaned)?;
    token.as_str().parse::<f64>().ok().filter(|value| value.is_finite() && *value > 0.0)
}

fn strip_thousands_separators(message: &str) -> String {
    let chars: Vec<char> = message.chars().collect();
    chars
        .iter()
        .enumerate()
        .filter(|(index, ch)| {
            let between_digits = **ch == ','
                && *index > 0
                && chars[index - 1].is_ascii_digit()
                && chars.get(index + 1).is_some_and(char::is_ascii_digit);
            !between_digits
        })
        .map(|(_, ch)| *ch)
        .collect()
}

/// Exact match, then containment either way, then shared significant words.
pub fn match_option(options: &'static [&'static str], message: &str) -> Option<&'static str> {
    let normalized = normalize_text(message);
    if normalized.is_empty() {
        return None;
    }

    if let Some(option) =
        options.iter().copied().find(|option| option.to_lowercase() == normalized)
    {
        return Some(option);
    }

    let contained = options.iter().copied().find(|option| {
        let option = option.to_lowercase();
        let shorter = option.len().min(normalized.len());
        shorter >= 3 && (normalized.contains(&option) || option.contains(&normalized))
    });
    if let Some(option) = contained {
        return Some(option);
    }

    let tokens = tokenize(&normalized);
    let mut best: Option<(&'static str, usize)> = None;
    for option in options.iter().copied() {
        let overlap = tokenize(&option.to_lowercase())
            .iter()
            .filter(|word| word.len() > 3 && tokens.contains(word))
            .count();
        if overlap > 0 && best.map_or(true, |(_, count)| overlap > count) {
            best = Some((option, overlap));
        }
    }
    best.map(|(option, _)| option)
}

fn parse_number_reply(reply: &str) -> Option<f64> {
    let reply = reply.trim();
    if reply.eq_ignore_ascii_case("null") {
        return None;
    }
    first_positive_number(reply)
}

fn parse_option_reply(options: &'static [&'static str], reply: &str) -> Option<&'static str> {
    let reply = reply.trim();
    options.iter().copied().find(|option| *option == reply)
}

fn normalize_text(text: &str) -> String {
    text.trim().to_lowercase()
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}
