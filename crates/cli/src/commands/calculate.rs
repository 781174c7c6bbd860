use std::collections::BTreeMap;

use carbonex_core::domain::question::AnswerValue;
use carbonex_core::domain::sector::Sector;
use carbonex_core::emissions;
use carbonex_core::questionnaire;
use serde_json::{json, Value};

use crate::commands::{exit, CommandResult};

/// Prints the calculation as JSON. Needs no configuration: factor tables
/// are compiled in and nothing is stored.
pub fn run(sector: &str, raw_answers: &[String]) -> CommandResult {
    let sector = match sector.parse::<Sector>() {
        Ok(sector) => sector,
        Err(error) => {
            return CommandResult::failure(
                "calculate",
                "invalid_input",
                error.to_string(),
                exit::INVALID_INPUT,
            );
        }
    };
    let answers = match parse_answers(sector, raw_answers) {
        Ok(answers) => answers,
        Err(message) => {
            return CommandResult::failure(
                "calculate",
                "invalid_input",
                message,
                exit::INVALID_INPUT,
            );
        }
    };

    let result = emissions::calculate(sector, &answers);
    let mut payload = match serde_json::to_value(&result) {
        Ok(Value::Object(fields)) => fields,
        Ok(_) | Err(_) => {
            return CommandResult::failure(
                "calculate",
                "serialization",
                "calculation result could not be serialized",
                exit::INVALID_INPUT,
            )
        }
    };
    payload.insert("sector".to_string(), json!(sector.code()));

    CommandResult { exit_code: exit::OK, output: Value::Object(payload).to_string() }
}

/// `id=value` pairs. Numbers become numeric answers, anything else text.
pub fn parse_answers(
    sector: Sector,
    raw_answers: &[String],
) -> Result<BTreeMap<String, AnswerValue>, String> {
    let mut answers = BTreeMap::new();
    for raw in raw_answers {
        let Some((id, value)) = raw.split_once('=') else {
            return Err(format!("answer `{raw}` must look like id=value"));
        };
        let (id, value) = (id.trim(), value.trim());
        if !questionnaire::question_ids(sector).any(|known| known == id) {
            let expected: Vec<_> = questionnaire::question_ids(sector).collect();
            return Err(format!(
                "`{id}` is not a {} question (expected one of: {})",
                sector.code(),
                expected.join(", ")
            ));
        }
        let answer = match value.parse::<f64>() {
            Ok(number) if number.is_finite() => AnswerValue::Number(number),
            _ => AnswerValue::Text(value.to_string()),
        };
        answers.insert(id.to_string(), answer);
    }
    Ok(answers)
}

#[cfg(test)]
mod tests {
    use carbonex_core::domain::question::AnswerValue;
    use carbonex_core::domain::sector::Sector;

    use super::parse_answers;

    #[test]
    fn answers_parse_as_numbers_or_text() {
        let answers = parse_answers(
            Sector::IronSteel,
            &["steel_production=250".to_string(), "production_method = Both".to_string()],
        )
        .expect("answers");

        assert_eq!(answers["steel_production"], AnswerValue::Number(250.0));
        assert_eq!(answers["production_method"], AnswerValue::Text("Both".to_string()));
    }

    #[test]
    fn malformed_and_foreign_answers_are_rejected() {
        assert!(parse_answers(Sector::Cement, &["clinker_production".to_string()])
            .is_err_and(|message| message.contains("id=value")));
        assert!(parse_answers(Sector::Cement, &["fabric_production=10".to_string()])
            .is_err_and(|message| message.contains("clinker_production")));
    }
}
