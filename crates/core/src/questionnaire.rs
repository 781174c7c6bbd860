//! Static per-sector questionnaires. The question ids double as keys of
//! the emission factor tables in [`crate::emissions`].

use crate::domain::question::Question;
use crate::domain::sector::Sector;

pub const PRODUCTION_METHOD_OPTIONS: &[&str] = &["Blast Furnace", "Electric Arc Furnace", "Both"];

const ELECTRICITY: Question = Question::number(
    "electricity_consumption",
    "Annual electricity consumption (MWh)",
    "MWh",
);

const CEMENT: &[Question] = &[
    Question::number("clinker_production", "Annual clinker production (tonnes)", "tonnes"),
    Question::number("coal_consumption", "Annual coal consumption (tonnes)", "tonnes"),
    ELECTRICITY,
    Question::number("diesel_consumption", "Annual diesel consumption (kilolitres)", "kL"),
];

const IRON_STEEL: &[Question] = &[
    Question::select(
        "production_method",
        "Primary steel production method",
        PRODUCTION_METHOD_OPTIONS,
    ),
    Question::number("steel_production", "Annual steel production (tonnes)", "tonnes"),
    ELECTRICITY,
];

const TEXTILES: &[Question] = &[
    Question::number("fabric_production", "Annual fabric production (tonnes)", "tonnes"),
    Question::number(
        "natural_gas_consumption",
        "Annual natural gas consumption (cubic meters)",
        "m³",
    ),
    ELECTRICITY,
    Question::number("water_consumption", "Annual water consumption (cubic meters)", "m³"),
];

pub fn questions_for(sector: Sector) -> &'static [Question] {
    match sector {
        Sector::Cement => CEMENT,
        Sector::IronSteel => IRON_STEEL,
        Sector::Textiles => TEXTILES,
    }
}

/// Lookup by sector code. Unknown codes yield an empty questionnaire.
pub fn questions_for_code(code: &str) -> &'static [Question] {
    code.parse::<Sector>().map(questions_for).unwrap_or(&[])
}

pub fn question_ids(sector: Sector) -> impl Iterator<Item = &'static str> {
    questions_for(sector).iter().map(|question| question.id)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::{question_ids, questions_for, questions_for_code};
    use crate::domain::question::QuestionKind;
    use crate::domain::sector::Sector;

    #[test]
    fn every_sector_has_a_questionnaire_with_unique_ids() {
        for sector in Sector::ALL {
            let ids: Vec<_> = question_ids(sector).collect();
            assert!(!ids.is_empty(), "{sector} has no questions");
            assert_eq!(ids.len(), ids.iter().collect::<HashSet<_>>().len());
        }
    }

    #[test]
    fn first_cement_question_is_clinker_production() {
        let first = &questions_for(Sector::Cement)[0];
        assert_eq!(first.id, "clinker_production");
        assert_eq!(first.prompt, "Annual clinker production (tonnes)");
    }

    #[test]
    fn only_iron_and_steel_asks_a_select_question() {
        let select: Vec<_> = Sector::ALL
            .into_iter()
            .flat_map(questions_for)
            .filter(|question| question.kind == QuestionKind::Select)
            .map(|question| question.id)
            .collect();
        assert_eq!(select, vec!["production_method"]);
    }

    #[test]
    fn unknown_sector_code_yields_empty_list() {
        assert!(questions_for_code("aluminium").is_empty());
        assert_eq!(questions_for_code("textiles").len(), 4);
    }
}
