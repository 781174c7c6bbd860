//! Linear emission-factor calculator.
//!
//! Each sector carries three scope tables mapping an answer key to a
//! coefficient in tCO2e per unit. Values are summed unrounded and only the
//! returned fields are rounded, so `total_emissions` never drifts from the
//! scope subtotals.

use std::collections::BTreeMap;

use crate::domain::calculation::{BreakdownLine, CalculationResult, Scope};
use crate::domain::question::AnswerValue;
use crate::domain::sector::Sector;

/// Flat price of one carbon credit, in INR.
pub const CREDIT_UNIT_PRICE: f64 = 2500.0;

pub const STEEL_PRODUCTION_KEY: &str = "steel_production";
pub const PRODUCTION_METHOD_KEY: &str = "production_method";
pub const BLAST_FURNACE_KEY: &str = "blast_furnace";
pub const ELECTRIC_ARC_KEY: &str = "electric_arc";

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FactorTable {
    pub scope1: &'static [(&'static str, f64)],
    pub scope2: &'static [(&'static str, f64)],
    pub scope3: &'static [(&'static str, f64)],
}

impl FactorTable {
    fn scopes(&self) -> [(Scope, &'static [(&'static str, f64)]); 3] {
        [
            (Scope::Direct, self.scope1),
            (Scope::PurchasedEnergy, self.scope2),
            (Scope::ValueChain, self.scope3),
        ]
    }
}

const CEMENT: FactorTable = FactorTable {
    scope1: &[
        ("clinker_production", 0.85),
        ("coal_consumption", 2.86),
        ("diesel_consumption", 2.68),
    ],
    scope2: &[("electricity_consumption", 0.82)],
    scope3: &[("transportation", 0.12)],
};

/// Scope 1 keys here are production routes, not answer keys; the
/// production method answer picks which one applies.
const IRON_STEEL: FactorTable = FactorTable {
    scope1: &[(BLAST_FURNACE_KEY, 1.85), (ELECTRIC_ARC_KEY, 0.40)],
    scope2: &[("electricity_consumption", 0.82)],
    scope3: &[],
};

const TEXTILES: FactorTable = FactorTable {
    scope1: &[("natural_gas_consumption", 2.03), ("processing_fuel", 2.68)],
    scope2: &[("electricity_consumption", 0.82)],
    scope3: &[("water_consumption", 0.05)],
};

pub fn factors_for(sector: Sector) -> &'static FactorTable {
    match sector {
        Sector::Cement => &CEMENT,
        Sector::IronSteel => &IRON_STEEL,
        Sector::Textiles => &TEXTILES,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProductionMethod {
    BlastFurnace,
    ElectricArc,
    Both,
}

impl ProductionMethod {
    /// Missing or unrecognised methods fall back to the blast furnace
    /// route, the higher of the two coefficients.
    pub fn from_answer(answer: Option<&AnswerValue>) -> Self {
        let Some(text) = answer.and_then(AnswerValue::as_text) else {
            return Self::BlastFurnace;
        };
        let normalized = text.to_lowercase();
        if normalized.contains("both") {
            Self::Both
        } else if normalized.contains("electric") || normalized.contains("arc") {
            Self::ElectricArc
        } else {
            Self::BlastFurnace
        }
    }

    fn shares(self) -> &'static [(&'static str, f64)] {
        match self {
            Self::BlastFurnace => &[(BLAST_FURNACE_KEY, 1.0)],
            Self::ElectricArc => &[(ELECTRIC_ARC_KEY, 1.0)],
            Self::Both => &[(BLAST_FURNACE_KEY, 0.5), (ELECTRIC_ARC_KEY, 0.5)],
        }
    }
}

pub fn calculate(sector: Sector, answers: &BTreeMap<String, AnswerValue>) -> CalculationResult {
    let table = factors_for(sector);
    let mut subtotals = [0.0_f64; 3];
    let mut breakdown = Vec::new();

    for (index, (scope, entries)) in table.scopes().into_iter().enumerate() {
        if sector == Sector::IronSteel && scope == Scope::Direct {
            subtotals[index] += steel_route_emissions(entries, answers, &mut breakdown);
            continue;
        }
        for (key, coefficient) in entries {
            let Some(value) = answers.get(*key).and_then(AnswerValue::positive_number) else {
                continue;
            };
            let emissions = value * coefficient;
            subtotals[index] += emissions;
            breakdown.push(BreakdownLine {
                source: humanize(key),
                scope,
                emissions: round2(emissions),
            });
        }
    }

    let [scope1, scope2, scope3] = subtotals;
    let total = round2(scope1 + scope2 + scope3);
    let credits_needed = total.ceil().max(0.0) as u64;

    CalculationResult {
        total_emissions: total,
        scope1_emissions: round2(scope1),
        scope2_emissions: round2(scope2),
        scope3_emissions: round2(scope3),
        credits_needed,
        cost_estimate: round2(credits_needed as f64 * CREDIT_UNIT_PRICE),
        breakdown,
    }
}

fn steel_route_emissions(
    entries: &[(&'static str, f64)],
    answers: &BTreeMap<String, AnswerValue>,
    breakdown: &mut Vec<BreakdownLine>,
) -> f64 {
    let Some(production) = answers.get(STEEL_PRODUCTION_KEY).and_then(AnswerValue::positive_number)
    else {
        return 0.0;
    };
    let method = ProductionMethod::from_answer(answers.get(PRODUCTION_METHOD_KEY));

    let mut subtotal = 0.0;
    for (route, share) in method.shares() {
        let Some((_, coefficient)) = entries.iter().find(|(key, _)| key == route) else {
            continue;
        };
        let emissions = production * share * coefficient;
        subtotal += emissions;
        breakdown.push(BreakdownLine {
            source: humanize(route),
            scope: Scope::Direct,
            emissions: round2(emissions),
        });
    }
    subtotal
}

/// `clinker_production` -> `Clinker Production`.
pub fn humanize(key: &str) -> String {
    key.split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{calculate, humanize, CREDIT_UNIT_PRICE};
    use crate::domain::calculation::Scope;
    use crate::domain::question::AnswerValue;
    use crate::domain::sector::Sector;

    fn answers(pairs: &[(&str, AnswerValue)]) -> BTreeMap<String, AnswerValue> {
        pairs.iter().map(|(key, value)| (key.to_string(), value.clone())).collect()
    }

    fn num(value: f64) -> AnswerValue {
        AnswerValue::Number(value)
    }

    #[test]
    fn empty_answers_yield_zero_for_every_sector() {
        for sector in Sector::ALL {
            let result = calculate(sector, &BTreeMap::new());
            assert_eq!(result.total_emissions, 0.0, "{sector}");
            assert_eq!(result.scope1_emissions, 0.0);
            assert_eq!(result.scope2_emissions, 0.0);
            assert_eq!(result.scope3_emissions, 0.0);
            assert_eq!(result.credits_needed, 0);
            assert_eq!(result.cost_estimate, 0.0);
            assert!(result.breakdown.is_empty());
        }
    }

    #[test]
    fn cement_sums_scopes_and_prices_credits() {
        let result = calculate(
            Sector::Cement,
            &answers(&[
                ("clinker_production", num(1000.0)),
                ("coal_consumption", num(100.0)),
                ("electricity_consumption", num(500.0)),
                ("diesel_consumption", num(10.0)),
            ]),
        );

        assert!((result.scope1_emissions - (850.0 + 286.0 + 26.8)).abs() < 1e-9);
        assert!((result.scope2_emissions - 410.0).abs() < 1e-9);
        assert_eq!(result.scope3_emissions, 0.0);
        assert!((result.total_emissions - 1572.8).abs() < 1e-9);
        assert_eq!(result.credits_needed, 1573);
        assert_eq!(result.cost_estimate, 1573.0 * CREDIT_UNIT_PRICE);
        assert_eq!(result.breakdown[0].source, "Clinker Production");
        assert_eq!(result.breakdown.len(), 4);
    }

    #[test]
    fn total_matches_unrounded_scope_sum_outside_iron_and_steel() {
        let cases = [
            (
                Sector::Cement,
                answers(&[
                    ("clinker_production", num(1234.567)),
                    ("electricity_consumption", num(98.765)),
                    ("transportation", num(33.333)),
                ]),
            ),
            (
                Sector::Textiles,
                answers(&[
                    ("natural_gas_consumption", num(777.77)),
                    ("electricity_consumption", num(12.345)),
                    ("water_consumption", num(5555.5)),
                ]),
            ),
        ];

        for (sector, answers) in cases {
            let table = super::factors_for(sector);
            let raw: f64 = [table.scope1, table.scope2, table.scope3]
                .iter()
                .flat_map(|entries| entries.iter())
                .filter_map(|(key, factor)| {
                    answers.get(*key).and_then(AnswerValue::positive_number).map(|v| v * factor)
                })
                .sum();
            let result = calculate(sector, &answers);
            assert!((result.total_emissions - raw).abs() <= 0.005 + 1e-9, "{sector}");
        }
    }

    #[test]
    fn both_production_methods_split_production_in_half() {
        let both = calculate(
            Sector::IronSteel,
            &answers(&[
                ("production_method", AnswerValue::Text("Both".into())),
                ("steel_production", num(100.0)),
            ]),
        );

        let direct: Vec<_> =
            both.breakdown.iter().filter(|line| line.scope == Scope::Direct).collect();
        assert_eq!(direct.len(), 2);
        assert_eq!(direct[0].source, "Blast Furnace");
        assert!((direct[0].emissions - 50.0 * 1.85).abs() < 1e-9);
        assert_eq!(direct[1].source, "Electric Arc");
        assert!((direct[1].emissions - 50.0 * 0.40).abs() < 1e-9);

        let blast = calculate(
            Sector::IronSteel,
            &answers(&[
                ("production_method", AnswerValue::Text("Blast Furnace".into())),
                ("steel_production", num(50.0)),
            ]),
        );
        let arc = calculate(
            Sector::IronSteel,
            &answers(&[
                ("production_method", AnswerValue::Text("Electric Arc Furnace".into())),
                ("steel_production", num(50.0)),
            ]),
        );
        assert!(
            (both.scope1_emissions - (blast.scope1_emissions + arc.scope1_emissions)).abs() < 1e-9
        );
    }

    #[test]
    fn missing_production_method_defaults_to_blast_furnace() {
        let result = calculate(Sector::IronSteel, &answers(&[("steel_production", num(10.0))]));
        assert!((result.scope1_emissions - 18.5).abs() < 1e-9);
        assert_eq!(result.breakdown[0].source, "Blast Furnace");
    }

    #[test]
    fn credits_are_the_ceiling_of_total() {
        let fractional = calculate(
            Sector::Textiles,
            &answers(&[("electricity_consumption", num(71.963_414_634))]),
        );
        assert!((fractional.total_emissions - 59.01).abs() < 1e-9);
        assert_eq!(fractional.credits_needed, 60);

        let exact = calculate(
            Sector::Cement,
            &answers(&[("electricity_consumption", num(73.170_731_707))]),
        );
        assert!((exact.total_emissions - 60.0).abs() < 1e-9);
        assert_eq!(exact.credits_needed, 60);
    }

    #[test]
    fn non_positive_and_non_numeric_answers_are_ignored() {
        let result = calculate(
            Sector::Cement,
            &answers(&[
                ("clinker_production", num(-10.0)),
                ("coal_consumption", num(0.0)),
                ("electricity_consumption", AnswerValue::Text("lots".into())),
            ]),
        );
        assert_eq!(result.total_emissions, 0.0);
        assert!(result.breakdown.is_empty());
    }

    #[test]
    fn humanize_title_cases_snake_keys() {
        assert_eq!(humanize("natural_gas_consumption"), "Natural Gas Consumption");
        assert_eq!(humanize("electric_arc"), "Electric Arc");
    }
}
