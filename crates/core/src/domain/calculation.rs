use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scope {
    #[serde(rename = "scope1")]
    Direct,
    #[serde(rename = "scope2")]
    PurchasedEnergy,
    #[serde(rename = "scope3")]
    ValueChain,
}

impl Scope {
    pub fn label(self) -> &'static str {
        match self {
            Self::Direct => "Scope 1 (direct)",
            Self::PurchasedEnergy => "Scope 2 (purchased energy)",
            Self::ValueChain => "Scope 3 (value chain)",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BreakdownLine {
    pub source: String,
    pub scope: Scope,
    pub emissions: f64,
}

/// Emissions computed for one sector. Values are tCO2e rounded to two
/// decimals; `credits_needed` is the ceiling of the rounded total.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalculationResult {
    pub total_emissions: f64,
    pub scope1_emissions: f64,
    pub scope2_emissions: f64,
    pub scope3_emissions: f64,
    pub credits_needed: u64,
    pub cost_estimate: f64,
    pub breakdown: Vec<BreakdownLine>,
}

impl CalculationResult {
    /// Deterministic plain-text summary used whenever a generated
    /// explanation is unavailable.
    pub fn summary(&self) -> String {
        let mut text = String::from("Here are your emission results:\n\n");
        text.push_str(&format!("Total emissions: {:.2} tCO2e\n", self.total_emissions));
        for (scope, value) in [
            (Scope::Direct, self.scope1_emissions),
            (Scope::PurchasedEnergy, self.scope2_emissions),
            (Scope::ValueChain, self.scope3_emissions),
        ] {
            text.push_str(&format!("- {}: {value:.2} tCO2e\n", scope.label()));
        }
        if !self.breakdown.is_empty() {
            text.push_str("\nBreakdown:\n");
            for line in &self.breakdown {
                text.push_str(&format!("- {}: {:.2} tCO2e\n", line.source, line.emissions));
            }
        }
        text.push_str(&format!("\nCarbon credits needed: {}\n", self.credits_needed));
        text.push_str(&format!("Estimated cost: INR {:.2}", self.cost_estimate));
        text
    }
}

#[cfg(test)]
mod tests {
    use super::{BreakdownLine, CalculationResult, Scope};

    #[test]
    fn summary_lists_totals_scopes_credits_and_cost() {
        let result = CalculationResult {
            total_emissions: 59.01,
            scope1_emissions: 50.0,
            scope2_emissions: 9.01,
            scope3_emissions: 0.0,
            credits_needed: 60,
            cost_estimate: 150000.0,
            breakdown: vec![BreakdownLine {
                source: "Clinker Production".to_string(),
                scope: Scope::Direct,
                emissions: 50.0,
            }],
        };

        let summary = result.summary();
        assert!(summary.contains("Total emissions: 59.01 tCO2e"));
        assert!(summary.contains("- Scope 2 (purchased energy): 9.01 tCO2e"));
        assert!(summary.contains("- Clinker Production: 50.00 tCO2e"));
        assert!(summary.contains("Carbon credits needed: 60"));
        assert!(summary.ends_with("Estimated cost: INR 150000.00"));
    }

    #[test]
    fn scope_serializes_as_scope_key() {
        let json = serde_json::to_value(Scope::PurchasedEnergy).expect("serialize scope");
        assert_eq!(json, "scope2");
    }
}
