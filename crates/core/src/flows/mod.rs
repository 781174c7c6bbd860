//! Deterministic halves of the two dialogues. Each turn is folded into the
//! client-held state here; collaborator calls happen in the agent crate.

pub mod calculator;
pub mod formalities;

pub use calculator::{CalculatorAction, TurnStart};
pub use formalities::{FormalitiesAction, TransitionOutcome};
