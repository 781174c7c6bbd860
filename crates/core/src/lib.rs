pub mod config;
pub mod domain;
pub mod emissions;
pub mod errors;
pub mod flows;
pub mod questionnaire;
pub mod workflows;

pub use domain::calculation::{BreakdownLine, CalculationResult, Scope};
pub use domain::conversation::{
    CalculatorPhase, CalculatorState, FormalitiesState, SectorSelection, Speaker, Turn,
};
pub use domain::question::{AnswerValue, Question, QuestionKind};
pub use domain::sector::Sector;
pub use domain::workflow::{UserRole, WorkflowKind, WorkflowStep};
pub use errors::{ApplicationError, CollaboratorError, DomainError, InterfaceError};
