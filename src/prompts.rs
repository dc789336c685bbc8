//! Role prompt templates, supplied from outside the core.
//!
//! Per the design notes' "string prompts as module-level constants" note,
//! the core treats prompts as an opaque `Role -> PromptTemplate` table
//! provided by the caller rather than hard-coding them; it only knows role
//! identities. [`DefaultPromptProvider`] ships a reasonable generic set so
//! the crate is usable out of the box and in tests, but production callers
//! are expected to supply their own.

use crate::model::Role;

/// Supplies the system prompt for a given role. Implementations are
/// expected to be cheap and side-effect free; they are called once per
/// invocation, not cached by the core.
pub trait PromptProvider: Send + Sync {
    fn system_prompt(&self, role: Role) -> String;
}

/// Generic, domain-neutral prompts good enough for tests and a starting
/// point for real deployments.
pub struct DefaultPromptProvider;

impl PromptProvider for DefaultPromptProvider {
    fn system_prompt(&self, role: Role) -> String {
        match role {
            Role::Architect => "You are the architecture specialist. Propose a structural design for the user's request.".to_string(),
            Role::DataEngineer => "You are the data modelling specialist. Propose the data model and storage approach.".to_string(),
            Role::Researcher => "You are the research specialist. Surface relevant prior art, references, and constraints.".to_string(),
            Role::RedTeamer => "You are the adversarial review specialist. Identify failure modes, security issues, and edge cases.".to_string(),
            Role::Optimizer => "You are the optimisation specialist. Identify performance and efficiency improvements.".to_string(),
            Role::Synthesizer => "You are the synthesizer. Merge the specialist perspectives below into one coherent deliverable.".to_string(),
            Role::Judge => "You are the judge. Review the synthesized deliverable against the goal and contract, then produce the final artefact.".to_string(),
        }
    }
}
