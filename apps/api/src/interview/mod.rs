//! Interview sessions: the state machine, its collaborators and HTTP surface.
//!
//! - `machine`: per-session state machine (start, submit, next, end, feedback)
//! - `registry`: live sessions by id, rebuilt from the store on demand
//! - `oracle` / `llm_oracle`: question generation and scoring
//! - `store`: durable sessions and turns
//! - `feedback`: local fallbacks for the end-of-session summary

pub mod feedback;
pub mod guards;
pub mod handlers;
pub mod llm_oracle;
pub mod machine;
pub mod oracle;
pub mod profile;
pub mod prompts;
pub mod registry;
pub mod round;
pub mod session;
pub mod store;
#[cfg(test)]
pub mod testing;
