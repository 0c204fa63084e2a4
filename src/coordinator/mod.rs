//! Join-barrier coordinator
//!
//! The coordinator is responsible for:
//! - The shared join record and its conditional append (`state`, `join_store`)
//! - Classifying each registration and electing the assembler (`register`)
//! - Planning cluster formation for the last node (`assembly`)
//! - Rendering outcomes as node instruction scripts (`script`)
//! - Serving it all over HTTP (`http`, `server`)

pub mod assembly;
pub mod client;
pub mod http;
pub mod join_store;
pub mod register;
pub mod reports;
pub mod script;
pub mod server;
pub mod sled_store;
pub mod state;

pub use register::{Instruction, InstructionOutcome, JoinCoordinator, RegistrationOutcome};
pub use server::Coordinator;
