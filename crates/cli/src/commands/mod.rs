//! Subcommand implementations
//!
//! Each command assembles one pipeline on a fresh application, registers it
//! with the pump service and hands control to the governor.

pub mod count;
pub mod echo;

pub use count::CountCommand;
pub use echo::EchoCommand;
