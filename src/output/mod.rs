// Output module - errors and terminal reporting

pub mod errors;
pub mod terminal;

pub use errors::ArmadaError;
pub use terminal::{RunRecap, TerminalOutput};
