//! Shell safety layer
//!
//! Everything that ends up inside a command string for a remote shell goes
//! through this module: identifiers are validated, paths are normalised and
//! every token is escaped by [`CommandLine`] at serialisation time.

pub mod command;
pub mod escape;

pub use command::{CommandLine, CommandOutput};
pub use escape::{escape, sanitize_remote_path, validate_identifier};
