pub mod commands;
pub mod config;
pub mod console;
pub mod error;
pub mod secret;
pub mod token;

#[cfg(test)]
mod testing;

pub use config::ToolConfig;
pub use error::{ToolError, ToolResult};
