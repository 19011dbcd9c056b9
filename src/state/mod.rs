//! State hooks: typed views over the shared cache for each screen of the client.

pub mod board;
pub mod project;
pub mod settings;

pub use board::{BoardColumn, TodoBoard};
pub use project::ProjectDetails;
pub use settings::SettingsStore;
