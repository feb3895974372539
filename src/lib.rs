pub mod audio;
pub mod config;
pub mod sources;

pub use audio::{Player, PlayerState, Registry};
pub use config::Config;
