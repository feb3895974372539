//! # Audio Module
//!
//! Per-guild playback engine: each guild gets one [`player::Player`] whose
//! dedicated worker streams pre-encoded opus packets to a voice connection.
//!
//! ## Architecture
//!
//! ### [`registry`] - Player Registry
//! - Lazily creates one player per guild, safe under concurrent first access
//!
//! ### [`player`] - Audio Player
//! - Control API (play, pause, resume, next, previous, ...) over bounded queues
//! - Worker task running the playback state machine, supervised with backoff
//!
//! ### [`state`] / [`snapshot`] - Playback State
//! - Transition table `(state, event) -> (state, stream action)`
//! - Playlist, position, loop flag and sink behind a single lock
//!
//! ### [`codec`] - Frame Codec
//! - Fixed 20 ms PCM frames in, length-prefixed opus packets out
//!
//! ## Audio Quality
//!
//! - **Sample Rate**: 48kHz (Discord standard)
//! - **Bit Depth**: 16-bit signed integers
//! - **Channels**: Mono
//! - **Encoding**: Opus at 96kbps (configurable)
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use jukebox::{audio::{registry::Registry, sink::VoiceConnection}, config::Config};
//! use serenity::model::id::GuildId;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let registry = Registry::new(Arc::new(Config::load()?));
//! let player = registry.player(GuildId::new(123456789));
//!
//! let (connection, _packets) = VoiceConnection::new(4);
//! player.set_voice_connection(Arc::new(connection)).await;
//!
//! // Play a track
//! player.play("https://example.com/song", "./data/song.dca").await;
//!
//! // Control playback
//! player.pause().await;
//! player.resume().await;
//! player.next().await;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod player;
pub mod registry;
pub mod sink;
pub mod snapshot;
pub mod state;

pub use player::{Player, PlayerError};
pub use registry::Registry;
pub use state::{PlayerState, Signal};
