//! Rust library for controlling Cloud Electronics DCM1 zone mixers
//!
//! The DCM1 is an 8-zone, 8-source audio mixer controlled over a serial
//! line, usually exposed as a TCP socket by a serial-to-IP bridge. This
//! library keeps one persistent connection open and provides:
//!
//! - Zone source selection, volume, mute and three-band EQ
//! - A mirror of device state, updated only by device confirmations
//! - Listener callbacks and a broadcast subscription for state changes
//! - Paced, prioritised command dispatch with EQ debouncing
//! - A 60 second heartbeat to catch front panel changes
//! - Automatic reconnection with a full state resync
//!
//! # Quick Start
//!
//! ```no_run
//! use cloud_dcm1::{Dcm1Mixer, LoggingListener, MixerConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mixer = Dcm1Mixer::new(MixerConfig::new("192.168.1.50", 4999));
//!     mixer.register_listener(Arc::new(LoggingListener));
//!     mixer.connect().await?;
//!
//!     // Labels and zone state arrive over the first few seconds
//!     mixer.wait_for_zone_data(Duration::from_secs(12)).await;
//!
//!     if let Some(zone) = mixer.zone(1) {
//!         println!("{} at level {:?}", zone.name(), zone.volume_level());
//!         zone.set_volume(20)?;
//!     }
//!
//!     // Subscribe to confirmed changes
//!     let mut events = mixer.subscribe();
//!     if let Ok(event) = events.recv().await {
//!         println!("Event: {:?}", event);
//!     }
//!
//!     mixer.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Protocol**: tag encoding and tolerant response decoding
//! - **State**: the device mirror and its update rules
//! - **Queue**: user/poll lanes and write pacing
//! - **Connection**: socket ownership, reader/writer loops, reconnection
//! - **Client**: the public command and query surface

mod client;
mod config;
mod connection;
mod debounce;
mod error;
mod heartbeat;
mod listener;
mod protocol;
mod queue;
mod state;
mod subscription;
mod types;
mod zone;

// Public exports
pub use client::Dcm1Mixer;
pub use config::{MixerConfig, DEFAULT_PORT, RECONNECT_FLOOR};
pub use connection::startup_queries;
pub use error::{Dcm1Error, Result};
pub use heartbeat::heartbeat_queries;
pub use listener::{ListenerId, LoggingListener, MixerListener};
pub use protocol::{decode, Command, FrameBuffer, ParseFailure, Response};
pub use queue::{CommandQueue, Pacer, QueuedCommand};
pub use state::MixerState;
pub use subscription::{MixerEvent, StateReceiver};
pub use types::{
    source_ids, zone_ids, ConnectionState, EqParameter, EqSettings, Priority, Source, SourceId,
    VolumeLevel, Zone, ZoneId, EQ_MAX, EQ_MIN, MAX_VOLUME_LEVEL, MUTE_LEVEL, SOURCE_COUNT,
    ZONE_COUNT,
};
pub use zone::ZoneControl;
