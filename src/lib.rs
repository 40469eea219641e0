//! pktwatch - turns captured frames into protocol-aware events.
//!
//! Frames from a live interface or a capture file are decoded, grouped into
//! flows and handed to protocol analyzers (ICMP, TCP, UDP/DHCPv4). Analyzers
//! and the flow tracker produce [`domain::ProtocolEvent`]s for a
//! [`reporter::Publisher`]. A [`beater::Supervisor`] runs the session in
//! standalone or managed mode.

pub mod beater;
pub mod capture;
pub mod community_id;
pub mod config;
pub mod decoder;
pub mod domain;
pub mod error;
pub mod flows;
pub mod protos;
pub mod reporter;
pub mod thread;

pub use beater::{StopHandle, Supervisor};
pub use config::Config;
pub use error::SessionError;
