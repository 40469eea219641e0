//! Error types for the capture pipeline.
//!
//! Each layer owns its error enum. Decode problems (`ParseError`) stay inside
//! the analyzers; capture and configuration problems travel up to the
//! supervisor wrapped in [`SessionError`].

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by a capture source.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Interface not found: {0}")]
    InterfaceNotFound(String),

    #[error("Insufficient permissions to capture packets (try running as root)")]
    InsufficientPermissions,

    #[error("Failed to create capture channel: {0}")]
    ChannelCreation(String),

    #[error("Capture I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Capture file {path:?}: {message}")]
    File { path: PathBuf, message: String },

    #[error("Failed to read packet: {0}")]
    Read(String),

    #[error("Unsupported link type: {0}")]
    UnsupportedLinkType(String),

    #[error("No capture device or file configured")]
    NoSource,
}

/// Errors raised while decoding a header or application payload.
///
/// These never stop the pipeline; they end up in a counter or in a
/// `status: Error` event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("packet too short: expected at least {expected} bytes, got {actual}")]
    PacketTooShort { expected: usize, actual: usize },

    #[error("invalid DHCP magic cookie")]
    InvalidMagicCookie,

    #[error("invalid option at offset {offset}: {message}")]
    InvalidOption { offset: usize, message: String },

    #[error("truncated {layer} header")]
    TruncatedHeader { layer: &'static str },

    #[error("unsupported {layer}: {value}")]
    Unsupported { layer: &'static str, value: String },

    #[error("non-initial IP fragment")]
    Fragment,
}

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Unknown config key: {0}")]
    UnknownKey(String),

    #[error("Protocol {protocol}: {message}")]
    Protocol {
        protocol: &'static str,
        message: String,
    },
}

/// Errors raised by an event publisher.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Reporter for {0} could not be created: {1}")]
    Create(String, String),
}

/// Errors raised by the capture thread scheduler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AffinityError {
    #[error("capture thread is no longer running")]
    ThreadGone,

    #[error("function panicked on the capture thread")]
    Panicked,

    #[error("failed to spawn capture thread: {0}")]
    Spawn(String),
}

/// Fatal outcome of a capture session, reported to the supervisor.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("publisher error: {0}")]
    Publish(#[from] PublishError),

    #[error("capture thread error: {0}")]
    Affinity(#[from] AffinityError),

    #[error("failed to start session thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("session thread panicked")]
    Panicked,
}
