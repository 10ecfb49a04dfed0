// src/error.rs
//! Error types for the AODV engine.
//!
//! - `PacketError`: wire decode failures (malformed packets)
//! - `RouteError`: outcomes surfaced to the sender of a data packet
//! - `ConfigError`: rejected configuration

/// A control packet that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    #[error("empty packet")]
    Empty,

    #[error("unknown message type: {0}")]
    UnknownType(u8),

    #[error("packet too short for {header}: need {min} bytes, got {actual}")]
    TooShort {
        header: &'static str,
        min: usize,
        actual: usize,
    },
}

/// Why a data packet could not be (or has not yet been) routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("no route yet, packet buffered")]
    NoRouteYet,

    #[error("destination unreachable")]
    DestinationUnreachable,

    #[error("request queue full")]
    QueueFull,

    #[error("queued packet timed out")]
    QueueTimeout,

    #[error("no interface available")]
    NoInterface,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {field} {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}
