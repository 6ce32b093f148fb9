//! Error types for capture setup and probing

use std::io;
use thiserror::Error;

/// Fatal errors raised before the harness starts listening.
#[derive(Error, Debug)]
pub enum SetupError {
    /// Auto-selection found no capture-capable device
    #[error("no interface specified and none found")]
    NoInterface,

    #[error("failed to list capture devices: {0}")]
    DeviceList(#[source] pcap::Error),

    /// Opening the live handle failed, usually for lack of privileges
    #[error("failed to open capture on '{interface}': {source}")]
    Open {
        interface: String,
        #[source]
        source: pcap::Error,
    },

    #[error("failed to open capture file '{path}': {source}")]
    OpenFile {
        path: String,
        #[source]
        source: pcap::Error,
    },

    /// The filter expression did not compile
    #[error("invalid filter expression '{expression}': {source}")]
    FilterSyntax {
        expression: String,
        #[source]
        source: pcap::Error,
    },

    /// `packets()` was called on a session whose reader already started
    #[error("packet reader already started for '{0}'")]
    ReaderStarted(String),
}

/// Failures of the background prober, reported back over its completion channel.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("failed to resolve probe destination '{target}': {source}")]
    Resolve {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("probe destination '{0}' resolved to no addresses")]
    NoAddress(String),

    #[error("probe socket error: {0}")]
    Socket(#[source] io::Error),

    #[error("short write: sent {sent} of {expected} bytes")]
    ShortWrite { sent: usize, expected: usize },

    /// The prober task went away without reporting
    #[error("prober exited without reporting an outcome")]
    Vanished,
}
