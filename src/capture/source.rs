use anyhow::{Context, Result};
use pcap::{Capture, Linktype};
use std::fmt;
use std::time::Duration;

use crate::config::{CaptureConfig, InterfaceSelection};
use crate::error::SetupError;

/// Common interface for packet capture backends
pub trait PacketSource: Send {
    /// Compile and install a BPF filter
    fn set_filter(&mut self, expression: &str) -> Result<(), SetupError>;

    /// Read next packet from source
    fn next_packet(&mut self) -> Result<ReadEvent>;

    /// Get human-readable source description (interface name or file path)
    fn source_info(&self) -> &str;

    /// Whether source is finite (file) vs continuous (interface)
    fn is_finite(&self) -> bool;

    fn link_type(&self) -> Linktype;

    /// Optional: Get capture statistics (when available)
    fn stats(&mut self) -> Option<CaptureStats> {
        None // Default: no stats
    }
}

/// Result of one read attempt
#[derive(Debug)]
pub enum ReadEvent {
    Packet(CapturedPacket),
    /// Read timeout slice elapsed with nothing captured
    Idle,
    /// Source has no more packets (end of file)
    Finished,
}

/// Statistics reported by libpcap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureStats {
    pub packets_received: u64,
    pub packets_dropped: u64,
    pub interface_dropped: u64,
}

/// A frame accepted by the filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedPacket {
    pub data: Vec<u8>,
    /// Length on the wire; may exceed `data.len()` when truncated by snaplen
    pub original_len: u32,
    pub link_type: Linktype,
    /// Capture time since the Unix epoch
    pub timestamp: Duration,
}

impl CapturedPacket {
    fn from_pcap(packet: &pcap::Packet<'_>, link_type: Linktype) -> Self {
        let ts = packet.header.ts;
        let secs = u64::try_from(ts.tv_sec).unwrap_or(0);
        let micros = u64::try_from(ts.tv_usec).unwrap_or(0);
        CapturedPacket {
            data: packet.data.to_vec(),
            original_len: packet.header.len,
            link_type,
            timestamp: Duration::from_secs(secs) + Duration::from_micros(micros),
        }
    }

    pub fn is_truncated(&self) -> bool {
        (self.data.len() as u64) < u64::from(self.original_len)
    }
}

impl fmt::Display for CapturedPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} bytes captured ({} on wire), link type {}, ts {}.{:06}",
            self.data.len(),
            self.original_len,
            link_type_name(self.link_type),
            self.timestamp.as_secs(),
            self.timestamp.subsec_micros()
        )?;
        if self.is_truncated() {
            f.write_str(" [truncated]")?;
        }
        Ok(())
    }
}

/// libpcap's name for a link type, e.g. `EN10MB`
pub fn link_type_name(link_type: Linktype) -> String {
    link_type
        .get_name()
        .unwrap_or_else(|_| format!("DLT_{}", link_type.0))
}

pub fn list_devices() -> Result<Vec<String>, SetupError> {
    let devices = pcap::Device::list().map_err(SetupError::DeviceList)?;
    Ok(devices.into_iter().map(|d| d.name).collect())
}

/// Resolve the interface to capture on, enumerating devices only for `Auto`
pub fn select_interface(selection: &InterfaceSelection) -> Result<String, SetupError> {
    match selection {
        InterfaceSelection::Named(name) => Ok(name.clone()),
        InterfaceSelection::Auto => pick_interface(selection, &list_devices()?),
    }
}

/// Pure selection rule: a named interface wins, otherwise the first device
pub fn pick_interface(
    selection: &InterfaceSelection,
    devices: &[String],
) -> Result<String, SetupError> {
    match selection {
        InterfaceSelection::Named(name) => Ok(name.clone()),
        InterfaceSelection::Auto => devices.first().cloned().ok_or(SetupError::NoInterface),
    }
}

/// Compile an expression without touching any device
pub fn validate_filter(expression: &str, link_type: Linktype) -> Result<(), SetupError> {
    let dead = Capture::dead(link_type).map_err(|source| SetupError::FilterSyntax {
        expression: expression.to_string(),
        source,
    })?;
    dead.compile(expression, true)
        .map(|_| ())
        .map_err(|source| SetupError::FilterSyntax {
            expression: expression.to_string(),
            source,
        })
}

fn install_filter<T: pcap::Activated + ?Sized>(
    handle: &mut Capture<T>,
    expression: &str,
) -> Result<(), SetupError> {
    handle
        .filter(expression, true)
        .map_err(|source| SetupError::FilterSyntax {
            expression: expression.to_string(),
            source,
        })
}

/// Live network interface capture
pub struct LiveCapture {
    handle: Capture<pcap::Active>,
    interface: String,
    link_type: Linktype,
}

impl LiveCapture {
    pub fn open(interface: &str, config: &CaptureConfig) -> Result<Self, SetupError> {
        let open_err = |source| SetupError::Open {
            interface: interface.to_string(),
            source,
        };
        let timeout_ms = i32::try_from(config.read_timeout.as_millis()).unwrap_or(i32::MAX);

        let handle = Capture::from_device(interface)
            .map_err(open_err)?
            .promisc(config.promisc)
            .snaplen(config.snaplen)
            .timeout(timeout_ms)
            .immediate_mode(config.immediate)
            .open()
            .map_err(open_err)?;
        let link_type = handle.get_datalink();

        tracing::debug!(
            "opened {} (snaplen {}, promisc {}, link type {})",
            interface,
            config.snaplen,
            config.promisc,
            link_type_name(link_type)
        );

        Ok(LiveCapture {
            handle,
            interface: interface.to_string(),
            link_type,
        })
    }
}

impl PacketSource for LiveCapture {
    fn set_filter(&mut self, expression: &str) -> Result<(), SetupError> {
        install_filter(&mut self.handle, expression)
    }

    fn next_packet(&mut self) -> Result<ReadEvent> {
        match self.handle.next_packet() {
            Ok(packet) => Ok(ReadEvent::Packet(CapturedPacket::from_pcap(&packet, self.link_type))),
            Err(pcap::Error::TimeoutExpired) => Ok(ReadEvent::Idle),
            Err(e) => Err(e).context(format!("failed to read packet on {}", self.interface)),
        }
    }

    fn source_info(&self) -> &str {
        &self.interface
    }

    fn is_finite(&self) -> bool {
        false // Network interface is continuous
    }

    fn link_type(&self) -> Linktype {
        self.link_type
    }

    fn stats(&mut self) -> Option<CaptureStats> {
        self.handle.stats().ok().map(|s| CaptureStats {
            packets_received: u64::from(s.received),
            packets_dropped: u64::from(s.dropped),
            interface_dropped: u64::from(s.if_dropped),
        })
    }
}

/// PCAP file capture (offline)
pub struct FileCapture {
    handle: Capture<pcap::Offline>,
    path: String,
    link_type: Linktype,
}

impl FileCapture {
    pub fn open(path: &str) -> Result<Self, SetupError> {
        let handle = Capture::from_file(path).map_err(|source| SetupError::OpenFile {
            path: path.to_string(),
            source,
        })?;
        let link_type = handle.get_datalink();

        Ok(FileCapture {
            handle,
            path: path.to_string(),
            link_type,
        })
    }
}

impl PacketSource for FileCapture {
    fn set_filter(&mut self, expression: &str) -> Result<(), SetupError> {
        install_filter(&mut self.handle, expression)
    }

    fn next_packet(&mut self) -> Result<ReadEvent> {
        match self.handle.next_packet() {
            Ok(packet) => Ok(ReadEvent::Packet(CapturedPacket::from_pcap(&packet, self.link_type))),
            Err(pcap::Error::NoMorePackets) => Ok(ReadEvent::Finished),
            Err(e) => Err(e).context(format!("failed to read packet from {}", self.path)),
        }
    }

    fn source_info(&self) -> &str {
        &self.path
    }

    fn is_finite(&self) -> bool {
        true // File has end
    }

    fn link_type(&self) -> Linktype {
        self.link_type
    }
}
