//! Live and offline packet capture

pub mod session;
pub mod source;

pub use session::CaptureSession;
pub use source::{
    link_type_name, list_devices, pick_interface, select_interface, validate_filter,
    CaptureStats, CapturedPacket, FileCapture, LiveCapture, PacketSource, ReadEvent,
};
