pub mod capture;
pub mod config;
pub mod error;
pub mod harness;
pub mod probe;

pub use capture::{CaptureSession, CapturedPacket};
pub use config::{CaptureConfig, HarnessConfig, InterfaceSelection, PassPolicy};
pub use error::{ProbeError, SetupError};
pub use harness::{Harness, Report, Verdict};
pub use probe::{ProbeReceipt, Prober};
