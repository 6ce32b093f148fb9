use std::fmt;
use std::time::Duration;

use crate::capture::CaptureStats;
use crate::error::ProbeError;
use crate::probe::ProbeReceipt;

/// Orchestrator states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Starting,
    Listening,
    ProbeSent,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// At least one matching packet was observed before the deadline
    Pass,
    Fail,
    Interrupted,
}

impl Verdict {
    pub fn from_count(packets_seen: u64) -> Self {
        if packets_seen > 0 {
            Verdict::Pass
        } else {
            Verdict::Fail
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verdict::Pass => "pass",
            Verdict::Fail => "fail",
            Verdict::Interrupted => "interrupted",
        })
    }
}

#[derive(Debug, Default)]
pub enum ProbeStatus {
    /// No completion signal before the run ended
    #[default]
    Pending,
    Sent(ProbeReceipt),
    Failed(ProbeError),
}

/// Summary of one harness run
#[derive(Debug)]
pub struct Report {
    pub verdict: Verdict,
    pub packets_seen: u64,
    pub probe: ProbeStatus,
    pub elapsed: Duration,
    /// Fast mode cut the deadline after the probe went out
    pub deadline_shortened: bool,
    /// The packet stream ended before the deadline
    pub stream_closed: bool,
    pub stats: Option<CaptureStats>,
}

impl Report {
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }

    pub fn probe_error(&self) -> Option<&ProbeError> {
        match &self.probe {
            ProbeStatus::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// 0 pass, 1 fail, 130 interrupted
    pub fn exit_code(&self) -> i32 {
        match self.verdict {
            Verdict::Pass => 0,
            Verdict::Fail => 1,
            Verdict::Interrupted => 130,
        }
    }
}
