//! Capture-verification harness: listen, probe, and race the deadline

pub mod report;

pub use report::{Phase, ProbeStatus, Report, Verdict};

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::capture::{CaptureSession, CapturedPacket};
use crate::config::{HarnessConfig, PassPolicy};
use crate::error::{ProbeError, SetupError};
use crate::probe::{ProbeSignal, Prober};

pub struct Harness {
    config: HarnessConfig,
    cancel: CancellationToken,
}

impl Harness {
    pub fn new(config: HarnessConfig) -> Self {
        Harness {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Share a token so an outside signal can interrupt the run
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Open a live session per the config and run the probe against it.
    /// Setup failures are returned as errors; a missed probe is a `Fail` report.
    pub async fn run(&self) -> Result<Report, SetupError> {
        tracing::debug!("{:?}", Phase::Starting);
        let session = CaptureSession::open(&self.config.capture, &self.config.filter_expression())?;
        self.run_session(session).await
    }

    /// Run the probe against an already-filtered session, then close it
    pub async fn run_session(&self, mut session: CaptureSession) -> Result<Report, SetupError> {
        let mut packets = session.packets()?;
        let probe = Prober::new(self.config.target(), self.config.payload.clone()).spawn();

        let mut report = self.watch(&mut packets, probe).await;

        drop(packets);
        report.stats = session.close().await;
        Ok(report)
    }

    /// Race packets, the probe's completion signal, the deadline and
    /// cancellation until a verdict is reached.
    pub async fn watch(
        &self,
        packets: &mut mpsc::Receiver<CapturedPacket>,
        mut probe: ProbeSignal,
    ) -> Report {
        let config = &self.config;
        let started = Instant::now();
        let deadline = tokio::time::sleep(config.deadline);
        tokio::pin!(deadline);

        let mut phase = transition(Phase::Starting, Phase::Listening);
        let mut probe_pending = true;
        let mut report = Report {
            verdict: Verdict::Fail,
            packets_seen: 0,
            probe: ProbeStatus::Pending,
            elapsed: Default::default(),
            deadline_shortened: false,
            stream_closed: false,
            stats: None,
        };

        let verdict = loop {
            tokio::select! {
                packet = packets.recv() => match packet {
                    Some(packet) => {
                        report.packets_seen += 1;
                        tracing::info!("captured packet: {}", packet);
                        if config.policy == PassPolicy::FirstPacket {
                            break Verdict::Pass;
                        }
                    }
                    None => {
                        tracing::warn!("capture stream closed after {} packets", report.packets_seen);
                        report.stream_closed = true;
                        break Verdict::from_count(report.packets_seen);
                    }
                },

                outcome = &mut probe, if probe_pending => {
                    probe_pending = false;
                    match outcome.unwrap_or_else(|_| Err(ProbeError::Vanished)) {
                        Ok(receipt) => {
                            tracing::info!("{:?}: packet sent to {}", started.elapsed(), receipt.destination);
                            phase = transition(phase, Phase::ProbeSent);
                            if config.fast {
                                let shortened = Instant::now() + config.fast_deadline;
                                if shortened < deadline.deadline() {
                                    deadline.as_mut().reset(shortened);
                                    report.deadline_shortened = true;
                                    tracing::debug!("deadline shortened to {:?}", config.fast_deadline);
                                }
                            }
                            report.probe = ProbeStatus::Sent(receipt);
                        }
                        Err(e) => {
                            tracing::error!("probe failed: {}", e);
                            report.probe = ProbeStatus::Failed(e);
                        }
                    }
                },

                _ = &mut deadline => {
                    if report.packets_seen == 0 {
                        tracing::info!("{:?}: no packets received, timing out", started.elapsed());
                    }
                    break Verdict::from_count(report.packets_seen);
                },

                _ = self.cancel.cancelled() => {
                    tracing::warn!("run interrupted");
                    break Verdict::Interrupted;
                }
            }
        };

        transition(phase, Phase::Done);
        report.verdict = verdict;
        report.elapsed = started.elapsed();
        tracing::info!(
            "verdict: {} ({} packets in {:?})",
            report.verdict,
            report.packets_seen,
            report.elapsed
        );
        report
    }
}

fn transition(from: Phase, to: Phase) -> Phase {
    tracing::debug!("{:?} -> {:?}", from, to);
    to
}
