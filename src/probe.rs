//! One-shot UDP probe

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::UdpSocket;
use tokio::sync::oneshot;

use crate::error::ProbeError;

/// Outcome delivered on the completion channel, exactly once
pub type ProbeOutcome = Result<ProbeReceipt, ProbeError>;

/// Receiving half of the completion signal
pub type ProbeSignal = oneshot::Receiver<ProbeOutcome>;

/// Proof that the payload was handed to the network stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReceipt {
    pub destination: SocketAddr,
    pub bytes: usize,
}

#[derive(Debug, Clone)]
pub struct Prober {
    target: String,
    payload: Vec<u8>,
}

impl Prober {
    pub fn new(target: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Prober {
            target: target.into(),
            payload: payload.into(),
        }
    }

    /// Resolve the target (IPv4 preferred), send the payload once from an
    /// ephemeral port and let the socket drop.
    pub async fn probe(&self) -> ProbeOutcome {
        let destination = self.resolve().await?;

        let local: SocketAddr = if destination.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await.map_err(ProbeError::Socket)?;
        socket.connect(destination).await.map_err(ProbeError::Socket)?;

        let sent = socket.send(&self.payload).await.map_err(ProbeError::Socket)?;
        if sent != self.payload.len() {
            return Err(ProbeError::ShortWrite {
                sent,
                expected: self.payload.len(),
            });
        }

        tracing::debug!("sent {} byte probe to {}", sent, destination);
        Ok(ProbeReceipt {
            destination,
            bytes: sent,
        })
    }

    /// Run the probe on its own task. Success and failure both arrive on the
    /// returned channel; the task never aborts the process.
    pub fn spawn(self) -> ProbeSignal {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let outcome = self.probe().await;
            if tx.send(outcome).is_err() {
                tracing::debug!("probe outcome for {} dropped, harness already finished", self.target);
            }
        });
        rx
    }

    async fn resolve(&self) -> Result<SocketAddr, ProbeError> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host(self.target.as_str())
            .await
            .map_err(|source| ProbeError::Resolve {
                target: self.target.clone(),
                source,
            })?
            .collect();

        addrs
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| ProbeError::NoAddress(self.target.clone()))
    }
}
