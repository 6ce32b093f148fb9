#[cfg(test)]
mod tests {
    use capprobe::{ProbeError, Prober};
    use std::time::Duration;
    use tokio::net::UdpSocket;

    const PAYLOAD: &[u8] = b"test packet, please ignore";

    #[tokio::test]
    async fn test_probe_delivers_payload_once() {
        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let prober = Prober::new(addr.to_string(), PAYLOAD);
        let receipt = prober.probe().await.unwrap();
        assert_eq!(receipt.destination, addr);
        assert_eq!(receipt.bytes, PAYLOAD.len());

        let mut buf = [0u8; 64];
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), listener.recv_from(&mut buf))
            .await
            .expect("probe datagram not received")
            .unwrap();
        assert_eq!(&buf[..n], PAYLOAD);
    }

    #[tokio::test]
    async fn test_spawned_probe_reports_success() {
        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let signal = Prober::new(addr.to_string(), PAYLOAD).spawn();
        let outcome = signal.await.expect("prober dropped its signal");
        assert!(outcome.is_ok());
    }

    #[tokio::test]
    async fn test_spawned_probe_reports_resolution_failure() {
        // No port: rejected by the resolver without touching the network
        let signal = Prober::new("not-an-address", PAYLOAD).spawn();
        let outcome = signal.await.expect("prober dropped its signal");
        match outcome {
            Err(ProbeError::Resolve { target, .. }) => assert_eq!(target, "not-an-address"),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
