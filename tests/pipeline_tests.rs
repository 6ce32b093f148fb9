//! End-to-end harness runs over recorded traffic.
//!
//! The capture side replays a savefile; the probe goes to a local UDP
//! listener so nothing leaves the host.

mod support;

#[cfg(test)]
mod tests {
    use super::support::{mixed_traffic, write_pcap, Frame, PAYLOAD};
    use capprobe::capture::{CaptureSession, FileCapture};
    use capprobe::{Harness, HarnessConfig, PassPolicy, Verdict};
    use std::net::Ipv4Addr;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::net::UdpSocket;

    async fn local_target() -> (UdpSocket, HarnessConfig) {
        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = HarnessConfig::default()
            .with_target("127.0.0.1", port)
            .with_filter("host 8.8.8.8 && port 9")
            .with_deadline(Duration::from_secs(10));
        (listener, config)
    }

    fn session_for(dir: &TempDir, frames: &[Frame], filter: &str) -> CaptureSession {
        let path = dir.path().join("replay.pcap");
        write_pcap(&path, frames).unwrap();
        let source = FileCapture::open(path.to_str().unwrap()).unwrap();
        CaptureSession::new(Box::new(source), filter).unwrap()
    }

    #[tokio::test]
    async fn test_matching_traffic_passes() {
        let dir = TempDir::new().unwrap();
        let (_listener, config) = local_target().await;
        let session = session_for(&dir, &mixed_traffic(), &config.filter_expression());

        let report = Harness::new(config).run_session(session).await.unwrap();

        assert_eq!(report.verdict, Verdict::Pass);
        assert_eq!(report.packets_seen, 1);
        assert!(report.elapsed < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_no_matching_traffic_fails_at_end_of_file() {
        let dir = TempDir::new().unwrap();
        let (_listener, config) = local_target().await;
        let frames = vec![Frame::udp(1, Ipv4Addr::new(1, 1, 1, 1), 53, PAYLOAD)];
        let session = session_for(&dir, &frames, &config.filter_expression());

        let report = Harness::new(config.with_policy(PassPolicy::UntilDeadline))
            .run_session(session)
            .await
            .unwrap();

        assert_eq!(report.verdict, Verdict::Fail);
        assert_eq!(report.packets_seen, 0);
        assert!(report.stream_closed);
    }

    #[tokio::test]
    async fn test_probe_reaches_listener_during_run() {
        let dir = TempDir::new().unwrap();
        let (listener, config) = local_target().await;
        let session = session_for(&dir, &mixed_traffic(), &config.filter_expression());

        Harness::new(config).run_session(session).await.unwrap();

        let mut buf = [0u8; 64];
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), listener.recv_from(&mut buf))
            .await
            .expect("probe datagram not received")
            .unwrap();
        assert_eq!(&buf[..n], PAYLOAD);
    }
}
