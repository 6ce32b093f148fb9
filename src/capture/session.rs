use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use super::source::{
    link_type_name, select_interface, CaptureStats, CapturedPacket, LiveCapture, PacketSource,
    ReadEvent,
};
use crate::config::CaptureConfig;
use crate::error::SetupError;

/// Packets buffered between the blocking reader and the consumer
const PACKET_BUFFER: usize = 1024;
const FULL_BACKOFF: Duration = Duration::from_millis(5);

/// A filtered capture source plus the reader that drains it.
///
/// The session owns the capture handle. Once `packets()` starts the reader,
/// the handle lives on the blocking reader task and comes back only when that
/// task exits, so the handle is never closed while a read is in flight.
pub struct CaptureSession {
    info: String,
    source: Option<Box<dyn PacketSource>>,
    reader: Option<Reader>,
}

struct Reader {
    stop: Arc<AtomicBool>,
    task: JoinHandle<Box<dyn PacketSource>>,
}

impl CaptureSession {
    /// Select the interface, open it live and install `filter`
    pub fn open(config: &CaptureConfig, filter: &str) -> Result<Self, SetupError> {
        let interface = select_interface(&config.interface)?;
        tracing::info!("starting capture on interface {:?}", interface);

        let source = LiveCapture::open(&interface, config)?;
        let session = Self::new(Box::new(source), filter)?;
        tracing::info!("capturing on {:?} with filter {:?}", interface, filter);
        Ok(session)
    }

    /// Wrap an already-open source. The filter is installed before any read;
    /// on failure the source is dropped and its handle released.
    pub fn new(mut source: Box<dyn PacketSource>, filter: &str) -> Result<Self, SetupError> {
        source.set_filter(filter)?;
        Ok(CaptureSession {
            info: source.source_info().to_string(),
            source: Some(source),
            reader: None,
        })
    }

    pub fn source_info(&self) -> &str {
        &self.info
    }

    /// Start reading. Each accepted frame is delivered once, in capture order.
    /// The channel closes when the source ends, errors, or the session is closed.
    pub fn packets(&mut self) -> Result<mpsc::Receiver<CapturedPacket>, SetupError> {
        let mut source = self
            .source
            .take()
            .ok_or_else(|| SetupError::ReaderStarted(self.info.clone()))?;

        let (tx, rx) = mpsc::channel(PACKET_BUFFER);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = Arc::clone(&stop);

        tracing::debug!(
            "starting packet reader on {} (link type {})",
            self.info,
            link_type_name(source.link_type())
        );
        let task = tokio::task::spawn_blocking(move || {
            read_loop(source.as_mut(), &tx, &stop_clone);
            source
        });

        self.reader = Some(Reader { stop, task });
        Ok(rx)
    }

    /// Stop the reader, wait for it to exit, then release the handle.
    /// Returns libpcap statistics when the source keeps them.
    pub async fn close(mut self) -> Option<CaptureStats> {
        let source = match self.reader.take() {
            Some(reader) => {
                reader.stop.store(true, Ordering::SeqCst);
                match reader.task.await {
                    Ok(source) => Some(source),
                    Err(e) => {
                        tracing::warn!("packet reader on {} did not exit cleanly: {}", self.info, e);
                        None
                    }
                }
            }
            None => self.source.take(),
        };

        let mut source = source?;
        let stats = source.stats();
        if let Some(s) = &stats {
            tracing::debug!(
                "{}: {} received, {} dropped, {} dropped by interface",
                self.info,
                s.packets_received,
                s.packets_dropped,
                s.interface_dropped
            );
        }
        drop(source);
        tracing::debug!("released capture handle on {}", self.info);
        stats
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        // Without close(), the reader still exits at its next read slice
        // and drops the handle on its own thread.
        if let Some(reader) = &self.reader {
            reader.stop.store(true, Ordering::SeqCst);
        }
    }
}

fn read_loop(source: &mut dyn PacketSource, tx: &mpsc::Sender<CapturedPacket>, stop: &AtomicBool) {
    let mut forwarded = 0u64;

    while !stop.load(Ordering::SeqCst) {
        match source.next_packet() {
            Ok(ReadEvent::Packet(packet)) => {
                if !forward(tx, packet, stop) {
                    break;
                }
                forwarded += 1;
            }
            Ok(ReadEvent::Idle) => continue,
            Ok(ReadEvent::Finished) => {
                tracing::debug!("{}: end of capture", source.source_info());
                break;
            }
            Err(e) => {
                tracing::warn!("{:#}", e);
                break;
            }
        }
    }

    tracing::debug!("packet reader on {} exiting after {} packets", source.source_info(), forwarded);
}

/// Returns false once the consumer is gone or a stop was requested.
/// Polls with `try_send` rather than `blocking_send` so a full channel whose
/// consumer stopped reading cannot keep the reader (and the handle) alive
/// past `close()`.
fn forward(tx: &mpsc::Sender<CapturedPacket>, packet: CapturedPacket, stop: &AtomicBool) -> bool {
    let mut pending = packet;
    loop {
        match tx.try_send(pending) {
            Ok(()) => return true,
            Err(TrySendError::Closed(_)) => return false,
            Err(TrySendError::Full(packet)) => {
                if stop.load(Ordering::SeqCst) {
                    return false;
                }
                pending = packet;
                std::thread::sleep(FULL_BACKOFF);
            }
        }
    }
}
