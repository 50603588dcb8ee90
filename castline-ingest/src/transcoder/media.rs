use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use castline_rtmp::flv::FlvTag;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio::sync::Notify;

/// Bounded queue of FLV tags from a session's read loop to its encoder.
///
/// The read loop never waits on the encoder: frames that do not fit are
/// dropped and counted. Sequence headers that do not fit are parked, one
/// per media kind, and handed over once the queued frames are consumed.
/// While a header is parked, later frames are dropped so the encoder never
/// sees them ahead of their codec configuration.
pub fn media_channel(capacity: usize) -> (MediaSender, MediaReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let shared = Arc::new(Shared::default());
    (
        MediaSender {
            tx,
            shared: Arc::clone(&shared),
        },
        MediaReceiver { rx, shared },
    )
}

#[derive(Default)]
struct Shared {
    parked: Mutex<VecDeque<FlvTag>>,
    wake: Notify,
    dropped: Arc<AtomicU64>,
}

impl Shared {
    fn take_parked(&self) -> Option<FlvTag> {
        self.parked.lock().pop_front()
    }

    fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Clone)]
pub struct MediaSender {
    tx: mpsc::Sender<FlvTag>,
    shared: Arc<Shared>,
}

impl MediaSender {
    /// Queues `tag` without waiting. Returns false once the receiving job
    /// is gone.
    pub fn send(&self, tag: FlvTag) -> bool {
        if self.tx.is_closed() {
            return false;
        }
        let mut parked = self.shared.parked.lock();
        if !parked.is_empty() {
            if tag.is_sequence_header() {
                park(&mut parked, tag);
            } else {
                self.shared.record_drop();
            }
            return true;
        }
        match self.tx.try_send(tag) {
            Ok(()) => true,
            Err(TrySendError::Full(tag)) if tag.is_sequence_header() => {
                park(&mut parked, tag);
                drop(parked);
                self.shared.wake.notify_one();
                true
            }
            Err(TrySendError::Full(_)) => {
                self.shared.record_drop();
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

fn park(parked: &mut VecDeque<FlvTag>, tag: FlvTag) {
    parked.retain(|held| held.kind != tag.kind);
    parked.push_back(tag);
}

pub struct MediaReceiver {
    rx: mpsc::Receiver<FlvTag>,
    shared: Arc<Shared>,
}

impl MediaReceiver {
    /// Next tag in publish order. Cancel safe.
    pub async fn recv(&mut self) -> Option<FlvTag> {
        loop {
            match self.rx.try_recv() {
                Ok(tag) => return Some(tag),
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => return self.shared.take_parked(),
            }
            if let Some(tag) = self.shared.take_parked() {
                return Some(tag);
            }
            tokio::select! {
                tag = self.rx.recv() => match tag {
                    Some(tag) => return Some(tag),
                    None => return self.shared.take_parked(),
                },
                () = self.shared.wake.notified() => {}
            }
        }
    }

    /// Counts a frame the job consumed but could not hand to an encoder.
    pub fn record_drop(&self) {
        self.shared.record_drop();
    }

    pub(crate) fn dropped_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.shared.dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use castline_rtmp::flv::MediaKind;
    use std::time::Duration;

    fn frame() -> FlvTag {
        FlvTag::new(MediaKind::Video, 0, Bytes::from_static(&[0x27, 0x01]))
    }

    fn avc_header(version: u8) -> FlvTag {
        FlvTag::new(
            MediaKind::Video,
            0,
            Bytes::copy_from_slice(&[0x17, 0x00, 0, 0, 0, version]),
        )
    }

    fn aac_header() -> FlvTag {
        FlvTag::new(MediaKind::Audio, 0, Bytes::from_static(&[0xaf, 0x00, 0x12, 0x10]))
    }

    #[tokio::test]
    async fn test_full_queue_drops_frames() {
        let (tx, mut rx) = media_channel(2);
        for _ in 0..5 {
            assert!(tx.send(frame()));
        }
        assert_eq!(tx.dropped(), 3);
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_full_queue_never_blocks_sequence_headers() {
        let (tx, mut rx) = media_channel(1);
        assert!(tx.send(frame()));

        // nobody is reading; none of these may wait
        assert!(tx.send(avc_header(1)));
        assert!(tx.send(aac_header()));
        assert!(tx.send(avc_header(2)));
        assert!(tx.send(frame()));
        assert_eq!(tx.dropped(), 1);

        assert_eq!(rx.recv().await.unwrap(), frame());
        assert_eq!(rx.recv().await.unwrap(), aac_header());
        assert_eq!(rx.recv().await.unwrap(), avc_header(2));

        assert!(tx.send(frame()));
        assert_eq!(rx.recv().await.unwrap(), frame());
    }

    #[tokio::test]
    async fn test_parked_header_follows_queued_frames() {
        let (tx, mut rx) = media_channel(1);
        assert!(tx.send(frame()));
        assert!(tx.send(avc_header(1)));

        assert_eq!(rx.recv().await.unwrap(), frame());
        let next = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert_eq!(next.unwrap(), avc_header(1));
    }

    #[tokio::test]
    async fn test_parked_header_survives_sender_drop() {
        let (tx, mut rx) = media_channel(1);
        assert!(tx.send(frame()));
        assert!(tx.send(avc_header(1)));
        drop(tx);

        assert_eq!(rx.recv().await.unwrap(), frame());
        assert_eq!(rx.recv().await.unwrap(), avc_header(1));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_closed_receiver() {
        let (tx, rx) = media_channel(4);
        drop(rx);
        assert!(!tx.send(frame()));
        assert!(!tx.send(avc_header(1)));
    }
}
