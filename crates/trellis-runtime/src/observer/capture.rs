//! Bounded hand-off between hook callbacks and the delivery thread.
//!
//! The capture side never blocks and never performs I/O. When the queue
//! is full the oldest event is discarded; the delivery side notices the
//! hole in the sequence numbers and reports it as a gap.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use trellis_core::window::WindowTraits;
use trellis_core::{HookEvent, HookEventKind, SeqGap, WindowId};

/// An item produced by [`CaptureSink::drain`].
#[derive(Debug, Clone, PartialEq)]
pub enum Captured {
    /// Events in this range were dropped before they could be delivered.
    Gap(SeqGap),
    Event(HookEvent),
}

/// Cloneable handle the host's hook callbacks capture events into.
#[derive(Clone)]
pub struct CaptureSink {
    inner: Arc<Inner>,
}

struct Inner {
    tx: Sender<HookEvent>,
    // Held by the capture side too, so a full queue can evict its oldest entry.
    rx: Receiver<HookEvent>,
    next_seq: AtomicU64,
    dropped: AtomicU64,
    /// Highest sequence number returned by `drain`. Written by the
    /// delivery thread only.
    drained_up_to: AtomicU64,
}

impl CaptureSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                tx,
                rx,
                next_seq: AtomicU64::new(1),
                dropped: AtomicU64::new(0),
                drained_up_to: AtomicU64::new(0),
            }),
        }
    }

    /// Records an event and returns its sequence number.
    ///
    /// Never blocks: on overflow the oldest queued event is evicted.
    /// Titles are cut to [`MAX_TITLE_LEN`](trellis_core::event::MAX_TITLE_LEN) bytes.
    pub fn capture(&self, window: WindowId, kind: HookEventKind) -> u64 {
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let mut event = HookEvent::new(window, seq, kind.bounded());
        loop {
            match self.inner.tx.try_send(event) {
                Ok(()) => return seq,
                Err(TrySendError::Full(back)) => {
                    if self.inner.rx.try_recv().is_ok() {
                        self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    event = back;
                }
                Err(TrySendError::Disconnected(_)) => return seq,
            }
        }
    }

    /// Records an event only if the window is one the observer reports.
    pub fn capture_window(
        &self,
        window: WindowId,
        traits: WindowTraits,
        kind: HookEventKind,
    ) -> Option<u64> {
        traits.is_eligible().then(|| self.capture(window, kind))
    }

    /// Takes everything captured since the previous drain.
    ///
    /// Events come out in sequence order. A [`Captured::Gap`] precedes
    /// the first event after any missing sequence numbers. An event whose
    /// number was already covered by a reported gap (a capture thread
    /// that lost the race to a later one) is discarded.
    pub fn drain(&self) -> Vec<Captured> {
        let mut events: Vec<HookEvent> = self.inner.rx.try_iter().collect();
        events.sort_by_key(|e| e.seq);

        let mut last = self.inner.drained_up_to.load(Ordering::Relaxed);
        let mut out = Vec::with_capacity(events.len() + 1);
        for event in events {
            if event.seq <= last {
                continue;
            }
            if let Some(gap) = SeqGap::between(last, event.seq) {
                out.push(Captured::Gap(gap));
            }
            last = event.seq;
            out.push(Captured::Event(event));
        }
        self.inner.drained_up_to.store(last, Ordering::Relaxed);
        out
    }

    /// Number of events evicted on overflow so far.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    pub fn pending(&self) -> usize {
        self.inner.rx.len()
    }
}
