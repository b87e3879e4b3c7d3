//! Bounded byte FIFO between the decoder subprocess and the relay loop
//!
//! Single producer (the decoder pump, one at a time), single consumer (the
//! relay tick). The consumer reads whole frames non-blockingly; the outcome
//! distinguishes "no data yet" from "no producer attached", which is what
//! the relay's end-of-input debounce keys off.

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Outcome of a non-blocking framed read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRead {
    /// A full frame of genuine data was read.
    Full,
    /// Fewer bytes than a frame were available; the producer likely
    /// finished mid-frame. Contains the byte count read.
    Partial(usize),
    /// Buffer empty and no producer attached: input is exhausted.
    Drained,
    /// Buffer empty but a producer is attached; data should arrive soon.
    Pending,
}

struct Shared {
    writers: AtomicUsize,
}

/// Create a frame buffer with the given byte capacity.
pub fn frame_buffer(capacity: usize) -> (FrameProducer, FrameConsumer) {
    let (prod, cons) = HeapRb::<u8>::new(capacity).split();
    let shared = Arc::new(Shared {
        writers: AtomicUsize::new(0),
    });
    (
        FrameProducer {
            inner: Arc::new(Mutex::new(prod)),
            shared: Arc::clone(&shared),
        },
        FrameConsumer {
            inner: Arc::new(Mutex::new(cons)),
            shared,
        },
    )
}

/// Producer half. Cloned by the FSM and lent to each decoder pump in turn;
/// a pump registers itself with [`FrameProducer::attach`] for the time it
/// is feeding the buffer.
#[derive(Clone)]
pub struct FrameProducer {
    inner: Arc<Mutex<HeapProd<u8>>>,
    shared: Arc<Shared>,
}

impl FrameProducer {
    /// Append as many bytes as fit; returns the accepted count.
    pub fn write(&self, bytes: &[u8]) -> usize {
        self.inner.lock().unwrap().push_slice(bytes)
    }

    /// Free space in bytes.
    pub fn vacant(&self) -> usize {
        self.inner.lock().unwrap().vacant_len()
    }

    /// Mark a producer as attached for the lifetime of the returned guard.
    pub fn attach(&self) -> WriterGuard {
        self.shared.writers.fetch_add(1, Ordering::Release);
        WriterGuard {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Attachment marker; dropping it detaches the producer.
pub struct WriterGuard {
    shared: Arc<Shared>,
}

impl Drop for WriterGuard {
    fn drop(&mut self) {
        self.shared.writers.fetch_sub(1, Ordering::Release);
    }
}

/// Consumer half, drained by the relay loop once per tick.
#[derive(Clone)]
pub struct FrameConsumer {
    inner: Arc<Mutex<HeapCons<u8>>>,
    shared: Arc<Shared>,
}

impl FrameConsumer {
    /// Try to read exactly one frame into `frame`, without blocking.
    ///
    /// On [`FrameRead::Partial`] only the returned count of leading bytes
    /// is valid; the caller pads the rest.
    pub fn read_frame(&self, frame: &mut [u8]) -> FrameRead {
        let mut cons = self.inner.lock().unwrap();
        let available = cons.occupied_len();
        if available == 0 {
            if self.shared.writers.load(Ordering::Acquire) == 0 {
                FrameRead::Drained
            } else {
                FrameRead::Pending
            }
        } else if available < frame.len() {
            let n = cons.pop_slice(&mut frame[..available]);
            FrameRead::Partial(n)
        } else {
            cons.pop_slice(frame);
            FrameRead::Full
        }
    }

    /// Discard all buffered bytes; returns the discarded count.
    pub fn flush(&self) -> usize {
        self.inner.lock().unwrap().clear()
    }

    /// Buffered bytes.
    pub fn occupied(&self) -> usize {
        self.inner.lock().unwrap().occupied_len()
    }
}
