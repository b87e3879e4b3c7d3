//! Output sinks fed by the relay loop
//!
//! Two independent consumers with different loss tolerances:
//! - the **direct sink** (raw stream relay) receives every tick's frame,
//!   silence included, and may drop frames under congestion;
//! - the **voice sink** (primary real-time transport) receives only
//!   genuine full frames, never padding or silence.

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Result of a non-blocking direct-sink write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkWrite {
    /// Frame accepted.
    Written,
    /// No consumer attached. Steady state, not an error.
    NotConnected,
    /// Consumer attached but not keeping up; the frame was dropped.
    Congested,
}

/// Continuous raw PCM consumer (stream relay, recorder, ...).
pub trait DirectSink: Send {
    fn try_write(&mut self, frame: &[u8]) -> SinkWrite;
}

/// Real-time voice transport. May be disconnected at any time;
/// the relay checks before every send.
pub trait VoiceSink: Send {
    fn is_connected(&self) -> bool;

    /// Send one full, volume-scaled frame.
    fn send(&mut self, frame: &[u8]);
}

/// Ring-buffered direct sink with an attachable tap on the far side.
///
/// The relay writes frames in; whoever serves the direct stream reads from
/// the [`DirectTap`] and flips its connected flag while a consumer exists.
pub struct RingDirectSink {
    buffer: Arc<Mutex<HeapProd<u8>>>,
    connected: Arc<AtomicBool>,
}

/// Consumer side of [`RingDirectSink`].
pub struct DirectTap {
    buffer: Arc<Mutex<HeapCons<u8>>>,
    connected: Arc<AtomicBool>,
}

impl RingDirectSink {
    pub fn new(capacity: usize) -> (Self, DirectTap) {
        let (prod, cons) = HeapRb::<u8>::new(capacity).split();
        let connected = Arc::new(AtomicBool::new(false));
        (
            Self {
                buffer: Arc::new(Mutex::new(prod)),
                connected: Arc::clone(&connected),
            },
            DirectTap {
                buffer: Arc::new(Mutex::new(cons)),
                connected,
            },
        )
    }
}

impl DirectSink for RingDirectSink {
    fn try_write(&mut self, frame: &[u8]) -> SinkWrite {
        if !self.connected.load(Ordering::Acquire) {
            return SinkWrite::NotConnected;
        }
        let mut prod = self.buffer.lock().unwrap();
        if prod.vacant_len() < frame.len() {
            return SinkWrite::Congested;
        }
        prod.push_slice(frame);
        SinkWrite::Written
    }
}

impl DirectTap {
    /// Mark a consumer as attached. While disconnected the relay skips the
    /// sink entirely and nothing accumulates.
    pub fn set_connected(&self, connected: bool) {
        if !connected {
            self.buffer.lock().unwrap().clear();
        }
        self.connected.store(connected, Ordering::Release);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Read up to `out.len()` buffered bytes; returns the count.
    pub fn read(&self, out: &mut [u8]) -> usize {
        self.buffer.lock().unwrap().pop_slice(out)
    }

    pub fn occupied(&self) -> usize {
        self.buffer.lock().unwrap().occupied_len()
    }
}

/// Voice sink that is never connected. Default wiring when no voice
/// transport is configured.
#[derive(Default)]
pub struct NullVoiceSink;

impl VoiceSink for NullVoiceSink {
    fn is_connected(&self) -> bool {
        false
    }

    fn send(&mut self, _frame: &[u8]) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnected_sink_drops_cleanly() {
        let (mut sink, tap) = RingDirectSink::new(64);
        assert_eq!(sink.try_write(&[1u8; 8]), SinkWrite::NotConnected);
        assert_eq!(tap.occupied(), 0);
    }

    #[test]
    fn test_connected_write_and_read() {
        let (mut sink, tap) = RingDirectSink::new(64);
        tap.set_connected(true);

        assert_eq!(sink.try_write(&[9u8; 8]), SinkWrite::Written);
        let mut out = [0u8; 8];
        assert_eq!(tap.read(&mut out), 8);
        assert_eq!(out, [9u8; 8]);
    }

    #[test]
    fn test_congestion_when_tap_stalls() {
        let (mut sink, tap) = RingDirectSink::new(8);
        tap.set_connected(true);

        assert_eq!(sink.try_write(&[1u8; 8]), SinkWrite::Written);
        assert_eq!(sink.try_write(&[2u8; 8]), SinkWrite::Congested);
    }

    #[test]
    fn test_disconnect_clears_backlog() {
        let (mut sink, tap) = RingDirectSink::new(16);
        tap.set_connected(true);
        assert_eq!(sink.try_write(&[1u8; 8]), SinkWrite::Written);

        tap.set_connected(false);
        assert_eq!(tap.occupied(), 0);
        assert_eq!(sink.try_write(&[1u8; 8]), SinkWrite::NotConnected);
    }
}
