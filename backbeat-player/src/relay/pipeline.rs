//! Fixed-cadence PCM relay loop
//!
//! Drains the frame buffer at exactly one frame per period, regardless of
//! what the producer is doing: real data when available, silence otherwise.
//! Playback rate is wall-clock time, not buffer occupancy, so a tick is
//! never skipped and never emits more than one frame.
//!
//! The loop runs on a dedicated OS thread so control-plane scheduling
//! (command handling, timers, database) cannot introduce audible jitter.

use crate::relay::frame_buffer::{FrameConsumer, FrameRead};
use crate::relay::sink::{DirectSink, SinkWrite, VoiceSink};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

/// Shared relay volume, linear gain in `[0.0, 2.0]`.
///
/// Stored as f32 bits in an atomic so the relay thread reads it lock-free.
#[derive(Clone)]
pub struct Volume(Arc<AtomicU32>);

impl Volume {
    pub fn new(gain: f32) -> Self {
        Self(Arc::new(AtomicU32::new(gain.clamp(0.0, 2.0).to_bits())))
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, gain: f32) {
        self.0.store(gain.clamp(0.0, 2.0).to_bits(), Ordering::Relaxed);
    }
}

/// Scale s16le PCM in place by a linear gain, saturating.
pub fn scale_frame(frame: &mut [u8], gain: f32) {
    for sample in frame.chunks_exact_mut(2) {
        let value = i16::from_le_bytes([sample[0], sample[1]]);
        let scaled = (value as f32 * gain).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        sample.copy_from_slice(&scaled.to_le_bytes());
    }
}

/// End-of-input notification debounce.
///
/// `Armed → Signaled` on a drained read, re-armed only when genuine data
/// flows again, so the player hears about each exhaustion run exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExhaustDebounce {
    Armed,
    Signaled,
}

/// Direct-sink congestion log debounce: one log line per episode,
/// not one per dropped frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CongestionState {
    Clear,
    Congested,
}

/// Per-tick relay state machine, separated from the timing loop so tests
/// can drive ticks directly.
pub struct RelayCore {
    consumer: FrameConsumer,
    direct: Box<dyn DirectSink>,
    voice: Box<dyn VoiceSink>,
    volume: Volume,
    exhausted_tx: mpsc::UnboundedSender<()>,

    frame_len: usize,
    ticks_per_second: u32,

    /// Remaining ticks of the post-underrun cooldown window
    buffering_cycles: u32,
    exhaust: ExhaustDebounce,
    congestion: CongestionState,
    scratch: Vec<u8>,
}

impl RelayCore {
    pub fn new(
        consumer: FrameConsumer,
        direct: Box<dyn DirectSink>,
        voice: Box<dyn VoiceSink>,
        volume: Volume,
        exhausted_tx: mpsc::UnboundedSender<()>,
        frame_len: usize,
        ticks_per_second: u32,
    ) -> Self {
        Self {
            consumer,
            direct,
            voice,
            volume,
            exhausted_tx,
            frame_len,
            ticks_per_second,
            buffering_cycles: 0,
            // starts signaled: an empty buffer at startup is not a song end
            exhaust: ExhaustDebounce::Signaled,
            congestion: CongestionState::Clear,
            scratch: Vec::new(),
        }
    }

    /// Run one relay tick: read (or substitute silence), fan out.
    pub fn tick(&mut self) {
        if self.scratch.len() != self.frame_len {
            self.scratch = vec![0u8; self.frame_len];
        }

        let mut data_len = 0usize;
        if self.buffering_cycles > 0 {
            trace!("buffering, {} cycles left", self.buffering_cycles);
            self.buffering_cycles -= 1;
            self.scratch.fill(0);
        } else {
            match self.consumer.read_frame(&mut self.scratch) {
                FrameRead::Full => {
                    data_len = self.frame_len;
                    self.exhaust = ExhaustDebounce::Armed;
                }
                FrameRead::Partial(n) => {
                    // Likely the tail of the input; pad and pass downstream.
                    // Cannot be told apart from mid-write truncation here.
                    data_len = n;
                    self.scratch[n..].fill(0);
                    debug!("frame padded with {} zero bytes, end of input?", self.frame_len - n);
                    self.exhaust = ExhaustDebounce::Armed;
                }
                FrameRead::Drained => {
                    if self.exhaust == ExhaustDebounce::Armed {
                        trace!("input exhausted, signalling player");
                        let _ = self.exhausted_tx.send(());
                        self.exhaust = ExhaustDebounce::Signaled;
                    }
                    self.scratch.fill(0);
                }
                FrameRead::Pending => {
                    self.scratch.fill(0);
                    warn!("frame buffer not ready, waiting one second");
                    self.buffering_cycles = self.ticks_per_second;
                }
            }
        }

        // Direct sink gets every frame, silence included, so the relayed
        // stream never starves. Congestion drops the frame.
        match self.direct.try_write(&self.scratch) {
            SinkWrite::Written | SinkWrite::NotConnected => {
                self.congestion = CongestionState::Clear;
            }
            SinkWrite::Congested => {
                if self.congestion == CongestionState::Clear {
                    error!("direct stream sink not keeping up, dropping frames");
                    self.congestion = CongestionState::Congested;
                }
            }
        }

        // Voice sink gets only genuine full frames, volume-scaled.
        if data_len == self.frame_len && self.voice.is_connected() {
            let gain = self.volume.get();
            if (gain - 1.0).abs() > f32::EPSILON {
                scale_frame(&mut self.scratch, gain);
            }
            self.voice.send(&self.scratch);
        }
    }

    fn shutdown_flush(&mut self) {
        let discarded = self.consumer.flush();
        debug!("relay stopped, {} buffered bytes discarded", discarded);
    }
}

/// Handle to the running relay thread.
pub struct Relay {
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
    volume: Volume,
}

impl Relay {
    /// Start the relay loop on its own thread at the given tick period.
    pub fn start(mut core: RelayCore, period: Duration) -> std::io::Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let volume = core.volume.clone();
        let thread_shutdown = Arc::clone(&shutdown);

        let handle = thread::Builder::new()
            .name("backbeat-relay".to_string())
            .spawn(move || {
                debug!("relay thread started, period {:?}", period);
                let mut next = Instant::now() + period;
                while !thread_shutdown.load(Ordering::Acquire) {
                    core.tick();
                    let now = Instant::now();
                    if next > now {
                        thread::sleep(next - now);
                    } else {
                        // Fell behind a whole period: resynchronize rather
                        // than bursting stale frames faster than real time.
                        next = now;
                    }
                    next += period;
                }
                core.shutdown_flush();
            })?;

        Ok(Self {
            shutdown,
            handle: Some(handle),
            volume,
        })
    }

    pub fn volume(&self) -> f32 {
        self.volume.get()
    }

    pub fn set_volume(&self, gain: f32) {
        self.volume.set(gain);
    }

    /// Signal the loop to exit, wait for the in-flight tick to finish and
    /// the buffered input to be discarded.
    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::frame_buffer::frame_buffer;
    use std::sync::Mutex;

    const FRAME: usize = 8;
    const TPS: u32 = 50;

    /// Direct sink recording every frame it accepts.
    struct RecordingDirect {
        frames: Arc<Mutex<Vec<Vec<u8>>>>,
        connected: bool,
        congested: bool,
    }

    impl DirectSink for RecordingDirect {
        fn try_write(&mut self, frame: &[u8]) -> SinkWrite {
            if !self.connected {
                return SinkWrite::NotConnected;
            }
            if self.congested {
                return SinkWrite::Congested;
            }
            self.frames.lock().unwrap().push(frame.to_vec());
            SinkWrite::Written
        }
    }

    struct RecordingVoice {
        frames: Arc<Mutex<Vec<Vec<u8>>>>,
        connected: bool,
    }

    impl VoiceSink for RecordingVoice {
        fn is_connected(&self) -> bool {
            self.connected
        }

        fn send(&mut self, frame: &[u8]) {
            self.frames.lock().unwrap().push(frame.to_vec());
        }
    }

    struct Harness {
        core: RelayCore,
        producer: crate::relay::frame_buffer::FrameProducer,
        direct_frames: Arc<Mutex<Vec<Vec<u8>>>>,
        voice_frames: Arc<Mutex<Vec<Vec<u8>>>>,
        exhausted_rx: mpsc::UnboundedReceiver<()>,
    }

    fn harness(direct_connected: bool, voice_connected: bool) -> Harness {
        let (producer, consumer) = frame_buffer(1024);
        let direct_frames = Arc::new(Mutex::new(Vec::new()));
        let voice_frames = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = mpsc::unbounded_channel();
        let core = RelayCore::new(
            consumer,
            Box::new(RecordingDirect {
                frames: Arc::clone(&direct_frames),
                connected: direct_connected,
                congested: false,
            }),
            Box::new(RecordingVoice {
                frames: Arc::clone(&voice_frames),
                connected: voice_connected,
            }),
            Volume::new(1.0),
            tx,
            FRAME,
            TPS,
        );
        Harness {
            core,
            producer,
            direct_frames,
            voice_frames,
            exhausted_rx: rx,
        }
    }

    fn signals(rx: &mut mpsc::UnboundedReceiver<()>) -> usize {
        let mut n = 0;
        while rx.try_recv().is_ok() {
            n += 1;
        }
        n
    }

    #[test]
    fn test_starved_relay_emits_one_silence_frame_per_tick() {
        let mut h = harness(true, true);
        for _ in 0..50 {
            h.core.tick();
        }
        let frames = h.direct_frames.lock().unwrap();
        assert_eq!(frames.len(), 50, "no tick may be skipped");
        assert!(frames.iter().all(|f| f.iter().all(|&b| b == 0)));
        // silence never reaches the voice sink
        assert!(h.voice_frames.lock().unwrap().is_empty());
    }

    #[test]
    fn test_startup_starvation_does_not_signal_exhaustion() {
        let mut h = harness(true, false);
        for _ in 0..10 {
            h.core.tick();
        }
        assert_eq!(signals(&mut h.exhausted_rx), 0);
    }

    #[test]
    fn test_exhaustion_signalled_once_per_run() {
        let mut h = harness(false, false);
        let guard = h.producer.attach();
        h.producer.write(&[1u8; FRAME]);
        h.core.tick(); // real data arms the debounce
        drop(guard);

        for _ in 0..5 {
            h.core.tick(); // drained
        }
        assert_eq!(signals(&mut h.exhausted_rx), 1);

        // data resumes, then runs out again
        let guard = h.producer.attach();
        h.producer.write(&[2u8; FRAME]);
        h.core.tick();
        drop(guard);
        for _ in 0..3 {
            h.core.tick();
        }
        assert_eq!(signals(&mut h.exhausted_rx), 1, "second run signals again");
    }

    #[test]
    fn test_partial_frame_padded_direct_only() {
        let mut h = harness(true, true);
        let guard = h.producer.attach();
        h.producer.write(&[7u8; 3]);
        drop(guard);

        h.core.tick();
        let frames = h.direct_frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..3], &[7u8; 3]);
        assert!(frames[0][3..].iter().all(|&b| b == 0));
        assert!(h.voice_frames.lock().unwrap().is_empty(), "padded frames never reach voice");
    }

    #[test]
    fn test_pending_read_arms_buffering_cooldown() {
        let mut h = harness(false, false);
        let _guard = h.producer.attach();

        h.core.tick(); // Pending: arms one second of buffering
        assert_eq!(h.core.buffering_cycles, TPS);

        // data arriving during the cooldown is left in the buffer
        h.producer.write(&[1u8; FRAME]);
        for _ in 0..TPS {
            h.core.tick();
        }
        assert_eq!(h.core.buffering_cycles, 0);
        assert_eq!(h.core.consumer.occupied(), FRAME);

        // first tick after the window reads it
        h.core.tick();
        assert_eq!(h.core.consumer.occupied(), 0);
    }

    #[test]
    fn test_full_frame_reaches_voice_with_volume() {
        let mut h = harness(false, true);
        h.core.volume.set(2.0);
        let _guard = h.producer.attach();

        // samples of value 100 (le) scaled to 200
        let mut frame = Vec::new();
        for _ in 0..FRAME / 2 {
            frame.extend_from_slice(&100i16.to_le_bytes());
        }
        h.producer.write(&frame);
        h.core.tick();

        let voiced = h.voice_frames.lock().unwrap();
        assert_eq!(voiced.len(), 1);
        for sample in voiced[0].chunks_exact(2) {
            assert_eq!(i16::from_le_bytes([sample[0], sample[1]]), 200);
        }
    }

    #[test]
    fn test_congestion_state_clears_on_success() {
        let mut h = harness(true, false);
        h.core.direct = Box::new(RecordingDirect {
            frames: Arc::clone(&h.direct_frames),
            connected: true,
            congested: true,
        });
        h.core.tick();
        assert_eq!(h.core.congestion, CongestionState::Congested);

        h.core.direct = Box::new(RecordingDirect {
            frames: Arc::clone(&h.direct_frames),
            connected: true,
            congested: false,
        });
        h.core.tick();
        assert_eq!(h.core.congestion, CongestionState::Clear);
    }

    #[test]
    fn test_scale_frame_saturates() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&30000i16.to_le_bytes());
        frame.extend_from_slice(&(-30000i16).to_le_bytes());
        scale_frame(&mut frame, 2.0);
        assert_eq!(i16::from_le_bytes([frame[0], frame[1]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([frame[2], frame[3]]), i16::MIN);
    }

    #[test]
    fn test_volume_clamped() {
        let volume = Volume::new(5.0);
        assert_eq!(volume.get(), 2.0);
        volume.set(-1.0);
        assert_eq!(volume.get(), 0.0);
    }
}
