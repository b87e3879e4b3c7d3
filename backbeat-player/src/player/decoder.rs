//! External decoder subprocess lifecycle
//!
//! The decoder is an opaque collaborator: given a playable URL it writes
//! raw s16le PCM to stdout until the source ends or it is killed. A pump
//! task moves that output into the relay's frame buffer, registering itself
//! as the buffer's attached producer so the relay can tell "no data yet"
//! from "input gone".

use crate::config::{AudioConfig, DecoderConfig};
use crate::error::{Error, Result};
use crate::relay::FrameProducer;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Spawns decoder subprocesses. Behind a trait so the player FSM can be
/// exercised without an actual decoder binary.
#[async_trait]
pub trait DecoderLauncher: Send + Sync {
    /// Spawn a decoder producing PCM for `url` into `producer`.
    async fn spawn(&self, url: &str, producer: FrameProducer) -> Result<Box<dyn DecoderHandle>>;
}

/// A running decoder. Killing is forcible and waits for the process to be
/// reaped, so no zombie is left behind.
#[async_trait]
pub trait DecoderHandle: Send {
    async fn kill(&mut self);
}

/// ffmpeg-style launcher built from the decoder config template.
pub struct FfmpegLauncher {
    program: String,
    args: Vec<String>,
    read_backoff: Duration,
}

impl FfmpegLauncher {
    pub fn new(decoder: &DecoderConfig, audio: &AudioConfig) -> Self {
        let rate = audio.sample_rate.to_string();
        let channels = audio.channels.to_string();
        let args = decoder
            .args
            .iter()
            .map(|a| {
                a.replace("{rate}", &rate)
                    .replace("{channels}", &channels)
            })
            .collect();
        Self {
            program: decoder.program.clone(),
            args,
            read_backoff: audio.frame_period(),
        }
    }
}

#[async_trait]
impl DecoderLauncher for FfmpegLauncher {
    async fn spawn(&self, url: &str, producer: FrameProducer) -> Result<Box<dyn DecoderHandle>> {
        let args: Vec<String> = self
            .args
            .iter()
            .map(|a| a.replace("{url}", url))
            .collect();

        debug!("spawning decoder: {} {}", self.program, args.join(" "));

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::DecoderMissing(self.program.clone())
                } else {
                    Error::Decoder(format!("failed to spawn {}: {}", self.program, e))
                }
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Decoder("decoder stdout was not captured".to_string()))?;

        let pump = tokio::spawn(pump_pcm(stdout, producer, self.read_backoff));

        Ok(Box::new(FfmpegHandle {
            child,
            pump: Some(pump),
        }))
    }
}

/// Copy decoder stdout into the frame buffer until EOF, yielding when the
/// buffer is full so the relay sets the pace.
async fn pump_pcm(mut stdout: ChildStdout, producer: FrameProducer, backoff: Duration) {
    let _guard = producer.attach();
    let mut buf = vec![0u8; 16 * 1024];
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let mut offset = 0;
                while offset < n {
                    let written = producer.write(&buf[offset..n]);
                    offset += written;
                    if written == 0 {
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
            Err(e) => {
                warn!("decoder output read failed: {}", e);
                break;
            }
        }
    }
    debug!("decoder pump finished");
}

struct FfmpegHandle {
    child: Child,
    pump: Option<JoinHandle<()>>,
}

#[async_trait]
impl DecoderHandle for FfmpegHandle {
    async fn kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!("decoder kill failed (already gone?): {}", e);
        }
        match self.child.wait().await {
            Ok(status) => debug!("decoder reaped: {}", status),
            Err(e) => warn!("failed to reap decoder: {}", e),
        }
        if let Some(pump) = self.pump.take() {
            // The source is being discarded; drop the tail instead of
            // waiting for buffer space.
            pump.abort();
            let _ = pump.await;
        }
    }
}
