//! Track transcoding
//!
//! Turns arbitrary source audio into a lazy stream of constant-bitrate MP3
//! chunks. The hard work is delegated to an external `ffmpeg` process; this
//! module only owns the plumbing: source bytes in via stdin, fixed-size
//! encoded chunks out via stdout.
//!
//! The output profile (bitrate, sample rate, channels) is fixed when the
//! encoder is constructed and never changes for the lifetime of the
//! broadcast, so the multiplexer's pacing math stays valid.

use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::catalog::ByteStream;
use crate::constants::{ENCODED_CHUNK_SIZE, ENCODER_CHANNELS, ENCODER_SAMPLE_RATE};
use crate::error::EncodeError;

/// Lazy sequence of encoded chunks for one track.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Bytes, EncodeError>> + Send>>;

/// Interface to the decode-and-encode step.
#[async_trait]
pub trait Encoder: Send + Sync {
    /// Transcode one track's raw bytes into CBR chunks.
    async fn encode(&self, source: ByteStream) -> Result<ChunkStream, EncodeError>;
}

/// Number of encoded chunks buffered between the ffmpeg reader and the
/// consumer before the reader is backpressured.
const PUMP_CHANNEL_CAPACITY: usize = 32;

/// `ffmpeg`-backed [`Encoder`] producing a fixed CBR MP3 profile.
pub struct FfmpegEncoder {
    ffmpeg: PathBuf,
    bitrate_kbps: u32,
}

impl FfmpegEncoder {
    pub fn new(ffmpeg: impl Into<PathBuf>, bitrate_kbps: u32) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            bitrate_kbps,
        }
    }

    fn args(&self) -> Vec<String> {
        vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-i".into(),
            "pipe:0".into(),
            "-vn".into(),
            "-ac".into(),
            ENCODER_CHANNELS.to_string(),
            "-ar".into(),
            ENCODER_SAMPLE_RATE.to_string(),
            "-b:a".into(),
            format!("{}k", self.bitrate_kbps),
            "-f".into(),
            "mp3".into(),
            "pipe:1".into(),
        ]
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn encode(&self, source: ByteStream) -> Result<ChunkStream, EncodeError> {
        let mut child = Command::new(&self.ffmpeg)
            .args(self.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EncodeError::EncoderUnavailable(e.to_string()))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| EncodeError::EncoderUnavailable("no stdin handle".into()))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| EncodeError::EncoderUnavailable("no stdout handle".into()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| EncodeError::EncoderUnavailable("no stderr handle".into()))?;

        // Feed the raw source into ffmpeg. A write error here usually just
        // means ffmpeg gave up first; the real cause surfaces via stderr.
        let (feed_done_tx, feed_done_rx) = oneshot::channel::<Option<String>>();
        tokio::spawn(async move {
            let mut source = source;
            let mut source_error = None;
            while let Some(item) = source.next().await {
                match item {
                    Ok(chunk) => {
                        if stdin.write_all(&chunk).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        source_error = Some(e.to_string());
                        break;
                    }
                }
            }
            // Dropping stdin signals EOF so ffmpeg flushes and exits.
            drop(stdin);
            let _ = feed_done_tx.send(source_error);
        });

        let (stderr_tx, stderr_rx) = oneshot::channel::<String>();
        tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            let _ = stderr_tx.send(buf);
        });

        // Pump encoded chunks out of ffmpeg. After EOF, the exit status and
        // any source-read failure decide whether the stream ends cleanly.
        let (tx, rx) = mpsc::channel::<Result<Bytes, EncodeError>>(PUMP_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            loop {
                let mut buf = vec![0u8; ENCODED_CHUNK_SIZE];
                match stdout.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        buf.truncate(n);
                        if tx.send(Ok(Bytes::from(buf))).await.is_err() {
                            // Consumer is gone; stop ffmpeg instead of
                            // letting it block on a full pipe forever.
                            let _ = child.kill().await;
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(EncodeError::DecodeFailed(e.to_string()))).await;
                        let _ = child.kill().await;
                        return;
                    }
                }
            }

            let source_error = feed_done_rx.await.ok().flatten();
            let status = child.wait().await;
            if let Some(msg) = source_error {
                let _ = tx.send(Err(EncodeError::SourceRead(msg))).await;
                return;
            }
            match status {
                Ok(status) if status.success() => {
                    debug!("encoder finished cleanly");
                }
                Ok(status) => {
                    let detail = stderr_rx.await.unwrap_or_default();
                    let detail = detail.trim();
                    let msg = if detail.is_empty() {
                        format!("ffmpeg exited with {}", status)
                    } else {
                        format!("ffmpeg exited with {}: {}", status, detail)
                    };
                    let _ = tx.send(Err(EncodeError::DecodeFailed(msg))).await;
                }
                Err(e) => {
                    warn!(error = %e, "failed to reap encoder process");
                    let _ = tx.send(Err(EncodeError::DecodeFailed(e.to_string()))).await;
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_request_fixed_cbr_profile() {
        let encoder = FfmpegEncoder::new("ffmpeg", 128);
        let args = encoder.args();
        let bitrate_pos = args.iter().position(|a| a == "-b:a").unwrap();
        assert_eq!(args[bitrate_pos + 1], "128k");
        assert!(args.contains(&"mp3".to_string()));
        assert!(args.contains(&"pipe:0".to_string()));
        assert!(args.contains(&"pipe:1".to_string()));
    }

    #[test]
    fn args_follow_configured_bitrate() {
        let encoder = FfmpegEncoder::new("/usr/bin/ffmpeg", 320);
        assert!(encoder.args().contains(&"320k".to_string()));
    }
}
