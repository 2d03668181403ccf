//! ffmpeg-backed DASH encoder.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::EncoderConfig;
use crate::pipeline::{Encoder, EncoderProcess, MediaStream, PipelineError};

const MANIFEST: &str = "dash.mpd";
const FPS: u32 = 25;
const FRAME_SIZE: &str = "1920x1080";
const BITRATE: &str = "3M";
const MAXRATE: &str = "8M";
const BUFSIZE: &str = "6M";

/// Public URL of a screen's DASH manifest.
pub(crate) fn stream_url(public_base_url: &str, screen: &str) -> String {
    format!(
        "{}/live/{screen}/{MANIFEST}",
        public_base_url.trim_end_matches('/')
    )
}

/// ffmpeg arguments reading the capture from stdin and writing a live DASH window.
///
/// `direct_render` copies an already-H.264 capture instead of re-encoding it.
pub(crate) fn ffmpeg_args(direct_render: bool) -> Vec<String> {
    let mut args: Vec<String> = [
        "-i",
        "-",
        "-preset",
        "veryfast",
        "-force_key_frames",
        "expr:gte(t,50)",
        "-x264opts",
        "rc-lookahead=50:keyint=100:min-keyint=50",
        "-sc_threshold",
        "0",
        "-r",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.push(FPS.to_string());
    if direct_render {
        args.extend(["-c:v", "copy"].map(String::from));
    } else {
        args.extend(["-c:v", "libx264", "-pix_fmt", "yuv420p"].map(String::from));
    }
    args.extend(
        [
            "-c:a",
            "aac",
            "-b:a",
            "128k",
            "-ac",
            "1",
            "-ar",
            "44100",
            "-map",
            "v:0",
            "-s",
            FRAME_SIZE,
            "-b:v",
            BITRATE,
            "-maxrate",
            MAXRATE,
            "-bufsize",
            BUFSIZE,
            "-map",
            "0:a",
            "-use_template",
            "1",
            "-use_timeline",
            "1",
            "-window_size",
            "10",
            "-extra_window_size",
            "3",
            "-remove_at_exit",
            "1",
            "-f",
            "dash",
            MANIFEST,
        ]
        .map(String::from),
    );
    args
}

pub(crate) struct FfmpegEncoder {
    ffmpeg: String,
    direct_render: bool,
    media_dir: PathBuf,
}

impl FfmpegEncoder {
    pub(crate) fn new(config: Option<&EncoderConfig>, media_dir: PathBuf) -> Self {
        Self {
            ffmpeg: config
                .and_then(|c| c.ffmpeg.clone())
                .unwrap_or_else(|| "ffmpeg".to_string()),
            direct_render: config.and_then(|c| c.direct_render).unwrap_or(false),
            media_dir,
        }
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn start(
        &self,
        mut stream: MediaStream,
        screen: &str,
    ) -> Result<Box<dyn EncoderProcess>, PipelineError> {
        let dir = self.media_dir.join("live").join(screen);
        tokio::fs::create_dir_all(&dir).await?;

        let mut command = Command::new(&self.ffmpeg);
        command
            .args(ffmpeg_args(self.direct_render))
            .current_dir(&dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = command
            .spawn()
            .map_err(|e| PipelineError::Encoder(format!("failed to start {}: {e}", self.ffmpeg)))?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| PipelineError::Encoder("missing stdin pipe".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| PipelineError::Encoder("missing stderr pipe".to_string()))?;

        let name = screen.to_string();
        let feeder = tokio::spawn(async move {
            match tokio::io::copy(&mut stream, &mut stdin).await {
                Ok(bytes) => tracing::debug!(screen = %name, bytes, "pipeline: capture stream ended"),
                Err(err) => tracing::debug!(screen = %name, error = %err, "pipeline: capture copy stopped"),
            }
        });

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            loop {
                match stderr.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let text = String::from_utf8_lossy(&buf[..n]).trim().to_string();
                        if text.is_empty() {
                            continue;
                        }
                        // Keep draining stderr even when nobody is listening.
                        let _ = tx.try_send(text);
                    }
                }
            }
        });

        tracing::info!(screen = %screen, dir = %dir.display(), "pipeline: encoder started");
        Ok(Box::new(FfmpegProcess {
            child,
            feeder,
            diagnostics: Some(rx),
        }))
    }
}

struct FfmpegProcess {
    child: Child,
    feeder: JoinHandle<()>,
    diagnostics: Option<mpsc::Receiver<String>>,
}

#[async_trait]
impl EncoderProcess for FfmpegProcess {
    async fn wait_exit(&mut self) -> Option<i32> {
        match self.child.wait().await {
            Ok(status) => status.code(),
            Err(err) => {
                tracing::warn!(error = %err, "pipeline: waiting for encoder failed");
                None
            }
        }
    }

    fn take_diagnostics(&mut self) -> Option<mpsc::Receiver<String>> {
        self.diagnostics.take()
    }

    async fn terminate(&mut self) {
        self.feeder.abort();
        let _ = self.child.kill().await;
    }
}
