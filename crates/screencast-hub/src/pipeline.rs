//! Stream pipeline supervisor.
//!
//! One task per screen keeps a renderer feeding an encoder. Either side going
//! away tears the whole pair down and starts a fresh one; a pair that cannot be
//! built is retried after a short delay.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::ScreenConfig;
use crate::encoder::stream_url;
use crate::events::EventBus;
use crate::registry::Registry;
use crate::timeout::{NETWORK_DEADLINE, Timeout, with_deadline};

/// Delay before retrying a pipeline that could not be constructed.
pub(crate) const CONSTRUCTION_RETRY: Duration = Duration::from_secs(5);
/// How long teardown waits for buffered encoder output to land in the registry.
const DIAGNOSTICS_DRAIN: Duration = Duration::from_secs(1);

/// Continuous audio/video byte stream produced by a renderer.
pub(crate) type MediaStream = Box<dyn AsyncRead + Send + Unpin>;

#[derive(Debug, thiserror::Error)]
pub(crate) enum PipelineError {
    #[error(transparent)]
    Timeout(#[from] Timeout),
    #[error("renderer failed: {0}")]
    Render(String),
    #[error("encoder failed: {0}")]
    Encoder(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub(crate) struct RenderSession {
    pub handle: Box<dyn RenderHandle>,
    pub stream: MediaStream,
}

#[async_trait]
pub(crate) trait Renderer: Send + Sync {
    /// Open the screen's page and start capturing it.
    async fn acquire(&self, screen: &ScreenConfig) -> Result<RenderSession, PipelineError>;
}

#[async_trait]
pub(crate) trait RenderHandle: Send {
    /// Resolves once the renderer has gone away.
    async fn disconnected(&mut self);
    async fn close(&mut self);
}

#[async_trait]
pub(crate) trait Encoder: Send + Sync {
    /// Start encoding `stream` into the screen's output directory.
    async fn start(
        &self,
        stream: MediaStream,
        screen: &str,
    ) -> Result<Box<dyn EncoderProcess>, PipelineError>;
}

#[async_trait]
pub(crate) trait EncoderProcess: Send {
    /// Resolves with the exit code (`None` when killed by a signal).
    async fn wait_exit(&mut self) -> Option<i32>;
    /// Diagnostic output chunks; available once.
    fn take_diagnostics(&mut self) -> Option<mpsc::Receiver<String>>;
    async fn terminate(&mut self);
}

/// One live renderer+encoder incarnation.
pub(crate) struct LivePipeline {
    handle: Box<dyn RenderHandle>,
    process: Box<dyn EncoderProcess>,
    heartbeat: Option<JoinHandle<()>>,
}

enum Failure {
    EncoderExited(Option<i32>),
    RendererDisconnected,
}

#[derive(Clone)]
pub(crate) struct PipelineSupervisor {
    renderer: Arc<dyn Renderer>,
    encoder: Arc<dyn Encoder>,
    registry: Registry,
    events: EventBus,
    public_base_url: String,
}

impl PipelineSupervisor {
    pub(crate) fn new(
        renderer: Arc<dyn Renderer>,
        encoder: Arc<dyn Encoder>,
        registry: Registry,
        events: EventBus,
        public_base_url: String,
    ) -> Self {
        Self {
            renderer,
            encoder,
            registry,
            events,
            public_base_url,
        }
    }

    /// Supervise `screen` forever. The receiver fires once the first attempt settles.
    pub(crate) fn spawn(&self, screen: ScreenConfig) -> oneshot::Receiver<()> {
        let (first_tx, first_rx) = oneshot::channel();
        let supervisor = self.clone();
        self.registry.ensure_screen(&screen.name);
        tokio::spawn(async move {
            supervisor.supervise(screen, first_tx).await;
        });
        first_rx
    }

    async fn supervise(self, screen: ScreenConfig, first: oneshot::Sender<()>) {
        let mut first = Some(first);
        loop {
            match self.ensure_running(&screen).await {
                Ok(live) => {
                    if let Some(tx) = first.take() {
                        let _ = tx.send(());
                    }
                    self.watch(&screen.name, live).await;
                }
                Err(err) => {
                    tracing::warn!(screen = %screen.name, error = %err, "pipeline: setup failed");
                    self.registry.pipeline_failed(&screen.name, &err.to_string());
                    self.events.pipeline_changed(&screen.name);
                    if let Some(tx) = first.take() {
                        let _ = tx.send(());
                    }
                    tokio::time::sleep(CONSTRUCTION_RETRY).await;
                }
            }
        }
    }

    /// Start a brand-new renderer+encoder pair and publish its URL.
    ///
    /// Does not probe for an existing pair; callers tear the old one down first.
    pub(crate) async fn ensure_running(
        &self,
        screen: &ScreenConfig,
    ) -> Result<LivePipeline, PipelineError> {
        tracing::info!(screen = %screen.name, url = %screen.url, "pipeline: launching renderer");
        let RenderSession { mut handle, stream } = with_deadline(
            "took too long to start renderer",
            NETWORK_DEADLINE,
            self.renderer.acquire(screen),
        )
        .await?;

        tracing::info!(screen = %screen.name, "pipeline: starting encoder");
        let mut process = match self.encoder.start(stream, &screen.name).await {
            Ok(process) => process,
            Err(err) => {
                handle.close().await;
                return Err(err);
            }
        };

        let heartbeat = process.take_diagnostics().map(|mut rx| {
            let registry = self.registry.clone();
            let name = screen.name.clone();
            tokio::spawn(async move {
                while let Some(output) = rx.recv().await {
                    registry.heartbeat(&name, &output);
                }
            })
        });

        let url = stream_url(&self.public_base_url, &screen.name);
        self.registry.pipeline_started(&screen.name, &url);
        self.events.pipeline_changed(&screen.name);
        tracing::info!(screen = %screen.name, url = %url, "pipeline: stream published");

        Ok(LivePipeline {
            handle,
            process,
            heartbeat,
        })
    }

    /// Wait for either failure signal, then tear down and record the reason.
    async fn watch(&self, name: &str, mut live: LivePipeline) {
        let failure = tokio::select! {
            code = live.process.wait_exit() => Failure::EncoderExited(code),
            _ = live.handle.disconnected() => Failure::RendererDisconnected,
        };

        live.handle.close().await;
        live.process.terminate().await;
        if let Some(mut heartbeat) = live.heartbeat.take() {
            if tokio::time::timeout(DIAGNOSTICS_DRAIN, &mut heartbeat).await.is_err() {
                heartbeat.abort();
            }
        }

        let output = self.registry.last_heartbeat_output(name).unwrap_or_default();
        let reason = match failure {
            Failure::EncoderExited(Some(code)) => format!("encoder exited with {code}: {output}"),
            Failure::EncoderExited(None) => format!("encoder killed: {output}"),
            Failure::RendererDisconnected => format!("renderer disconnected: {output}"),
        };
        tracing::warn!(screen = %name, reason = %reason, "pipeline: exited, restarting");
        self.registry.pipeline_exited(name, &reason);
        self.events.pipeline_changed(name);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct Counters {
        acquired: AtomicUsize,
        live: AtomicUsize,
        max_live: AtomicUsize,
    }

    /// Renderer whose calls follow a script: `Err` fails construction,
    /// `Ok(Some(d))` disconnects after `d`, `Ok(None)` stays up.
    struct FakeRenderer {
        counters: Arc<Counters>,
        script: Mutex<VecDeque<Result<Option<Duration>, String>>>,
    }

    struct FakeHandle {
        counters: Arc<Counters>,
        disconnect_after: Option<Duration>,
        closed: bool,
    }

    #[async_trait]
    impl Renderer for FakeRenderer {
        async fn acquire(&self, _screen: &ScreenConfig) -> Result<RenderSession, PipelineError> {
            self.counters.acquired.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front().unwrap_or(Ok(None));
            let disconnect_after = next.map_err(PipelineError::Render)?;
            let live = self.counters.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.counters.max_live.fetch_max(live, Ordering::SeqCst);
            Ok(RenderSession {
                handle: Box::new(FakeHandle {
                    counters: self.counters.clone(),
                    disconnect_after,
                    closed: false,
                }),
                stream: Box::new(tokio::io::empty()),
            })
        }
    }

    #[async_trait]
    impl RenderHandle for FakeHandle {
        async fn disconnected(&mut self) {
            match self.disconnect_after {
                Some(after) => tokio::time::sleep(after).await,
                None => std::future::pending::<()>().await,
            }
        }

        async fn close(&mut self) {
            if !self.closed {
                self.closed = true;
                self.counters.live.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    /// Encoder whose processes exit per script: `Some((after, code))` or never.
    struct FakeEncoder {
        exits: Mutex<VecDeque<Option<(Duration, i32)>>>,
    }

    struct FakeProcess {
        exit: Option<(Duration, i32)>,
        diagnostics: Option<mpsc::Receiver<String>>,
    }

    #[async_trait]
    impl Encoder for FakeEncoder {
        async fn start(
            &self,
            _stream: MediaStream,
            _screen: &str,
        ) -> Result<Box<dyn EncoderProcess>, PipelineError> {
            let exit = self.exits.lock().unwrap().pop_front().flatten();
            let (tx, rx) = mpsc::channel(4);
            tx.try_send("frame=  250 fps=25".to_string()).unwrap();
            Ok(Box::new(FakeProcess {
                exit,
                diagnostics: Some(rx),
            }))
        }
    }

    #[async_trait]
    impl EncoderProcess for FakeProcess {
        async fn wait_exit(&mut self) -> Option<i32> {
            match self.exit {
                Some((after, code)) => {
                    tokio::time::sleep(after).await;
                    Some(code)
                }
                None => std::future::pending().await,
            }
        }

        fn take_diagnostics(&mut self) -> Option<mpsc::Receiver<String>> {
            self.diagnostics.take()
        }

        async fn terminate(&mut self) {}
    }

    fn screen() -> ScreenConfig {
        ScreenConfig {
            name: "lobby".to_string(),
            url: "https://dash.example.com/lobby".to_string(),
            cookies: Vec::new(),
        }
    }

    fn supervisor(
        renderer: Vec<Result<Option<Duration>, String>>,
        exits: Vec<Option<(Duration, i32)>>,
    ) -> (PipelineSupervisor, Arc<Counters>, Registry) {
        let counters = Arc::new(Counters::default());
        let registry = Registry::new();
        let supervisor = PipelineSupervisor::new(
            Arc::new(FakeRenderer {
                counters: counters.clone(),
                script: Mutex::new(renderer.into()),
            }),
            Arc::new(FakeEncoder {
                exits: Mutex::new(exits.into()),
            }),
            registry.clone(),
            EventBus::new(),
            "http://10.0.0.2:8000".to_string(),
        );
        (supervisor, counters, registry)
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_url_after_encoder_starts() {
        let (supervisor, _, registry) = supervisor(vec![], vec![]);
        supervisor.spawn(screen()).await.unwrap();
        let state = registry.screen("lobby").unwrap();
        assert_eq!(
            state.url.as_deref(),
            Some("http://10.0.0.2:8000/live/lobby/dash.mpd")
        );
        assert!(state.started_at.is_some());
        assert!(state.exited_at.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn encoder_exit_is_recorded_and_restarted() {
        let (supervisor, counters, registry) =
            supervisor(vec![], vec![Some((Duration::from_secs(10), 1))]);
        supervisor.spawn(screen()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;

        let state = registry.screen("lobby").unwrap();
        assert_eq!(state.restarts, 1);
        assert!(state.exited_at.is_some());
        let error = state.last_error.unwrap();
        assert!(error.contains("exited with 1"), "{error}");
        assert!(error.contains("frame=  250"), "{error}");
        assert_eq!(counters.acquired.load(Ordering::SeqCst), 2);
        assert_eq!(counters.max_live.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn renderer_disconnect_tears_down_before_restart() {
        let (supervisor, counters, registry) = supervisor(
            vec![
                Ok(Some(Duration::from_secs(5))),
                Ok(Some(Duration::from_secs(5))),
            ],
            vec![],
        );
        supervisor.spawn(screen()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(12)).await;

        assert_eq!(counters.acquired.load(Ordering::SeqCst), 3);
        assert_eq!(counters.max_live.load(Ordering::SeqCst), 1);
        assert_eq!(counters.live.load(Ordering::SeqCst), 1);
        let state = registry.screen("lobby").unwrap();
        assert_eq!(state.restarts, 2);
        assert!(state.last_error.unwrap().starts_with("renderer disconnected"));
    }

    #[tokio::test(start_paused = true)]
    async fn construction_failure_retries_after_delay() {
        let (supervisor, counters, registry) =
            supervisor(vec![Err("browser crashed".to_string())], vec![]);
        supervisor.spawn(screen()).await.unwrap();
        assert_eq!(
            registry.screen("lobby").unwrap().last_error.as_deref(),
            Some("renderer failed: browser crashed")
        );
        assert!(registry.stream_url("lobby").is_none());

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(counters.acquired.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(counters.acquired.load(Ordering::SeqCst), 2);
        assert!(registry.stream_url("lobby").is_some());
    }
}
