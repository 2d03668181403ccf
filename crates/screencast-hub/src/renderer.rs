//! Headless page renderer driven by an external capture command.
//!
//! The command loads the screen's page and writes the captured audio/video
//! stream to stdout. Its exit is the disconnect signal.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};

use crate::config::{RendererConfig, ScreenConfig};
use crate::pipeline::{PipelineError, RenderHandle, RenderSession, Renderer};

/// Environment variable carrying the screen's cookies as a JSON array.
const COOKIES_ENV: &str = "SCREENCAST_COOKIES";

pub(crate) struct CommandRenderer {
    command: String,
    args: Vec<String>,
}

impl CommandRenderer {
    pub(crate) fn new(config: &RendererConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
        }
    }

    /// Substitute `{url}` and `{name}` placeholders.
    fn render_args(&self, screen: &ScreenConfig) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace("{url}", &screen.url).replace("{name}", &screen.name))
            .collect()
    }
}

#[async_trait]
impl Renderer for CommandRenderer {
    async fn acquire(&self, screen: &ScreenConfig) -> Result<RenderSession, PipelineError> {
        let cookies = serde_json::to_string(&screen.resolved_cookies())
            .map_err(|e| PipelineError::Render(format!("encode cookies: {e}")))?;
        let mut command = Command::new(&self.command);
        command
            .args(self.render_args(screen))
            .env(COOKIES_ENV, cookies)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        let mut child = command
            .spawn()
            .map_err(|e| PipelineError::Render(format!("failed to start {}: {e}", self.command)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PipelineError::Render("missing stdout pipe".to_string()))?;
        tracing::info!(screen = %screen.name, pid = ?child.id(), "pipeline: renderer started");
        Ok(RenderSession {
            handle: Box::new(ChildRenderHandle {
                child,
                screen: screen.name.clone(),
            }),
            stream: Box::new(stdout),
        })
    }
}

struct ChildRenderHandle {
    child: Child,
    screen: String,
}

#[async_trait]
impl RenderHandle for ChildRenderHandle {
    async fn disconnected(&mut self) {
        match self.child.wait().await {
            Ok(status) => {
                tracing::info!(screen = %self.screen, status = %status, "pipeline: renderer exited")
            }
            Err(err) => {
                tracing::warn!(screen = %self.screen, error = %err, "pipeline: renderer wait failed")
            }
        }
    }

    async fn close(&mut self) {
        if let Err(err) = self.child.kill().await {
            tracing::debug!(screen = %self.screen, error = %err, "pipeline: closing renderer failed, ignoring");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn templates_url_and_name_into_args() {
        let renderer = CommandRenderer::new(&RendererConfig {
            command: "capture-page".to_string(),
            args: vec![
                "--url={url}".to_string(),
                "--title".to_string(),
                "{name}".to_string(),
                "--size=1920x1080".to_string(),
            ],
        });
        let screen = ScreenConfig {
            name: "lobby".to_string(),
            url: "https://dash.example.com/lobby".to_string(),
            cookies: Vec::new(),
        };
        assert_eq!(
            renderer.render_args(&screen),
            vec![
                "--url=https://dash.example.com/lobby",
                "--title",
                "lobby",
                "--size=1920x1080",
            ]
        );
    }
}
