//! Configuration loading and parsing.
//!
//! Defines the TOML schema (screens, cast mapping, collaborators) and resolves defaults.

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Receiver application launched when `[cast].app_id` is not set (Default Media Receiver).
pub const DEFAULT_APP_ID: &str = "CC1AD845";
/// Content type sent with the LOAD request when `[cast].content_type` is not set.
pub const DEFAULT_CONTENT_TYPE: &str = "application/dash+xml";

/// Top-level server configuration loaded from TOML.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Bind address (host:port) for the status API and media files.
    pub bind: Option<String>,
    /// Public base URL used to construct stream URLs handed to devices.
    pub public_base_url: Option<String>,
    /// Directory the encoder writes `live/<screen>/` output into.
    pub media_dir: Option<String>,
    /// Local interface address used for mDNS discovery.
    pub network_interface: Option<String>,
    /// Screen cast to devices with no explicit mapping.
    pub default_screen: Option<String>,
    /// Device friendly name -> screen name.
    #[serde(default)]
    pub cast_mapping: HashMap<String, String>,
    /// Receiver application settings.
    pub cast: Option<CastConfig>,
    /// Page capture command.
    pub renderer: RendererConfig,
    /// Encoder settings.
    pub encoder: Option<EncoderConfig>,
    /// Screens to render and stream.
    #[serde(default)]
    pub screens: Vec<ScreenConfig>,
}

#[derive(Debug, Deserialize, Default)]
pub struct CastConfig {
    /// Receiver app id to launch on devices.
    pub app_id: Option<String>,
    /// Content type for the loaded stream.
    pub content_type: Option<String>,
}

/// Capture command: must write a continuous media stream to stdout.
///
/// `{url}` and `{name}` in `args` are replaced per screen; cookies are passed as
/// JSON in `SCREENCAST_COOKIES`.
#[derive(Debug, Deserialize, Clone)]
pub struct RendererConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct EncoderConfig {
    /// ffmpeg executable (defaults to `ffmpeg` on PATH).
    pub ffmpeg: Option<String>,
    /// Input is already h264: copy video instead of re-encoding.
    pub direct_render: Option<bool>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScreenConfig {
    /// Unique screen name; also the stream path segment.
    pub name: String,
    /// Page to render.
    pub url: String,
    #[serde(default)]
    pub cookies: Vec<CookieConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CookieConfig {
    pub name: String,
    /// String or table; tables are JSON-encoded.
    pub value: toml::Value,
    /// Defaults to the screen URL host.
    pub domain: Option<String>,
}

/// Cookie handed to the renderer.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ResolvedCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
}

/// Resolved receiver settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CastSettings {
    pub app_id: String,
    pub content_type: String,
}

impl ServerConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        Self::parse(&raw).with_context(|| format!("parse config {:?}", path))
    }

    fn parse(raw: &str) -> Result<Self> {
        let cfg = toml::from_str::<ServerConfig>(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.screens.is_empty() {
            return Err(anyhow::anyhow!("at least one [[screens]] entry is required"));
        }
        let mut seen = HashSet::new();
        for screen in &self.screens {
            if screen.name.trim().is_empty() {
                return Err(anyhow::anyhow!("screen name must not be empty"));
            }
            if !seen.insert(screen.name.as_str()) {
                return Err(anyhow::anyhow!("duplicate screen name {}", screen.name));
            }
        }
        if self.renderer.command.trim().is_empty() {
            return Err(anyhow::anyhow!("renderer.command is required"));
        }
        if let Some(default) = self.default_screen.as_deref() {
            if !seen.contains(default) {
                tracing::warn!(screen = %default, "default_screen does not match any screen");
            }
        }
        for (device, screen) in &self.cast_mapping {
            if !seen.contains(screen.as_str()) {
                tracing::warn!(device = %device, screen = %screen, "cast_mapping targets unknown screen");
            }
        }
        Ok(())
    }
}

/// Parse an optional bind address from config.
pub fn bind_from_config(cfg: &ServerConfig) -> Result<Option<SocketAddr>> {
    let Some(bind) = cfg.bind.as_deref() else {
        return Ok(None);
    };
    let addr = bind.parse().with_context(|| format!("parse bind {bind}"))?;
    Ok(Some(addr))
}

/// Media output directory (defaults to `media`).
pub fn media_dir_from_config(cfg: &ServerConfig) -> PathBuf {
    cfg.media_dir
        .as_deref()
        .map(str::trim)
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("media"))
}

/// Derive public base URL from config, the discovery interface, or the bind address.
pub fn public_base_url_from_config(cfg: &ServerConfig, bind: SocketAddr) -> Result<String> {
    if let Some(url) = cfg.public_base_url.as_ref() {
        return Ok(url.trim_end_matches('/').to_string());
    }
    if !bind.ip().is_unspecified() {
        return Ok(format!("http://{}", bind));
    }
    if let Some(ip) = network_interface_from_config(cfg)? {
        return Ok(format!("http://{}", SocketAddr::new(ip, bind.port())));
    }
    Err(anyhow::anyhow!(
        "public_base_url is required when bind is unspecified and no network_interface is set"
    ))
}

/// Parse the optional discovery interface address.
pub fn network_interface_from_config(cfg: &ServerConfig) -> Result<Option<IpAddr>> {
    let Some(raw) = cfg.network_interface.as_deref().map(str::trim) else {
        return Ok(None);
    };
    if raw.is_empty() {
        return Ok(None);
    }
    let ip = raw
        .parse()
        .with_context(|| format!("parse network_interface {raw}"))?;
    Ok(Some(ip))
}

/// Receiver app id and content type with defaults applied.
pub fn cast_settings_from_config(cfg: &ServerConfig) -> CastSettings {
    let cast = cfg.cast.as_ref();
    CastSettings {
        app_id: cast
            .and_then(|c| c.app_id.clone())
            .unwrap_or_else(|| DEFAULT_APP_ID.to_string()),
        content_type: cast
            .and_then(|c| c.content_type.clone())
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
    }
}

impl ScreenConfig {
    /// Cookies with values flattened to strings and domains defaulted to the page host.
    pub fn resolved_cookies(&self) -> Vec<ResolvedCookie> {
        let page_host = url_host(&self.url).unwrap_or_default();
        self.cookies
            .iter()
            .map(|cookie| ResolvedCookie {
                name: cookie.name.clone(),
                value: match &cookie.value {
                    toml::Value::String(s) => s.clone(),
                    other => serde_json::to_string(other).unwrap_or_else(|_| other.to_string()),
                },
                domain: cookie
                    .domain
                    .clone()
                    .unwrap_or_else(|| page_host.clone()),
            })
            .collect()
    }
}

/// Host of an absolute URL, without userinfo or port.
fn url_host(url: &str) -> Option<String> {
    let (_, rest) = url.split_once("://")?;
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let authority = &rest[..end];
    let host = authority.rsplit_once('@').map(|(_, h)| h).unwrap_or(authority);
    let host = match host.strip_prefix('[') {
        Some(v6) => v6.split_once(']').map(|(addr, _)| addr).unwrap_or(v6),
        None => host.split_once(':').map(|(name, _)| name).unwrap_or(host),
    };
    (!host.is_empty()).then(|| host.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
bind = "0.0.0.0:8000"
network_interface = "10.1.0.5"
default_screen = "lobby"

[cast]
app_id = "62EFD2C1"

[cast_mapping]
Kitchen = "lobby"

[renderer]
command = "capture-page"
args = ["--url", "{url}"]

[[screens]]
name = "lobby"
url = "https://dash.example.com:8443/board?x=1"

[[screens.cookies]]
name = "device"
value = { deviceName = "lobby", audioOutput = { music = 1 } }

[[screens.cookies]]
name = "token"
value = "abc"
domain = "example.com"
"#;

    #[test]
    fn parses_sample_config() {
        let cfg = ServerConfig::parse(SAMPLE).unwrap();
        assert_eq!(cfg.screens.len(), 1);
        assert_eq!(cfg.cast_mapping.get("Kitchen").map(String::as_str), Some("lobby"));
        assert_eq!(cfg.renderer.args, vec!["--url", "{url}"]);
        let cast = cast_settings_from_config(&cfg);
        assert_eq!(cast.app_id, "62EFD2C1");
        assert_eq!(cast.content_type, DEFAULT_CONTENT_TYPE);
        assert_eq!(media_dir_from_config(&cfg), PathBuf::from("media"));
    }

    #[test]
    fn public_base_url_falls_back_to_network_interface() {
        let cfg = ServerConfig::parse(SAMPLE).unwrap();
        let bind = bind_from_config(&cfg).unwrap().unwrap();
        let url = public_base_url_from_config(&cfg, bind).unwrap();
        assert_eq!(url, "http://10.1.0.5:8000");
    }

    #[test]
    fn public_base_url_requires_explicit_when_unresolvable() {
        let mut cfg = ServerConfig::parse(SAMPLE).unwrap();
        cfg.network_interface = None;
        let bind: SocketAddr = "0.0.0.0:8000".parse().unwrap();
        assert!(public_base_url_from_config(&cfg, bind).is_err());
        cfg.public_base_url = Some("http://cast.local:8000/".to_string());
        assert_eq!(
            public_base_url_from_config(&cfg, bind).unwrap(),
            "http://cast.local:8000"
        );
    }

    #[test]
    fn cookies_are_flattened_and_default_to_page_host() {
        let cfg = ServerConfig::parse(SAMPLE).unwrap();
        let cookies = cfg.screens[0].resolved_cookies();
        assert_eq!(cookies[0].domain, "dash.example.com");
        let value: serde_json::Value = serde_json::from_str(&cookies[0].value).unwrap();
        assert_eq!(value["deviceName"], "lobby");
        assert_eq!(value["audioOutput"]["music"], 1);
        assert_eq!(cookies[1].value, "abc");
        assert_eq!(cookies[1].domain, "example.com");
    }

    #[test]
    fn rejects_duplicate_screen_names() {
        let raw = r#"
[renderer]
command = "capture-page"

[[screens]]
name = "a"
url = "http://x/"

[[screens]]
name = "a"
url = "http://y/"
"#;
        let err = ServerConfig::parse(raw).unwrap_err();
        assert!(err.to_string().contains("duplicate screen name"));
    }

    #[test]
    fn rejects_config_without_screens() {
        let raw = "[renderer]\ncommand = \"capture-page\"\n";
        assert!(ServerConfig::parse(raw).is_err());
    }
}
