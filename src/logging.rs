//! Logger installation and the startup banner.
//!
//! Components only ever use the `log` macros; the backend is chosen here,
//! once, before anything else runs.

use std::io::Write;

use env_logger::{Builder, Target};
use log::{info, warn, LevelFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Build metadata, filled from compile-time environment variables when present.
#[derive(Debug, Clone)]
pub struct BuildInfo {
    pub version: &'static str,
    pub git_commit: Option<&'static str>,
    pub git_branch: Option<&'static str>,
    pub build_time: Option<&'static str>,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            git_commit: option_env!("DNSHERPA_GIT_COMMIT"),
            git_branch: option_env!("DNSHERPA_GIT_BRANCH"),
            build_time: option_env!("DNSHERPA_BUILD_TIME"),
        }
    }
}

fn parse_level(raw: &str) -> Option<LevelFilter> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "trace" => Some(LevelFilter::Trace),
        "debug" => Some(LevelFilter::Debug),
        "info" => Some(LevelFilter::Info),
        "warn" | "warning" => Some(LevelFilter::Warn),
        "error" => Some(LevelFilter::Error),
        "off" => Some(LevelFilter::Off),
        _ => None,
    }
}

fn parse_format(raw: &str) -> Option<LogFormat> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "text" => Some(LogFormat::Text),
        "json" => Some(LogFormat::Json),
        _ => None,
    }
}

/// Installs the process logger. Unknown level or format values fall back to
/// `info` / `text` and are reported once the logger is up. `RUST_LOG` is
/// applied on top of `level`.
pub fn init(level: &str, format: &str) {
    let parsed_level = parse_level(level);
    let parsed_format = parse_format(format);

    let mut builder = Builder::new();
    builder
        .filter_level(parsed_level.unwrap_or(LevelFilter::Info))
        .parse_default_env()
        .target(Target::Stdout);

    if parsed_format == Some(LogFormat::Json) {
        builder.format(|buf, record| {
            let line = serde_json::json!({
                "time": buf.timestamp().to_string(),
                "level": record.level().as_str(),
                "target": record.target(),
                "msg": record.args().to_string(),
            });
            writeln!(buf, "{}", line)
        });
    }

    builder.init();

    if parsed_level.is_none() {
        warn!("Invalid LOG_LEVEL '{}', defaulting to 'info'", level);
    }
    if parsed_format.is_none() {
        warn!("Invalid LOG_FORMAT '{}', defaulting to 'text'", format);
    }
}

pub fn banner(build: &BuildInfo) {
    info!("DNSherpa {} - automatic DNS records for Docker and Proxmox", build.version);

    let mut details = format!("version={} max_level={}", build.version, log::max_level());
    if let Some(commit) = build.git_commit {
        details.push_str(&format!(" git_commit={}", commit));
    }
    if let Some(branch) = build.git_branch {
        details.push_str(&format!(" git_branch={}", branch));
    }
    if let Some(time) = build.build_time {
        details.push_str(&format!(" build_time={}", time));
    }
    info!("Application starting: {}", details);
}
