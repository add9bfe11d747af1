//! Tracing subscriber setup for the binary.

use std::path::{Path, PathBuf};

use env_flags::env_flags;
use once_cell::sync::OnceCell;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::{LoggingCfg, UserConfig};

env_flags! {
    /// Tracing filter, e.g. "info", "debug", or targets format.
    RUST_LOG: &str = "info";
    /// Preferred filter env (alias). If set, overrides RUST_LOG.
    TRACING_FILTER: &str = "";
    /// Pretty formatting for logs (ignored if TRACING_JSON=true).
    TRACING_PRETTY: bool = false;
    /// Compact single-line formatting for logs (ignored if TRACING_JSON=true)
    TRACING_COMPACT: bool = true;
    /// JSON formatting for logs
    TRACING_JSON: bool = false;
    /// If true, also log to a daily file under <AGENTPLANE_HOME>/logs or LOG_DIR
    LOG_TO_FILE: bool = false;
    /// Optional explicit log directory (absolute).
    LOG_DIR: &str = "";
}

const LOG_FILE: &str = "agentplane.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStyle {
    Json,
    Compact,
    Pretty,
    Full,
}

impl LogStyle {
    fn pick(json: bool, compact: bool, pretty: bool) -> Self {
        if json {
            LogStyle::Json
        } else if compact {
            LogStyle::Compact
        } else if pretty {
            LogStyle::Pretty
        } else {
            LogStyle::Full
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogOptions {
    pub filter: String,
    pub style: LogStyle,
    /// Directory for the rolling file log, if enabled.
    pub file_dir: Option<PathBuf>,
}

impl LogOptions {
    /// Env wins; the user config only fills in what the env leaves unset.
    pub fn resolve(
        home: &Path,
        cfg: Option<&LoggingCfg>,
        env_set: impl Fn(&str) -> bool,
    ) -> Self {
        let mut filter = if !(*TRACING_FILTER).is_empty() {
            (*TRACING_FILTER).to_string()
        } else {
            (*RUST_LOG).to_string()
        };
        let mut json = *TRACING_JSON;
        let mut compact = *TRACING_COMPACT;
        let mut pretty = *TRACING_PRETTY;
        let mut to_file = *LOG_TO_FILE;
        let mut dir = (!(*LOG_DIR).is_empty()).then(|| PathBuf::from((*LOG_DIR).to_string()));

        if let Some(cfg) = cfg {
            if !(env_set("TRACING_FILTER") || env_set("RUST_LOG"))
                && let Some(level) = cfg.level.as_ref()
            {
                filter = level.clone();
            }
            if !env_set("TRACING_JSON")
                && let Some(v) = cfg.json
            {
                json = v;
            }
            if !env_set("TRACING_COMPACT")
                && let Some(v) = cfg.compact
            {
                compact = v;
            }
            if !env_set("TRACING_PRETTY")
                && let Some(v) = cfg.pretty
            {
                pretty = v;
            }
            if !env_set("LOG_TO_FILE")
                && let Some(v) = cfg.to_file
            {
                to_file = v;
            }
            if !env_set("LOG_DIR")
                && let Some(d) = cfg.dir.as_ref()
            {
                dir = Some(crate::config::expand_home(d));
            }
        }

        Self {
            filter,
            style: LogStyle::pick(json, compact, pretty),
            file_dir: to_file.then(|| dir.unwrap_or_else(|| home.join("logs"))),
        }
    }
}

type Base = Layered<EnvFilter, Registry>;

fn styled<W>(style: LogStyle, writer: W, ansi: bool) -> Box<dyn Layer<Base> + Send + Sync>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let base = tracing_subscriber::fmt::layer()
        .with_file(false)
        .with_line_number(false)
        .with_target(true)
        .with_ansi(ansi)
        .with_writer(writer);
    match style {
        LogStyle::Json => base.json().boxed(),
        LogStyle::Compact => base.compact().boxed(),
        LogStyle::Pretty => base.pretty().boxed(),
        LogStyle::Full => base.boxed(),
    }
}

/// Install the global subscriber. Logs always go to stderr; the file layer
/// is added when a log directory is configured and can be created.
pub fn init_tracing(home: &Path, user_cfg: Option<&UserConfig>) {
    static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

    let env_set = |k: &str| std::env::var_os(k).is_some();
    let opts = LogOptions::resolve(home, user_cfg.and_then(|c| c.logging.as_ref()), env_set);
    let filter = EnvFilter::try_new(&opts.filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let mut layers = vec![styled(opts.style, std::io::stderr, true)];
    let mut dir_error = None;
    if let Some(dir) = &opts.file_dir {
        match std::fs::create_dir_all(dir) {
            Ok(()) => {
                let appender = tracing_appender::rolling::daily(dir, LOG_FILE);
                let (nb, guard) = tracing_appender::non_blocking(appender);
                let _ = FILE_GUARD.set(guard);
                layers.push(styled(opts.style, nb, false));
            }
            Err(e) => dir_error = Some((dir.clone(), e)),
        }
    }

    if let Err(e) = tracing_subscriber::registry().with(filter).with(layers).try_init() {
        tracing::debug!("tracing already set: {:?}", e);
    }
    if let Some((dir, e)) = dir_error {
        tracing::warn!("failed to create log dir {}: {}", dir.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_takes_priority_over_other_styles() {
        assert_eq!(LogStyle::pick(true, true, true), LogStyle::Json);
        assert_eq!(LogStyle::pick(false, true, true), LogStyle::Compact);
        assert_eq!(LogStyle::pick(false, false, true), LogStyle::Pretty);
        assert_eq!(LogStyle::pick(false, false, false), LogStyle::Full);
    }

    #[test]
    fn user_config_fills_unset_env() {
        let home = Path::new("/srv/agentplane");
        let cfg = LoggingCfg {
            to_file: Some(true),
            level: Some("debug".into()),
            json: Some(true),
            ..Default::default()
        };
        let opts = LogOptions::resolve(home, Some(&cfg), |_| false);
        assert_eq!(opts.filter, "debug");
        assert_eq!(opts.style, LogStyle::Json);
        assert_eq!(opts.file_dir, Some(home.join("logs")));
    }

    #[test]
    fn set_env_shadows_user_config() {
        let cfg = LoggingCfg {
            level: Some("trace".into()),
            ..Default::default()
        };
        let opts = LogOptions::resolve(Path::new("/tmp"), Some(&cfg), |k| k == "RUST_LOG");
        assert_ne!(opts.filter, "trace");
    }
}
