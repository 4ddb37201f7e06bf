//! src/logging.rs
//! Tracing bootstrap: daily rolling file plus optional stderr, both written
//! with a compact sequence-numbered line format.

use std::{
    fs,
    sync::OnceLock,
    sync::atomic::{AtomicUsize, Ordering},
};

use tracing::Metadata;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, daily},
};
use tracing_subscriber::{
    EnvFilter,
    fmt::{
        self, FmtContext,
        format::{FormatEvent, FormatFields, Writer},
    },
    layer::SubscriberExt,
    prelude::*,
};

use crate::config::LoggingConfig;
use crate::error::{AppError, AppResult};

pub struct Logger;

impl Logger {
    /// Call **once** at startup. Keep the returned guard alive for the
    /// lifetime of the process or buffered file lines are lost.
    pub fn init_tracing(config: &LoggingConfig) -> AppResult<WorkerGuard> {
        if SEQ.get().is_some() {
            return Err(AppError::Logging("logger already initialised".into()));
        }

        fs::create_dir_all(&config.log_dir)?;
        SEQ.get_or_init(|| AtomicUsize::new(1));

        // daily rolling file appender → <log_dir>/<prefix>.YYYY-MM-DD
        let file: RollingFileAppender = daily(&config.log_dir, &config.file_prefix);
        let (writer, guard) = tracing_appender::non_blocking(file);

        let file_layer = fmt::layer()
            .event_format(SeqFileMod)
            .with_writer(writer)
            .with_ansi(false)
            .with_filter(Self::filter(&config.level)?);

        let stderr_layer = config.stderr.then(|| {
            fmt::layer()
                .event_format(SeqFileMod)
                .with_writer(std::io::stderr)
                .with_ansi(true)
        });

        tracing_subscriber::registry()
            .with(file_layer)
            .with(stderr_layer.with_filter(Self::filter(&config.level)?))
            .try_init()
            .map_err(|e| AppError::Logging(e.to_string()))?;

        Ok(guard)
    }

    /// `RUST_LOG` wins; otherwise the configured level.
    fn filter(level: &str) -> AppResult<EnvFilter> {
        let directive = level
            .parse()
            .map_err(|e| AppError::Logging(format!("bad log level '{level}': {e}")))?;
        Ok(EnvFilter::from_default_env().add_directive(directive))
    }
}

static SEQ: OnceLock<AtomicUsize> = OnceLock::new();

/// Custom formatter: `[SEQ] LEVEL [file:line mod::path] message`
struct SeqFileMod;

impl<S, N> FormatEvent<S, N> for SeqFileMod
where
    S: tracing::Subscriber + for<'lookup> tracing_subscriber::registry::LookupSpan<'lookup>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut w: Writer<'_>,
        ev: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        // monotonically‑increasing sequence number
        let seq: usize = SEQ
            .get()
            .map_or(0, |seq| seq.fetch_add(1, Ordering::Relaxed));

        let meta: &'static Metadata<'static> = ev.metadata();
        write!(
            w,
            "{seq:06} {:5} [{}:{} {}] ",
            meta.level(),
            meta.file().unwrap_or("??"),
            meta.line().unwrap_or(0),
            meta.module_path().unwrap_or("???"),
        )?;

        ctx.field_format().format_fields(w.by_ref(), ev)?;
        writeln!(w)
    }
}
