//! Install-once stderr logger for the reading pipeline.
//!
//! Records from the `gabarito*` crates pass at the configured level; records
//! from image decoders and other dependencies are capped at `Warn` so a
//! `Debug` run shows the locator's decisions and not PNG chunk traces.
//! Lines look like `[  0.012s DEBUG gabarito_sheet::locate] message`.

use std::io::Write;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Instant;

use log::{LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::util::SubscriberInitExt;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable read by [`init_from_env`] and [`init_tracing`].
pub const LEVEL_ENV: &str = "GABARITO_LOG";

const PIPELINE_TARGET: &str = "gabarito";

#[cfg(feature = "tracing")]
const DEFAULT_DIRECTIVES: &str = "warn,gabarito=info,gabarito_core=info,gabarito_sheet=info";

struct PipelineLogger {
    level: LevelFilter,
    started: Instant,
}

impl PipelineLogger {
    fn cap_for(&self, target: &str) -> LevelFilter {
        if target.starts_with(PIPELINE_TARGET) {
            self.level
        } else {
            self.level.min(LevelFilter::Warn)
        }
    }
}

impl Log for PipelineLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.cap_for(metadata.target())
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let elapsed = self.started.elapsed().as_secs_f64();
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(
            stderr,
            "[{:7.3}s {:>5} {}] {}",
            elapsed,
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: OnceLock<PipelineLogger> = OnceLock::new();

/// Install the stderr logger with the provided level filter.
///
/// Calling this more than once is a no-op after the first successful
/// initialization; the first level wins.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_none() {
        let logger = LOGGER.get_or_init(|| PipelineLogger {
            level,
            started: Instant::now(),
        });
        log::set_logger(logger)?;
        log::set_max_level(level);
    }
    Ok(())
}

/// Level named by `value` (`off`, `error`, ..., `trace`); `Info` when unset
/// or unparsable.
fn level_from(value: Option<&str>) -> LevelFilter {
    value
        .and_then(|v| LevelFilter::from_str(v.trim()).ok())
        .unwrap_or(LevelFilter::Info)
}

/// Install the stderr logger at the level in `GABARITO_LOG`.
pub fn init_from_env() -> Result<(), log::SetLoggerError> {
    let value = std::env::var(LEVEL_ENV).ok();
    init_with_level(level_from(value.as_deref()))
}

/// Install a `tracing` subscriber filtered by `GABARITO_LOG` directives
/// (default: pipeline crates at `info`, everything else at `warn`).
///
/// With `json = true` events and closed stage spans are emitted as flat JSON
/// lines for per-stage timing collection. Returns `false` when a global
/// subscriber was already installed.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool) -> bool {
    let filter =
        EnvFilter::try_from_env(LEVEL_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));
    let builder = fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE);
    if json {
        builder.json().flatten_event(true).finish().try_init().is_ok()
    } else {
        builder
            .with_timer(fmt::time::Uptime::default())
            .finish()
            .try_init()
            .is_ok()
    }
}
