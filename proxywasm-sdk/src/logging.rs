//! Logging through the host
//!
//! [`log`] writes one line through the `log` import. [`HostLogLayer`] lets
//! filter code use the `tracing` macros instead: each event is formatted as
//! `message key=value ...` and forwarded at the matching host level.

use crate::error::Result;
use crate::hostcall;
use proxywasm_api::{HostError, LogLevel};
use std::fmt::{self, Write as _};
use tracing::field::{Field, Visit};
use tracing::level_filters::LevelFilter;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// Write a log line at `level`
pub fn log(level: LogLevel, message: &str) -> Result<()> {
    hostcall::host()
        .log(level as u32, message.as_bytes())
        .into_result()?;
    Ok(())
}

/// Minimum level the host currently records
pub fn log_level() -> Result<LogLevel> {
    let mut raw = 0;
    hostcall::host().get_log_level(&mut raw).into_result()?;
    LogLevel::try_from(raw).map_err(|_| HostError::BadArgument.into())
}

fn host_level(level: &Level) -> LogLevel {
    match *level {
        Level::TRACE => LogLevel::Trace,
        Level::DEBUG => LogLevel::Debug,
        Level::INFO => LogLevel::Info,
        Level::WARN => LogLevel::Warn,
        Level::ERROR => LogLevel::Error,
    }
}

fn level_filter(level: LogLevel) -> LevelFilter {
    match level {
        LogLevel::Trace => LevelFilter::TRACE,
        LogLevel::Debug => LevelFilter::DEBUG,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Warn => LevelFilter::WARN,
        LogLevel::Error | LogLevel::Critical => LevelFilter::ERROR,
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl LineVisitor {
    fn into_line(self) -> String {
        let mut line = self.message;
        if !self.fields.is_empty() {
            if !line.is_empty() {
                line.push(' ');
            }
            line.push_str(&self.fields);
        }
        line
    }
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            self.record_debug(field, &value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
            return;
        }
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{}={value:?}", field.name());
    }
}

/// `tracing` layer that forwards events to the host `log` import
#[derive(Debug, Default, Clone, Copy)]
pub struct HostLogLayer;

impl<S: Subscriber> Layer<S> for HostLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);
        let _ = log(host_level(event.metadata().level()), &visitor.into_line());
    }
}

/// Install [`HostLogLayer`] as the global subscriber
///
/// Events below the level reported by the host are filtered out before
/// formatting. Calling this more than once is harmless.
pub fn init() {
    let level = log_level().unwrap_or_default();
    let _ = tracing_subscriber::registry()
        .with(HostLogLayer.with_filter(level_filter(level)))
        .try_init();
}

/// Report panics to the host at critical level before the instance traps
pub fn set_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let _ = log(LogLevel::Critical, &info.to_string());
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use proxywasm_api::Status;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Recorder {
        lines: RefCell<Vec<(u32, String)>>,
    }

    impl hostcall::ProxyHost for Recorder {
        fn log(&self, level: u32, message: &[u8]) -> Status {
            self.lines
                .borrow_mut()
                .push((level, String::from_utf8_lossy(message).into_owned()));
            Status::Ok
        }

        fn get_log_level(&self, return_level: &mut u32) -> Status {
            *return_level = LogLevel::Warn as u32;
            Status::Ok
        }
    }

    #[test]
    fn test_log_and_level() {
        let recorder = Rc::new(Recorder::default());
        hostcall::install(recorder.clone());

        log(LogLevel::Error, "upstream reset").expect("Failed to log");
        assert_eq!(log_level().expect("Failed to get level"), LogLevel::Warn);
        assert_eq!(
            *recorder.lines.borrow(),
            vec![(LogLevel::Error as u32, "upstream reset".to_string())]
        );
        hostcall::uninstall();
    }

    #[test]
    fn test_layer_formats_fields() {
        let recorder = Rc::new(Recorder::default());
        hostcall::install(recorder.clone());

        let subscriber = tracing_subscriber::registry().with(HostLogLayer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(context_id = 2, "request rejected");
        });

        assert_eq!(
            *recorder.lines.borrow(),
            vec![(LogLevel::Warn as u32, "request rejected context_id=2".to_string())]
        );
        hostcall::uninstall();
    }

    #[test]
    fn test_detached_log_is_unimplemented() {
        hostcall::uninstall();
        let err = log(LogLevel::Info, "nobody listens").expect_err("log should fail");
        assert!(matches!(err, crate::Error::Host(HostError::Unimplemented)));
    }

    #[test]
    fn test_level_filter_mapping() {
        assert_eq!(level_filter(LogLevel::Critical), LevelFilter::ERROR);
        assert_eq!(level_filter(LogLevel::Debug), LevelFilter::DEBUG);
        assert_eq!(host_level(&Level::INFO), LogLevel::Info);
    }
}
