use miette::{IntoDiagnostic, Result, WrapErr};
use owo_colors::OwoColorize;
use time::{macros::format_description, OffsetDateTime, Time, UtcOffset};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{
    fmt::{format, FmtContext, FormatEvent, FormatFields, FormattedFields},
    registry::LookupSpan,
    FmtSubscriber,
};

/// Initialize the logging system.
///
/// Must be called before any other thread is spawned:
/// the local time offset can only be read safely from a single-threaded process.
pub fn init_logging(level: Level) -> Result<()> {
    let local_offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);

    let subscriber = FmtSubscriber::builder()
        .event_format(PrettyLogger {
            offset: local_offset,
        })
        .with_max_level(level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .into_diagnostic()
        .wrap_err("Setting default subscriber failed")
}

/// `HH:MM:SS LEVEL thread span{fields}:span{fields}: message`
struct PrettyLogger {
    offset: UtcOffset,
}

fn clock(time: Time) -> Result<String, time::error::Format> {
    time.format(format_description!("[hour]:[minute]:[second]"))
}

impl<S, N> FormatEvent<S, N> for PrettyLogger
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();

        let now = OffsetDateTime::now_utc().to_offset(self.offset).time();
        let now = clock(now).map_err(|_| std::fmt::Error)?;
        let thread = std::thread::current();
        let thread_name = thread.name().unwrap_or("unnamed");

        if writer.has_ansi_escapes() {
            let level = match *metadata.level() {
                Level::ERROR => metadata.level().red().to_string(),
                Level::WARN => metadata.level().yellow().to_string(),
                Level::DEBUG | Level::TRACE => metadata.level().blue().to_string(),
                _ => metadata.level().green().to_string(),
            };

            write!(&mut writer, "{} {:>5} {} ", now, level, thread_name.yellow())?;
        } else {
            write!(&mut writer, "{} {:>5} {} ", now, metadata.level(), thread_name)?;
        }

        // The request the event belongs to, if any
        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                let exts = span.extensions();
                match exts.get::<FormattedFields<N>>() {
                    Some(fields) if !fields.is_empty() => {
                        write!(writer, "{}{{{}}}: ", span.name(), fields)?
                    }
                    _ => write!(writer, "{}: ", span.name())?,
                }
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}
