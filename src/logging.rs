use miette::{Context, IntoDiagnostic, Result};
use owo_colors::OwoColorize;
use time::{
    format_description::{self, FormatItem},
    OffsetDateTime, UtcOffset,
};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{
    fmt::{format, FmtContext, FormatEvent, FormatFields},
    registry::LookupSpan,
    FmtSubscriber,
};

/// Initialize the logging system, writing to stderr so that
/// the JSON results on stdout stay machine-readable
pub fn init_logging(level: Level) -> Result<()> {
    // Getting the offset fails on some platforms once threads are spawned,
    // which is harmless here: fall back to UTC
    let local_offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);

    let formatter = PipelineLogFormat::new(local_offset)?;

    let subscriber = FmtSubscriber::builder()
        .event_format(formatter)
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .into_diagnostic()
        .wrap_err("Setting default subscriber failed")
}

/// One line per event: `time level thread target: fields`
struct PipelineLogFormat {
    offset: UtcOffset,
    time_format: Vec<FormatItem<'static>>,
}

impl PipelineLogFormat {
    fn new(offset: UtcOffset) -> Result<Self> {
        Ok(Self {
            offset,
            time_format: format_description::parse("[hour]:[minute]:[second]")
                .into_diagnostic()
                .wrap_err("Invalid log time format")?,
        })
    }
}

impl<S, N> FormatEvent<S, N> for PipelineLogFormat
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

        let now = OffsetDateTime::now_utc()
            .to_offset(self.offset)
            .time()
            .format(&self.time_format)
            .map_err(|_| std::fmt::Error)?;
        let thread = std::thread::current();
        let thread_name = thread.name().unwrap_or("worker");

        // Only keep the last module of the target, the crate name is always the same
        let target = metadata
            .target()
            .rsplit("::")
            .next()
            .unwrap_or_else(|| metadata.target());

        if writer.has_ansi_escapes() {
            let level = match *metadata.level() {
                Level::ERROR => metadata.level().red().to_string(),
                Level::WARN => metadata.level().yellow().to_string(),
                Level::DEBUG => metadata.level().blue().to_string(),
                Level::TRACE => metadata.level().magenta().to_string(),
                _ => metadata.level().green().to_string(),
            };

            write!(
                &mut writer,
                "{} {:>5} {} {}: ",
                now,
                level,
                thread_name.yellow(),
                target.dimmed(),
            )?;
        } else {
            write!(
                &mut writer,
                "{} {:>5} {} {}: ",
                now,
                metadata.level(),
                thread_name,
                target,
            )?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}
