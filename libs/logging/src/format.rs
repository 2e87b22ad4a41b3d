use std::fmt;

use nu_ansi_term::{Color, Style};
use tracing::{Event, Level, Subscriber};
use tracing_log::NormalizeEvent as _;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, FormattedFields};
use tracing_subscriber::registry::LookupSpan;

/// Compact event format shared by the stdout and file layers.
///
/// Renders an ISO8601 timestamp, the level, the event's target, the
/// message and fields, and then the fields of every active span. Span
/// names themselves are not rendered; the span *fields* carry the
/// useful context (peer ids, device ids) and the names would only
/// repeat the target.
#[derive(Default)]
pub struct Format {
    _private: (),
}

impl Format {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<S, N> FormatEvent<S, N> for Format
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        // `log`-originated events carry their metadata in a side channel.
        let normalized_meta = event.normalized_metadata();
        let meta = normalized_meta.as_ref().unwrap_or_else(|| event.metadata());

        let dimmed = if writer.has_ansi_escapes() {
            Style::new().dimmed()
        } else {
            Style::new()
        };

        let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");
        write!(writer, "{} ", dimmed.paint(timestamp.to_string()))?;

        write_level(&mut writer, meta.level())?;

        write!(writer, "{}{} ", dimmed.paint(meta.target()), dimmed.paint(":"))?;

        ctx.format_fields(writer.by_ref(), event)?;

        for span in ctx
            .event_scope()
            .into_iter()
            .flat_map(tracing_subscriber::registry::Scope::from_root)
        {
            let exts = span.extensions();
            if let Some(fields) = exts.get::<FormattedFields<N>>() {
                if !fields.is_empty() {
                    write!(writer, " {}", fields.fields)?;
                }
            }
        }

        writeln!(writer)
    }
}

fn write_level(writer: &mut Writer<'_>, level: &Level) -> fmt::Result {
    // Right-aligned to 5 characters so messages line up across levels.
    let (text, color) = match *level {
        Level::TRACE => ("TRACE", Color::Purple),
        Level::DEBUG => ("DEBUG", Color::Blue),
        Level::INFO => (" INFO", Color::Green),
        Level::WARN => (" WARN", Color::Yellow),
        Level::ERROR => ("ERROR", Color::Red),
    };

    if writer.has_ansi_escapes() {
        write!(writer, "{} ", color.paint(text))
    } else {
        write!(writer, "{text} ")
    }
}
