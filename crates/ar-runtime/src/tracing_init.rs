use std::io::IsTerminal as _;
use std::path::Path;

use anyhow::{Context as _, Result};
use chrono::Utc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Metadata, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Context, Filter, Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use ar_config::{LOG_DOMAINS, LogFormat, LoggingConfig};

// ---------------------------------------------------------------------------
// DomainFilter — per-domain verbosity, keyed on the event's `domain` field
// ---------------------------------------------------------------------------

/// Filters events by the relay's `domain` field value.
///
/// `logging.level` is the baseline; `logging.domains` raises or lowers
/// individual domains. Events without a `domain` field (dependencies) get
/// the baseline. Callsites are gated coarsely at the most verbose
/// configured level so disabled levels still skip early; the per-domain cut
/// happens in [`event_enabled`](Filter::event_enabled), where field values
/// are available.
struct DomainFilter {
    base: LevelFilter,
    overrides: Vec<(String, LevelFilter)>,
    /// Most verbose of `base` and all overrides.
    ceiling: LevelFilter,
}

impl DomainFilter {
    fn from_config(config: &LoggingConfig) -> Result<Self> {
        let base = parse_level(&config.level)?;
        let mut overrides = Vec::with_capacity(config.domains.len());
        for (domain, level) in &config.domains {
            if !LOG_DOMAINS.contains(&domain.as_str()) {
                anyhow::bail!("unknown log domain {domain:?}");
            }
            overrides.push((domain.clone(), parse_level(level)?));
        }
        let ceiling = overrides
            .iter()
            .map(|(_, limit)| *limit)
            .chain([base])
            .max()
            .unwrap_or(base);
        Ok(Self {
            base,
            overrides,
            ceiling,
        })
    }

    fn limit_for(&self, domain: Option<&str>) -> LevelFilter {
        let Some(domain) = domain else {
            return self.base;
        };
        self.overrides
            .iter()
            .find(|(name, _)| name == domain)
            .map(|(_, limit)| *limit)
            .unwrap_or(self.base)
    }
}

impl<S: Subscriber> Filter<S> for DomainFilter {
    fn enabled(&self, meta: &Metadata<'_>, _cx: &Context<'_, S>) -> bool {
        *meta.level() <= self.ceiling
    }

    fn event_enabled(&self, event: &Event<'_>, _cx: &Context<'_, S>) -> bool {
        let mut probe = DomainProbe::default();
        event.record(&mut probe);
        *event.metadata().level() <= self.limit_for(probe.domain.as_deref())
    }

    fn max_level_hint(&self) -> Option<LevelFilter> {
        Some(self.ceiling)
    }
}

/// Visitor that reads nothing but the `domain` field.
#[derive(Default)]
struct DomainProbe {
    domain: Option<String>,
}

impl Visit for DomainProbe {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "domain" {
            self.domain = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, _field: &Field, _value: &dyn std::fmt::Debug) {}
}

fn parse_level(level: &str) -> Result<LevelFilter> {
    level
        .parse()
        .map_err(|_| anyhow::anyhow!("unknown log level {level:?}"))
}

// ---------------------------------------------------------------------------
// RelayFilter — RUST_LOG wins over the config-driven domain filter
// ---------------------------------------------------------------------------

enum RelayFilter {
    Env(EnvFilter),
    Domain(DomainFilter),
}

impl RelayFilter {
    fn from_env_or_config(config: &LoggingConfig) -> Result<Self> {
        if std::env::var("RUST_LOG").is_ok() {
            Ok(Self::Env(EnvFilter::from_default_env()))
        } else {
            Ok(Self::Domain(DomainFilter::from_config(config)?))
        }
    }
}

impl<S: Subscriber> Filter<S> for RelayFilter {
    fn enabled(&self, meta: &Metadata<'_>, cx: &Context<'_, S>) -> bool {
        match self {
            Self::Env(f) => Filter::<S>::enabled(f, meta, cx),
            Self::Domain(f) => Filter::<S>::enabled(f, meta, cx),
        }
    }

    fn event_enabled(&self, event: &Event<'_>, cx: &Context<'_, S>) -> bool {
        match self {
            Self::Env(f) => Filter::<S>::event_enabled(f, event, cx),
            Self::Domain(f) => Filter::<S>::event_enabled(f, event, cx),
        }
    }

    fn max_level_hint(&self) -> Option<LevelFilter> {
        match self {
            Self::Env(f) => Filter::<Registry>::max_level_hint(f),
            Self::Domain(f) => Filter::<Registry>::max_level_hint(f),
        }
    }
}

// ---------------------------------------------------------------------------
// RelayFormat — one event per line, domain tag up front
// ---------------------------------------------------------------------------

/// Plain-text event layout:
///
/// ```text
/// 2026-03-01T10:17:14.201Z  INFO pipe| pipeline: group fired receiver=slack-prod alerts=2
/// ```
///
/// UTC timestamp, level, fixed-width domain tag, dotted span chain, message,
/// then the remaining fields. Events from dependencies carry `-` as the
/// domain tag.
struct RelayFormat;

impl<S, N> fmt::FormatEvent<S, N> for RelayFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'writer> fmt::FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        ctx: &fmt::FmtContext<'_, S, N>,
        mut writer: fmt::format::Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let ansi = writer.has_ansi_escapes();

        let mut bag = FieldBag::default();
        event.record(&mut bag);

        write!(writer, "{}", Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"))?;

        let level = *event.metadata().level();
        if ansi {
            write!(writer, " \x1b[{}m{level:>5}\x1b[0m", level_color(level))?;
        } else {
            write!(writer, " {level:>5}")?;
        }

        let domain = bag.domain.as_deref().unwrap_or("-");
        if ansi {
            write!(writer, " \x1b[1m{domain:<4}\x1b[0m|")?;
        } else {
            write!(writer, " {domain:<4}|")?;
        }

        if let Some(scope) = ctx.event_scope() {
            write!(writer, " ")?;
            let mut sep = "";
            for span in scope.from_root() {
                write!(writer, "{sep}{}", span.name())?;
                sep = ".";
            }
            write!(writer, ":")?;
        }

        write!(writer, " {}", bag.message)?;
        for (name, value) in &bag.fields {
            if ansi {
                write!(writer, " \x1b[2m{name}={value}\x1b[0m")?;
            } else {
                write!(writer, " {name}={value}")?;
            }
        }
        writeln!(writer)
    }
}

fn level_color(level: Level) -> &'static str {
    match level {
        Level::ERROR => "1;31",
        Level::WARN => "1;33",
        Level::INFO => "32",
        Level::DEBUG => "36",
        Level::TRACE => "90",
    }
}

/// Collects an event's fields in one pass. Non-string values arrive through
/// `record_debug` (the `Visit` trait routes the numeric callbacks there by
/// default), so two methods cover everything.
#[derive(Default)]
struct FieldBag {
    domain: Option<String>,
    message: String,
    fields: Vec<(String, String)>,
}

impl Visit for FieldBag {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "domain" => self.domain = Some(value.to_string()),
            "message" => self.message = value.to_string(),
            name => self.fields.push((name.to_string(), value.to_string())),
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let rendered = format!("{value:?}");
        match field.name() {
            "domain" => self.domain = Some(rendered.trim_matches('"').to_string()),
            "message" => self.message = rendered,
            name => self.fields.push((name.to_string(), rendered)),
        }
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Initialise the `tracing` subscriber stack from [`LoggingConfig`].
///
/// One output layer per destination (stderr always, a non-blocking file
/// when configured), each carrying its own [`RelayFilter`]. Returns the
/// [`WorkerGuard`] that must live until process exit — dropping it flushes
/// the file writer.
pub fn init_tracing(config: &LoggingConfig, base_dir: &Path) -> Result<Option<WorkerGuard>> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::with_capacity(2);
    layers.push(output_layer(
        config,
        std::io::stderr,
        std::io::stderr().is_terminal(),
    )?);

    let mut guard = None;
    if let Some(ref file_path) = config.file {
        let resolved = if file_path.is_relative() {
            base_dir.join(file_path)
        } else {
            file_path.clone()
        };
        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating log directory {}", parent.display()))?;
        }
        let file_name = resolved
            .file_name()
            .context("log file path has no file name")?
            .to_os_string();
        let dir = resolved
            .parent()
            .context("log file path has no parent directory")?;

        let (non_blocking, file_guard) =
            tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
        guard = Some(file_guard);
        layers.push(output_layer(config, non_blocking, false)?);
    }

    tracing_subscriber::registry().with(layers).init();
    Ok(guard)
}

/// Build one filtered output layer for the given writer.
fn output_layer<W>(
    config: &LoggingConfig,
    writer: W,
    ansi: bool,
) -> Result<Box<dyn Layer<Registry> + Send + Sync>>
where
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    let filter = RelayFilter::from_env_or_config(config)?;
    let layer = match config.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(false)
            .with_ansi(false)
            .with_writer(writer)
            .with_filter(filter)
            .boxed(),
        LogFormat::Plain => fmt::layer()
            .event_format(RelayFormat)
            .with_ansi(ansi)
            .with_writer(writer)
            .with_filter(filter)
            .boxed(),
    };
    Ok(layer)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn config(level: &str, domains: &[(&str, &str)]) -> LoggingConfig {
        LoggingConfig {
            level: level.to_string(),
            domains: domains
                .iter()
                .map(|(d, l)| (d.to_string(), l.to_string()))
                .collect::<BTreeMap<_, _>>(),
            file: None,
            format: LogFormat::Plain,
        }
    }

    #[test]
    fn baseline_applies_without_overrides() {
        let f = DomainFilter::from_config(&config("info", &[])).unwrap();
        assert_eq!(f.limit_for(Some("pipe")), LevelFilter::INFO);
        assert_eq!(f.limit_for(None), LevelFilter::INFO);
        assert_eq!(f.ceiling, LevelFilter::INFO);
    }

    #[test]
    fn override_raises_one_domain() {
        let f = DomainFilter::from_config(&config("warn", &[("pipe", "debug")])).unwrap();
        assert_eq!(f.limit_for(Some("pipe")), LevelFilter::DEBUG);
        assert_eq!(f.limit_for(Some("pub")), LevelFilter::WARN);
        assert_eq!(f.limit_for(None), LevelFilter::WARN);
        // The callsite gate must admit the most verbose override.
        assert_eq!(f.ceiling, LevelFilter::DEBUG);
    }

    #[test]
    fn override_can_mute_a_domain() {
        let f = DomainFilter::from_config(&config("debug", &[("conn", "off")])).unwrap();
        assert_eq!(f.limit_for(Some("conn")), LevelFilter::OFF);
        assert_eq!(f.ceiling, LevelFilter::DEBUG);
    }

    #[test]
    fn bad_config_rejected() {
        assert!(DomainFilter::from_config(&config("loud", &[])).is_err());
        assert!(DomainFilter::from_config(&config("info", &[("engine", "debug")])).is_err());
    }
}
