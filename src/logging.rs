use tracing_indicatif::IndicatifLayer;
use tracing_indicatif::style::ProgressStyle;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Environment variable holding filter directives, e.g. `vecscope=trace`.
pub const LOG_ENV_VAR: &str = "VECSCOPE_LOG";

/// Install the global subscriber.
///
/// `level` comes from the `-v`/`-q` flags and only applies when `VECSCOPE_LOG`
/// is unset or unparsable.
pub fn setup_logger(level: LevelFilter, ansi: bool) {
    let indicatif_layer = IndicatifLayer::new();

    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .with_env_var(LOG_ENV_VAR)
        .from_env_lossy();

    let fmt = fmt::layer()
        .with_ansi(ansi)
        .with_target(true)
        .with_file(cfg!(debug_assertions))
        .with_line_number(cfg!(debug_assertions))
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_writer(indicatif_layer.get_stderr_writer())
        .pretty();

    tracing_subscriber::registry()
        .with(fmt) // Direct fmt logs to stderr writer
        .with(indicatif_layer)
        .with(env_filter)
        .init();
}

/// Bar style shared by the long-running analysis loops.
pub fn progress_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{span_child_prefix}{span_name} [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
    )
    .map(|style| style.progress_chars("=> "))
    .unwrap_or_else(|_| ProgressStyle::default_bar())
}
