use camino::Utf8Path;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt};

/// Log to the console and, optionally, a file.
///
/// The filter comes from `RUST_LOG` and defaults to `info`.
pub fn init(log_file: Option<&Utf8Path>) -> eyre::Result<()> {
    let file_layer = match log_file {
        Some(path) => {
            let file = std::fs::File::create(path)?;
            Some(
                fmt::layer()
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false)
                    .with_file(true)
                    .with_line_number(true),
            )
        }
        None => None,
    };

    let with_ansi = !cfg!(windows);
    let console_layer = fmt::layer().with_ansi(with_ansi).with_target(false);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let collector = tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .with(filter);
    tracing::subscriber::set_global_default(collector)?;

    if let Some(path) = log_file {
        tracing::debug!("Logging initiated to file \"{path}\".");
    }
    Ok(())
}
