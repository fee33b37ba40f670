use std::io;

use fern::{
    colors::{Color, ColoredLevelConfig},
    Dispatch,
};
use log::LevelFilter;

#[derive(Debug, thiserror::Error)]
pub enum LoggerInitError {
    #[error(transparent)]
    LogError(#[from] log::SetLoggerError),
    #[error(transparent)]
    IoError(#[from] io::Error),
}

/// Installs the global logger. Mirrors the host-facing contract: every
/// fallible operation in the core logs through this sink rather than
/// propagating across the host boundary.
pub fn init_logger(level: LevelFilter, path: Option<&str>) -> Result<(), LoggerInitError> {
    let colors = ColoredLevelConfig::new()
        .info(Color::Green)
        .warn(Color::Yellow)
        .error(Color::Red)
        .debug(Color::Blue)
        .trace(Color::Black);

    let mut dispatch = Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "[{}] - ({}) - {}",
                colors.color(record.level()),
                record.target(),
                message
            ))
        })
        .level(level)
        // wgpu is extremely chatty at Info/Debug; the core only cares about
        // its own log lines at those levels.
        .level_for("wgpu", LevelFilter::Warn)
        .level_for("wgpu_core", LevelFilter::Warn)
        .level_for("wgpu_hal", LevelFilter::Warn)
        .chain(io::stdout());

    if let Some(path) = path {
        dispatch = dispatch.chain(fern::DateBased::new(path, "%Y-%m-%d-framecap.log"));
    }

    dispatch.apply()?;
    Ok(())
}

/// Installs a panic hook that logs the panic location and payload instead
/// of letting it print to stderr and unwind into the host process.
pub fn enable_panic_logger() {
    std::panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(|it| format!("{}:{}", it.file(), it.line()))
            .unwrap_or_else(|| "unknown".to_string());

        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .map(|it| it.to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());

        log::error!("panic at {}: {}", location, payload);
    }));
}
