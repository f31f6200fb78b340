use crate::config::MgSettings;
use std::env;
use std::fs;
use std::path::Path;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

const DEFAULT_FILTER: &str = "info,mg_reach=debug";

/// Initialize logging: console output plus an optional session log file.
///
/// `RUST_LOG` overrides the default filter. Calling this twice is harmless,
/// the second subscriber is rejected and a warning is printed.
pub fn init_logging(log_file: Option<&Path>) {
    let enable_backtrace = env::var("RUST_BACKTRACE").unwrap_or_else(|_| "0".to_string()) == "1";

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let console_layer = fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_ansi(true);

    // Remove the previous session's file so each run starts clean
    let file_layer = log_file.and_then(|path| {
        if let Err(e) = fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                eprintln!("Warning: Failed to remove existing {}: {}", path.display(), e);
            }
        }
        match fs::File::create(path) {
            Ok(file) => Some(
                fmt::layer()
                    .with_writer(std::sync::Mutex::new(file))
                    .with_target(true)
                    .with_thread_names(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_ansi(false) // No ANSI codes in file
                    .boxed(),
            ),
            Err(e) => {
                eprintln!("Warning: Failed to create log file {}: {}", path.display(), e);
                None
            }
        }
    });

    let result = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    if let Err(e) = result {
        eprintln!("Warning: logging already initialized: {}", e);
        return;
    }

    std::panic::set_hook(Box::new(move |panic_info| {
        tracing::error!("Panic occurred: {}", panic_info);

        if let Some(location) = panic_info.location() {
            tracing::error!(
                "Panic location: {}:{}:{}",
                location.file(),
                location.line(),
                location.column()
            );
        }

        if enable_backtrace {
            tracing::error!("Backtrace:\n{:?}", std::backtrace::Backtrace::capture());
        }
    }));

    tracing::info!("Logging initialized");
    if let Some(path) = log_file {
        tracing::info!("File logging enabled: {}", path.display());
    }
    tracing::info!("Backtrace enabled: {}", enable_backtrace);
}

/// Log the tuning parameters that shape planner and IK behaviour
pub fn log_settings_summary(settings: &MgSettings) {
    tracing::info!("=== Reach MMU Settings ===");
    match &settings.model_file {
        Some(path) => tracing::info!("Model file: {}", path.display()),
        None => tracing::info!("Model file: <built-in demo graph>"),
    }
    tracing::info!("Target scale: {}", settings.target_to_mmu_scale);
    tracing::info!(
        "State queries: {} x {}ms, pose buffer: {}",
        settings.state_machine.n_max_state_queries,
        settings.state_machine.state_query_interval_ms,
        settings.state_machine.buffer_size
    );
    tracing::info!(
        "Planner: {} samples, transition window {}, interpolation window {}",
        settings.planner.n_random_samples,
        settings.planner.transition_window,
        settings.planner.interpolation_window
    );
    tracing::info!(
        "IK: eps {}, rotation distance {}, {} iterations, target speed {}",
        settings.ik.eps,
        settings.ik.rotation_distance,
        settings.ik.max_ik_iter,
        settings.ik.secondary_target_speed
    );
    tracing::info!("Grounding: {}", settings.activate_grounding);
    tracing::info!("Sampling threads: {}", settings.concurrency.job_threads);
    tracing::info!("==========================");
}
