use std::{
    env,
    fs,
    net::SocketAddr,
    panic,
    path::{Path, PathBuf},
    str::FromStr,
};
use tokio::net::TcpListener;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

pub struct TracingGuards {
    _file_guard: Option<WorkerGuard>,
}

#[derive(Clone, Debug, Default)]
pub struct LogOptions {
    pub debug: bool,
    pub file: Option<PathBuf>,
}

pub fn init_tracing(service_name: &str, options: &LogOptions) -> TracingGuards {
    // RUST_LOG wins; otherwise the debug toggle picks the default level.
    let default_level = if options.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);
    let mut file_guard: Option<WorkerGuard> = None;
    let mut file_layer = None;

    if let Some(path) = options.file.as_deref() {
        if let Some(appender) = open_log_file(path) {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            file_layer = Some(fmt::layer().with_ansi(false).with_writer(writer));
            file_guard = Some(guard);
        } else {
            eprintln!(
                "{service_name}: cannot open log file {}, logging to stdout only",
                path.display()
            );
        }
    }

    if let Some(layer) = file_layer {
        let subscriber = Registry::default()
            .with(filter)
            .with(stdout_layer)
            .with(layer);
        let _ = tracing::subscriber::set_global_default(subscriber);
    } else {
        let subscriber = Registry::default().with(filter).with(stdout_layer);
        let _ = tracing::subscriber::set_global_default(subscriber);
    }

    TracingGuards {
        _file_guard: file_guard,
    }
}

fn open_log_file(path: &Path) -> Option<tracing_appender::rolling::RollingFileAppender> {
    let file_name = path.file_name()?.to_owned();
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&directory).ok()?;
    // The appender panics when the file cannot be opened.
    panic::catch_unwind(|| tracing_appender::rolling::never(&directory, &file_name)).ok()
}

pub fn env_or<T: FromStr>(key: &str, default: T) -> T {
    // Parse typed environment values with a fallback.
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<T>().ok())
        .unwrap_or(default)
}

pub fn env_flag(key: &str) -> bool {
    env::var(key)
        .map(|value| parse_flag(&value))
        .unwrap_or(false)
}

pub fn env_non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

pub async fn bind_listener(port: u16) -> TcpListener {
    // Bind on all interfaces for container compatibility.
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    TcpListener::bind(addr).await.expect("bind listener")
}

pub async fn shutdown_signal() {
    // Handle ctrl-c and SIGTERM to allow graceful shutdown.
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("sigterm handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }

    tracing::info!("shutdown signal received");
}
