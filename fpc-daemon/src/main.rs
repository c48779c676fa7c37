//! fpc Daemon (fpcd)
//!
//! Privileged service that attaches the FPC fingerprint sensor and exposes
//! its control attributes over a Unix domain socket.
//!
//! # Responsibilities
//! - **Attach**: acquire the control lines, reset and identify the sensor,
//!   register the key-event device and the interrupt
//! - **Display**: watch the panel blank level and feed it to the engine
//! - **Serve**: answer attribute reads, writes and change waits
//! - **Signals**: detach cleanly on SIGINT/SIGTERM
//!
//! # Hardening Measures
//! - Environment sanitization (clear dangerous env vars)
//! - Resource limits (RLIMIT_NOFILE, RLIMIT_CORE)
//! - Restrictive umask (0077)
//! - Symlink attack prevention on socket creation
//! - Maximum message size enforcement
//! - Connection timeout enforcement

mod display_watch;
mod server;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use fpc_core::constants::{lines, paths};
use fpc_core::{
    AttachOptions, Collaborators, ControlSurface, Device, DeviceConfig, DisplayBus,
    KernelWakeLock, ProcfsPriority, SysfsGpio, UinputRegistrar,
};

use display_watch::DisplayWatch;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Global shutdown flag for clean termination
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

// ============================================================================
// Security Hardening
// ============================================================================

/// Sanitize the process environment by removing dangerous variables
fn sanitize_environment() {
    const DANGEROUS_VARS: &[&str] = &[
        "LD_PRELOAD",
        "LD_LIBRARY_PATH",
        "LD_AUDIT",
        "LD_DEBUG",
        "MALLOC_CHECK_",
        "TMPDIR",
        "IFS",
        "PATH",
    ];

    for var in DANGEROUS_VARS {
        std::env::remove_var(var);
    }
    std::env::set_var("PATH", "/usr/sbin:/usr/bin:/sbin:/bin");
    std::env::set_var("LC_ALL", "C");
}

/// Set restrictive resource limits
fn set_resource_limits() {
    // No core dumps
    set_rlimit(libc::RLIMIT_CORE as i32, 0, 0);

    // Socket, connections, sysfs files, uinput and logging fit comfortably
    set_rlimit(libc::RLIMIT_NOFILE as i32, 256, 256);
}

fn set_rlimit(resource: i32, soft: u64, hard: u64) {
    let limit = libc::rlimit {
        rlim_cur: soft as libc::rlim_t,
        rlim_max: hard as libc::rlim_t,
    };
    // SAFETY: resource is a known RLIMIT_* constant and limit is fully initialized
    unsafe {
        #[allow(clippy::useless_conversion)]
        if libc::setrlimit(resource as libc::__rlimit_resource_t, &limit) != 0 {
            warn!("Failed to set rlimit for resource {}", resource);
        }
    }
}

fn set_secure_umask() {
    // SAFETY: umask only sets the process file creation mask
    unsafe { libc::umask(0o077) };
}

fn secure_working_directory() {
    if std::env::set_current_dir("/").is_err() {
        warn!("Could not chdir to /");
    }
}

/// GPIO export, uinput and setpriority all need root
fn verify_privileges() -> anyhow::Result<()> {
    // SAFETY: geteuid and getuid only return the process's user IDs
    let euid = unsafe { libc::geteuid() };
    let uid = unsafe { libc::getuid() };

    if euid != 0 {
        bail!("Daemon must run as root (euid=0) for GPIO and uinput access");
    }
    if uid != 0 {
        warn!("Running as setuid root - this is not recommended");
    }
    info!("Running as root (uid={}, euid={})", uid, euid);
    Ok(())
}

fn validate_socket_path(path: &Path) -> anyhow::Result<()> {
    let text = path.to_string_lossy();

    if !path.is_absolute() {
        bail!("Socket path must be absolute");
    }
    if text.contains("..") {
        bail!("Socket path contains path traversal");
    }

    let safe_dirs = ["/run/", "/var/run/", "/tmp/"];
    if !safe_dirs.iter().any(|d| text.starts_with(d)) {
        bail!("Socket path must be under {:?}", safe_dirs);
    }

    if let Some(parent) = path.parent() {
        if !parent.exists() {
            bail!("Parent directory does not exist: {:?}", parent);
        }
    }

    if path
        .symlink_metadata()
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
    {
        bail!("Socket path is a symlink - refusing for security");
    }

    Ok(())
}

// ============================================================================
// PID File Management
// ============================================================================

fn write_pid_file(path: &Path) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    if path.exists() {
        if let Ok(content) = std::fs::read_to_string(path) {
            if let Ok(old_pid) = content.trim().parse::<i32>() {
                // SAFETY: signal 0 only probes for the process
                if unsafe { libc::kill(old_pid, 0) } == 0 {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::AddrInUse,
                        format!("Another instance is running (PID {})", old_pid),
                    ));
                }
            }
        }
        let _ = std::fs::remove_file(path);
    }

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o644)
        .open(path)?;

    writeln!(file, "{}", std::process::id())?;
    file.sync_all()?;

    debug!("PID file written: {}", path.display());
    Ok(())
}

fn cleanup(socket_path: &Path, pid_path: &Path) {
    for path in [socket_path, pid_path] {
        if path.exists() {
            if let Err(e) = std::fs::remove_file(path) {
                warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }
    info!("Cleanup complete");
}

// ============================================================================
// CLI
// ============================================================================

struct Args {
    config: PathBuf,
    socket: Option<PathBuf>,
}

fn print_help() {
    eprintln!("fpcd {} - FPC fingerprint sensor control daemon", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    fpcd [OPTIONS]");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    -c, --config PATH   Configuration file (default {})", fpc_core::config_path().display());
    eprintln!("    -s, --socket PATH   Socket path (overrides the configuration)");
    eprintln!("    -f, --foreground    Run in foreground (always on)");
    eprintln!("    -v, --version       Print version");
    eprintln!("    -h, --help          Print this help");
    eprintln!();
    eprintln!("ENVIRONMENT:");
    eprintln!("    FPC_LOG             Log filter (trace, debug, info, warn, error)");
    eprintln!("    FPC_CONFIG          Configuration file path");
}

/// `None` means the process should exit successfully (help or version)
fn parse_args() -> Option<Args> {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args {
        config: fpc_core::config_path(),
        socket: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                return None;
            }
            "-v" | "--version" => {
                println!("fpcd {}", VERSION);
                return None;
            }
            "-f" | "--foreground" => {}
            flag @ ("-c" | "--config" | "-s" | "--socket") => {
                i += 1;
                let Some(value) = args.get(i) else {
                    eprintln!("Error: {} requires a path argument", flag);
                    std::process::exit(1);
                };
                if flag == "-c" || flag == "--config" {
                    parsed.config = PathBuf::from(value);
                } else {
                    parsed.socket = Some(PathBuf::from(value));
                }
            }
            arg => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }
    Some(parsed)
}

// ============================================================================
// Logging
// ============================================================================

/// Journald when available, stdout otherwise. Returns whether journald is used.
fn init_logging(filter: &str) -> bool {
    use tracing_subscriber::prelude::*;

    if Path::new("/run/systemd/journal/socket").exists() {
        match tracing_journald::layer() {
            Ok(journald_layer) => {
                tracing_subscriber::registry()
                    .with(journald_layer)
                    .with(tracing_subscriber::EnvFilter::new(filter))
                    .init();
                return true;
            }
            Err(e) => {
                eprintln!("Failed to create journald layer: {}, falling back to stdout", e);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(filter)
        .init();
    false
}

// ============================================================================
// Attach
// ============================================================================

struct Attached {
    device: Arc<Device>,
    bus: Arc<DisplayBus>,
    wake_lock: Option<Arc<KernelWakeLock>>,
}

fn attach(config: &DeviceConfig) -> anyhow::Result<Attached> {
    let gpio = SysfsGpio::new(config.lines.numbers());
    let irq = gpio
        .edge_interrupt(lines::IRQ)
        .context("Failed to set up interrupt line")?;
    let bus = Arc::new(DisplayBus::new());

    let mut collab = Collaborators::new(
        Arc::new(gpio),
        Arc::new(irq),
        Arc::new(UinputRegistrar::new()),
        Arc::new(ProcfsPriority::new()),
    )
    .with_display(bus.clone());

    let wake_lock = if config.kernel_wake_lock {
        let lock = Arc::new(KernelWakeLock::new());
        if lock.is_available() {
            collab = collab.with_wake_lock(lock.clone());
            Some(lock)
        } else {
            warn!("Kernel wake lock interface not available, suspend is not held off");
            None
        }
    } else {
        None
    };

    let device = Device::attach(collab, AttachOptions::from(config))
        .context("Failed to attach sensor")?;

    Ok(Attached {
        device: Arc::new(device),
        bus,
        wake_lock,
    })
}

/// Detach the sensor, then drop the kernel wake lock. Client tasks may
/// still hold the device (a pending wait runs up to its timeout); they only
/// see a detached device from here on.
fn detach(attached: Attached) {
    let Attached { device, wake_lock, .. } = attached;
    device.detach();
    let holders = Arc::strong_count(&device) - 1;
    if holders > 0 {
        debug!("Device detached with {} client reference(s) outstanding", holders);
    }
    if let Some(lock) = wake_lock {
        lock.release();
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main(flavor = "current_thread")]
async fn main() {
    std::panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());
        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        eprintln!("PANIC at {}: {}", location, message);
    }));

    // The configuration path may come from the environment, read it first
    let Some(args) = parse_args() else {
        return;
    };

    sanitize_environment();
    set_secure_umask();
    set_resource_limits();
    secure_working_directory();

    let log_filter = std::env::var("FPC_LOG").unwrap_or_else(|_| "info".to_string());
    let use_journald = init_logging(&log_filter);

    info!("STARTUP: fpcd {} starting", VERSION);
    info!("STARTUP: Logging to {}", if use_journald { "systemd journal" } else { "stdout" });

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    verify_privileges()?;

    let config = fpc_core::load_config(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    config.validate().context("Invalid configuration")?;
    info!("STARTUP: Configuration {}", args.config.display());

    let socket_path = args.socket.unwrap_or_else(|| config.socket_path.clone());
    validate_socket_path(&socket_path)?;

    let pid_path = PathBuf::from(paths::PID_FILE);
    write_pid_file(&pid_path).context("Could not write PID file")?;

    let shutdown = Arc::new(Notify::new());
    let handler_shutdown = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("SIGNAL: Received SIGINT/SIGTERM - initiating shutdown");
        SHUTDOWN.store(true, Ordering::SeqCst);
        // Stores a permit if the server is not waiting yet
        handler_shutdown.notify_one();
    }) {
        warn!("Failed to set signal handler: {}. Shutdown via signals may not work cleanly.", e);
    }

    let attached = match attach(&config) {
        Ok(a) => a,
        Err(e) => {
            cleanup(&socket_path, &pid_path);
            return Err(e);
        }
    };

    let watch_stop = Arc::new(AtomicBool::new(false));
    let watch = DisplayWatch::new(
        config.display_state_path.clone(),
        config.display_poll_interval(),
        attached.bus.clone(),
    );
    let watch_handle = tokio::spawn(watch.run(watch_stop.clone()));

    info!("STARTUP: Socket path: {}", socket_path.display());
    info!("STARTUP: PID: {}", std::process::id());

    let surface = ControlSurface::new(attached.device.clone());
    let socket_str = socket_path.to_string_lossy().into_owned();
    let result = server::run_server(&socket_str, surface, shutdown).await;

    watch_stop.store(true, Ordering::SeqCst);
    let _ = watch_handle.await;

    detach(attached);
    cleanup(&socket_path, &pid_path);
    info!("SHUTDOWN: fpcd stopped (signal: {})", SHUTDOWN.load(Ordering::SeqCst));

    result.map_err(|e| anyhow::anyhow!("Server error: {}", e))
}
