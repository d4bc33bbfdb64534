//! rdpbridge demo
//!
//! Runs one or more sessions against the simulated engine and prints each
//! lifecycle step as it is reported.
//!
//! ```text
//! rdpbridge                  # One session, full connect / disconnect cycle
//! rdpbridge -n 3             # Three concurrent sessions
//! rdpbridge --deny-cert      # Reject the server certificate
//! rdpbridge --cancel         # Cancel while connecting
//! ```

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseButton, MouseEvent, MouseEventKind};
use crossterm::style::Stylize;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use rdpbridge::engine::sim::{SimulatedEngine, SimulatedServer};
use rdpbridge::input::InputMapper;
use rdpbridge::{
    BridgeConfig, CertificateInfo, ConnectionProfile, Credentials, EventListener, Handle,
    LifecycleStatus, PixelBuffer, PixelFormat, RdpBridge, Rect, UiEventListener,
};

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long to wait for a session to settle
const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Demo options
struct Options {
    sessions: usize,
    profile: Option<PathBuf>,
    config: Option<PathBuf>,
    cancel: bool,
    deny_cert: bool,
    fail: bool,
    inline: bool,
    frames: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            sessions: 1,
            profile: None,
            config: None,
            cancel: false,
            deny_cert: false,
            fail: false,
            inline: false,
            frames: 3,
        }
    }
}

fn print_version() {
    eprintln!("rdpbridge {}", VERSION);
}

fn print_help() {
    eprintln!("rdpbridge {} - remote-desktop session bridge demo", VERSION);
    eprintln!();
    eprintln!("Usage: rdpbridge [OPTIONS]");
    eprintln!();
    eprintln!("Session options:");
    eprintln!("  -n, --sessions <N>    Number of concurrent sessions (default: 1)");
    eprintln!("  -p, --profile <FILE>  Connection profile (TOML)");
    eprintln!("  --frames <N>          Frame updates per session (default: 3)");
    eprintln!();
    eprintln!("Server behaviour:");
    eprintln!("  --cancel              Cancel each attempt while connecting");
    eprintln!("  --deny-cert           Reject the server certificate");
    eprintln!("  --fail                Server refuses the connection");
    eprintln!();
    eprintln!("Other options:");
    eprintln!("  -c, --config <FILE>   Bridge configuration (default: ~/.rdpbridge/config.toml)");
    eprintln!("  --inline              Run listeners on engine threads");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Log level: RDPBRIDGE_LOG (e.g. RDPBRIDGE_LOG=debug)");
}

fn parse_args() -> Result<Options, String> {
    let args: Vec<String> = env::args().collect();
    let mut options = Options::default();
    let mut i = 1;

    let value = |i: &mut usize, name: &str| -> Result<String, String> {
        *i += 1;
        args.get(*i)
            .cloned()
            .ok_or_else(|| format!("Missing {} argument", name))
    };

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                std::process::exit(0);
            }
            "-n" | "--sessions" => {
                let n = value(&mut i, "session count")?;
                options.sessions = n
                    .parse()
                    .map_err(|_| format!("Invalid session count: {}", n))?;
            }
            "-p" | "--profile" => {
                options.profile = Some(PathBuf::from(value(&mut i, "profile")?));
            }
            "-c" | "--config" => {
                options.config = Some(PathBuf::from(value(&mut i, "config")?));
            }
            "--frames" => {
                let n = value(&mut i, "frame count")?;
                options.frames = n.parse().map_err(|_| format!("Invalid frame count: {}", n))?;
            }
            "--cancel" => options.cancel = true,
            "--deny-cert" => options.deny_cert = true,
            "--fail" => options.fail = true,
            "--inline" => options.inline = true,
            arg => {
                return Err(format!("Unknown argument: {}. Use -h for help.", arg));
            }
        }
        i += 1;
    }

    Ok(options)
}

/// Log to a file; `RDPBRIDGE_LOG` overrides the configured level
fn init_logging(config: &BridgeConfig) {
    let log_path = config.log_path();

    // Create log directory if needed
    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok();

    if let Some(file) = log_file {
        let filter = EnvFilter::try_from_env("RDPBRIDGE_LOG")
            .unwrap_or_else(|_| EnvFilter::new(&config.log.level));
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .with_thread_names(true)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

/// Prints lifecycle callbacks for every session
struct LifecyclePrinter;

impl EventListener for LifecyclePrinter {
    fn on_connection_success(&self, handle: Handle) {
        println!("{} {}", label(handle), "connected".green());
    }

    fn on_connection_failure(&self, handle: Handle) {
        println!("{} {}", label(handle), "connection failed".red());
    }

    fn on_disconnecting(&self, handle: Handle) {
        println!("{} {}", label(handle), "disconnecting".yellow());
    }

    fn on_disconnected(&self, handle: Handle) {
        println!("{} {}", label(handle), "disconnected".dark_grey());
    }
}

/// Per-session console viewer
struct Console {
    handle: Handle,
    trust_certificates: bool,
    credentials: Credentials,
}

impl UiEventListener for Console {
    fn on_settings_changed(&self, width: u32, height: u32, bpp: u32) {
        println!("{} desktop {}x{} @ {} bpp", label(self.handle), width, height, bpp);
    }

    fn on_authenticate(&self, credentials: &mut Credentials) -> bool {
        println!("{} {}", label(self.handle), "credentials requested".cyan());
        *credentials = self.credentials.clone();
        true
    }

    fn on_verify_certificate(&self, certificate: &CertificateInfo) -> bool {
        let verdict = if self.trust_certificates {
            "trusted".green()
        } else {
            "rejected".red()
        };
        println!(
            "{} certificate {} ({}) {}",
            label(self.handle),
            certificate.subject,
            certificate.fingerprint,
            verdict
        );
        self.trust_certificates
    }

    fn on_graphics_update(&self, rect: Rect, pixels: &PixelBuffer<'_>) {
        let shade = pixels.row(0).and_then(|row| row.first().copied()).unwrap_or(0);
        println!(
            "{} frame {}x{}+{}+{} shade {:#04x}",
            label(self.handle),
            rect.width,
            rect.height,
            rect.x,
            rect.y,
            shade
        );
    }

    fn on_graphics_resize(&self, width: u32, height: u32) {
        println!("{} resized to {}x{}", label(self.handle), width, height);
    }
}

fn label(handle: Handle) -> String {
    format!("[session {}]", handle).bold().to_string()
}

/// Poll until `done` accepts the session status
fn wait_for(
    bridge: &RdpBridge,
    handle: Handle,
    done: impl Fn(LifecycleStatus) -> bool,
) -> anyhow::Result<LifecycleStatus> {
    let deadline = Instant::now() + SETTLE_TIMEOUT;
    loop {
        let status = bridge.controller().status(handle)?;
        if done(status) {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            bail!("session {} stuck in {}", handle, status);
        }
        thread::sleep(Duration::from_millis(10));
    }
}

fn load_profile(options: &Options) -> anyhow::Result<ConnectionProfile> {
    match &options.profile {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading profile {}", path.display()))?;
            ConnectionProfile::from_toml_str(&content)
                .with_context(|| format!("parsing profile {}", path.display()))
        }
        None => Ok(ConnectionProfile::manual("sim.local", 3389).with_screen(800, 600, 16)),
    }
}

/// Type a few keys, click once and read back the first row of the desktop
fn exercise(bridge: &RdpBridge, engine: &SimulatedEngine, handle: Handle, bpp: u32) -> anyhow::Result<()> {
    let controller = bridge.controller();

    let mut actions = Vec::new();
    for code in [KeyCode::Char('h'), KeyCode::Char('i'), KeyCode::Enter] {
        actions.extend(InputMapper::map_key(&KeyEvent::new(code, KeyModifiers::NONE)));
    }
    let click = MouseEvent {
        kind: MouseEventKind::Down(MouseButton::Left),
        column: 10,
        row: 4,
        modifiers: KeyModifiers::NONE,
    };
    actions.extend(InputMapper::map_mouse(&click, 8, 16));
    InputMapper::apply(controller, handle, &actions)?;
    println!("{} sent {} input events", label(handle), engine.inputs(handle).len());

    let width = 16;
    let mut row = vec![0u8; width as usize * PixelFormat::for_color_depth(bpp).bytes_per_pixel()];
    if controller.request_buffer_update(handle, Rect::new(0, 0, width, 1), &mut row)? {
        println!("{} top-left shade {:#04x}", label(handle), row[0]);
    }
    Ok(())
}

fn run(options: Options) -> anyhow::Result<()> {
    let mut config = match &options.config {
        Some(path) => BridgeConfig::load_from(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => BridgeConfig::load(),
    };
    if options.inline {
        config.dispatch.application_context = false;
    }
    init_logging(&config);
    info!("rdpbridge {} starting", VERSION);

    let profile = load_profile(&options)?;
    let server = SimulatedServer {
        refuse: options.fail,
        frames: options.frames,
        ..Default::default()
    };

    let mut engine = None;
    let bridge = RdpBridge::new(&config, |callbacks| {
        let sim = Arc::new(SimulatedEngine::new(callbacks, server));
        engine = Some(sim.clone());
        sim
    })?;
    let engine = engine.context("engine not created")?;
    println!("engine {}", bridge.controller().engine_version().dim());

    // Listeners are held weakly by the bridge
    let lifecycle: Arc<dyn EventListener> = Arc::new(LifecyclePrinter);
    bridge.set_event_listener(&lifecycle);

    let mut sessions = Vec::new();
    for _ in 0..options.sessions {
        let handle = bridge.allocate()?;
        let console: Arc<dyn UiEventListener> = Arc::new(Console {
            handle,
            trust_certificates: !options.deny_cert,
            credentials: Credentials::new("demo", "", "demo"),
        });
        bridge.bind_listener(handle, &console)?;
        bridge.controller().set_connection_info(handle, &profile)?;
        bridge.controller().connect(handle)?;
        println!("{} {}", label(handle), "connecting".blue());
        sessions.push((handle, console));
    }

    if options.cancel {
        for (handle, _) in &sessions {
            bridge.controller().cancel_connection(*handle)?;
        }
    }

    for (handle, _) in &sessions {
        let status = wait_for(&bridge, *handle, |s| s != LifecycleStatus::Connecting)?;
        if status == LifecycleStatus::Connected {
            exercise(&bridge, &engine, *handle, profile.screen.colors)?;
            bridge.controller().disconnect(*handle)?;
            wait_for(&bridge, *handle, LifecycleStatus::is_terminal)?;
        }
    }

    for (handle, _) in &sessions {
        let status = bridge.controller().status(*handle)?;
        println!("{} finished {}", label(*handle), status);
        bridge.free(*handle)?;
    }

    info!("rdpbridge finished");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let options = match parse_args() {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    run(options)
}
