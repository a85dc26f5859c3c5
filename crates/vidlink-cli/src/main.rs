mod pattern;
mod session;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use vidlink_core::{CaptureMode, GpuBackend, VidlinkConfig};
use vidlink_render::{SoftDevice, WgpuDevice};

use crate::session::{SessionOptions, SessionSummary};

#[derive(Parser)]
#[command(
    name = "vidlink",
    version,
    about = "Vidlink: GPU-packed video frames over a network transport"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a test card through the loopback transport and receive it back
    Loopback {
        /// Configuration file (defaults apply when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of host frames to run
        #[arg(long, default_value_t = 30)]
        frames: u32,

        /// Frame width in pixels (multiple of 16)
        #[arg(long, default_value_t = 320)]
        width: u32,

        /// Frame height in pixels (multiple of 8)
        #[arg(long, default_value_t = 240)]
        height: u32,

        /// Override the configured compute backend
        #[arg(long, value_enum)]
        backend: Option<BackendArg>,

        /// Override the configured capture mode
        #[arg(long, value_enum)]
        capture: Option<CaptureArg>,

        /// Keep the alpha channel (UYVA)
        #[arg(long)]
        alpha: bool,

        /// Write the last received frame to a PNG file
        #[arg(long)]
        dump: Option<PathBuf>,

        /// Print the session summary as JSON on stdout
        #[arg(long)]
        json: bool,
    },

    /// Manage configuration files
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Show build and backend information
    Info,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write a configuration file with every default spelled out
    Init {
        #[arg()]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendArg {
    Auto,
    Wgpu,
    Software,
}

impl From<BackendArg> for GpuBackend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Auto => GpuBackend::Auto,
            BackendArg::Wgpu => GpuBackend::Wgpu,
            BackendArg::Software => GpuBackend::Software,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum CaptureArg {
    Screen,
    Camera,
    Texture,
}

impl From<CaptureArg> for CaptureMode {
    fn from(arg: CaptureArg) -> Self {
        match arg {
            CaptureArg::Screen => CaptureMode::Screen,
            CaptureArg::Camera => CaptureMode::Camera,
            CaptureArg::Texture => CaptureMode::Texture,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let machine_output = matches!(cli.command, Commands::Loopback { json: true, .. });

    let subscriber = tracing_subscriber::fmt().with_env_filter(
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    );

    if machine_output {
        // stdout carries only the JSON summary.
        subscriber
            .with_ansi(false)
            .with_writer(std::io::stderr)
            .init();
    } else {
        subscriber.init();
    }

    match cli.command {
        Commands::Loopback {
            config,
            frames,
            width,
            height,
            backend,
            capture,
            alpha,
            dump,
            json,
        } => {
            let mut config = match config {
                Some(path) => VidlinkConfig::load_from_file(&path)
                    .with_context(|| format!("failed to load {}", path.display()))?,
                None => VidlinkConfig::default(),
            };
            if let Some(backend) = backend {
                config.gpu.backend = backend.into();
            }
            if let Some(capture) = capture {
                config.sender.capture = capture.into();
            }
            config.sender.keep_alpha |= alpha;
            let options = SessionOptions {
                frames,
                width,
                height,
                dump,
            };
            cmd_loopback(&config, &options, json)
        }
        Commands::Config { command } => match command {
            ConfigCommands::Init { path, force } => cmd_config_init(&path, force),
        },
        Commands::Info => cmd_info(),
    }
}

fn cmd_loopback(config: &VidlinkConfig, options: &SessionOptions, json: bool) -> Result<()> {
    let summary = match config.gpu.backend {
        GpuBackend::Software => session::run(Arc::new(SoftDevice::new()), config, options)?,
        GpuBackend::Wgpu => {
            let device = WgpuDevice::init().context("wgpu backend unavailable")?;
            session::run(Arc::new(device), config, options)?
        }
        GpuBackend::Auto => match WgpuDevice::init() {
            Ok(device) => session::run(Arc::new(device), config, options)?,
            Err(e) => {
                tracing::warn!("wgpu unavailable ({}), using the software backend", e);
                session::run(Arc::new(SoftDevice::new()), config, options)?
            }
        },
    };

    if json {
        println!("{}", serde_json::to_string(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn print_summary(summary: &SessionSummary) {
    println!("Loopback session");
    println!("   Backend:   {}", summary.backend);
    println!("   Capture:   {:?}", summary.capture);
    println!("   Source:    {}", summary.source);
    println!("   Size:      {}x{}", summary.width, summary.height);
    println!("   Sent:      {}", summary.frames_sent);
    println!("   Received:  {}", summary.frames_received);
    match summary.mean_abs_error {
        Some(err) => println!("   Error:     {:.2} (mean abs, 8-bit)", err),
        None => println!("   Error:     n/a"),
    }
    println!(
        "   Buffers:   {} encode, {} decode",
        summary.encode_buffer_allocations, summary.decode_image_allocations
    );
}

fn cmd_config_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!("'{}' already exists (pass --force to overwrite)", path.display());
    }
    VidlinkConfig::default()
        .save_to_file(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn cmd_info() -> Result<()> {
    println!("Vidlink");
    println!("   Version:   {}", env!("CARGO_PKG_VERSION"));
    println!("   Formats:   UYVY, UYVA (BT.709 limited range)");
    match WgpuDevice::init() {
        Ok(device) => {
            let adapter = device.context().adapter.get_info();
            println!("   GPU:       {} ({:?})", adapter.name, adapter.backend);
        }
        Err(_) => println!("   GPU:       none, software backend only"),
    }
    Ok(())
}
