use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use fota_core::integrity::{IntegrityRecord, ResumeDecision, resume_point};
use fota_core::payload::FirmwareImage;
use fota_core::protocol::constants::{FRAME_HEADER_LEN, MAX_FRAME_PAYLOAD};
use fota_core::protocol::frame;
use fota_core::session::{SessionConfig, UpgradeSession};
use fota_core::transport::{MockTransport, Role};
use fota_core::version::{VersionTriple, compare};

#[derive(Parser, Debug)]
#[command(name = "fota", version, about = "Firmware-over-the-air transfer protocol tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the frame plan, digest and version of a firmware image
    Inspect {
        /// Firmware image, named after its version (e.g. 01-02-03.bin)
        firmware: PathBuf,

        /// Version override when the file name carries none
        #[arg(long)]
        version: Option<String>,
    },
    /// Drive a full upgrade session against a scripted in-memory link
    Simulate {
        /// Firmware image, named after its version (e.g. 01-02-03.bin)
        firmware: PathBuf,

        /// Version override when the file name carries none
        #[arg(long)]
        version: Option<String>,

        /// Version the simulated device starts with
        #[arg(long, default_value = "00-00-00")]
        device_version: String,

        /// Sequence number the simulated device reports (-1 = fresh device)
        #[arg(long, default_value_t = -1)]
        reported_sequence: i32,

        /// Commit as a forced upgrade
        #[arg(long)]
        forced: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if cli.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    match cli.command {
        Commands::Inspect { firmware, version } => inspect(&firmware, version.as_deref()),
        Commands::Simulate {
            firmware,
            version,
            device_version,
            reported_sequence,
            forced,
        } => simulate(
            &firmware,
            version.as_deref(),
            &device_version,
            reported_sequence,
            forced,
        ),
    }
}

fn load_image(firmware: &Path, version: Option<&str>) -> Result<FirmwareImage> {
    let image = match version {
        Some(version) => {
            let data = std::fs::read(firmware)
                .with_context(|| format!("failed to read {}", firmware.display()))?;
            FirmwareImage::from_bytes(data, version)?
        }
        None => FirmwareImage::from_file(firmware)?,
    };
    Ok(image)
}

fn inspect(firmware: &Path, version: Option<&str>) -> Result<()> {
    let image = load_image(firmware, version)?;
    let frames = frame::encode(image.bytes(), MAX_FRAME_PAYLOAD)?;
    let digest = IntegrityRecord::compute(image.bytes());

    println!("version:    {}", image.version());
    println!("size:       {} bytes", image.len());
    println!("frames:     {}", frames.len());
    if let Some(last) = frames.last() {
        println!("last frame: {} bytes declared", last.declared_len());
    }
    println!("sha1:       {}", digest);
    Ok(())
}

fn simulate(
    firmware: &Path,
    version: Option<&str>,
    device_version: &str,
    reported_sequence: i32,
    forced: bool,
) -> Result<()> {
    let image = load_image(firmware, version)?;
    let device: VersionTriple = device_version
        .parse()
        .context("invalid --device-version")?;
    let verdict = compare(device, image.version());
    info!(device = %device, image = %image.version(), verdict = %verdict, "Simulating upgrade");

    // Script the peer side of the exchange the engine is about to drive.
    let mock = MockTransport::new();
    mock.queue_read(Role::CurrentVersion, device_version.as_bytes());
    if verdict.needs_transfer() {
        let frames = frame::encode(image.bytes(), MAX_FRAME_PAYLOAD)?;
        mock.queue_write_ack(Role::NewVersion);
        mock.queue_read(Role::SequenceNumber, &[reported_sequence as u8]);

        let remaining = match resume_point(
            reported_sequence,
            image.len(),
            MAX_FRAME_PAYLOAD,
            FRAME_HEADER_LEN,
        ) {
            ResumeDecision::Complete => 0,
            ResumeDecision::ResumeAt(sequence) => frames.len().saturating_sub(sequence as usize),
        };
        for _ in 0..remaining {
            mock.queue_write_ack(Role::Data);
        }
        mock.queue_write_ack(Role::Checksum);
        mock.queue_read(Role::DataCheck, &[1]);
        mock.queue_write_ack(Role::UpgradeType);
        mock.queue_read(Role::Status, &[1]);
    }

    let config = SessionConfig {
        forced,
        ..SessionConfig::default()
    };
    let mut session = UpgradeSession::new(config).with_image(image);
    session.run(&mock)?;

    info!(
        frames_written = mock.writes_to(Role::Data).len(),
        "Simulated upgrade finished"
    );
    Ok(())
}
