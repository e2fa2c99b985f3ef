//! equiscan - scan equipment QR codes with the local camera.

mod decode;
mod native;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::eyre;
use equiscan_core::{
    ContainerHandle, DecodeEngine, ScanController, ScanError, ScanStatus, ScannerConfig, device,
};
use native::{NativeEngine, NativeHost};
use tokio::sync::mpsc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// equiscan - Scan equipment QR codes from the terminal.
#[derive(Parser, Debug)]
#[command(name = "equiscan")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log lifecycle details
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan with the camera and print the decoded text
    Scan {
        /// Keep the camera open and print every code seen
        #[arg(long)]
        keep_scanning: bool,

        /// Prompt printed before scanning
        #[arg(long)]
        label: Option<String>,

        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Preview width in pixels, used to size the detection box
        #[arg(long, default_value = "360")]
        width: u32,
    },
    /// List cameras; the one a scan would use is marked with `*`
    Devices,
    /// Decode QR codes from an image file
    Decode {
        /// PNG or JPEG file
        image: PathBuf,
    },
    /// Print the effective configuration
    Config {
        /// Write it to the config file
        #[arg(long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    color_eyre::install()?;

    // Logs go to stderr; stdout carries only decoded text
    let level = if args.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(format!("equiscan={}", level).parse()?)
        .add_directive(format!("equiscan_core={}", level).parse()?);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match args.command {
        Command::Scan {
            keep_scanning,
            label,
            timeout,
            width,
        } => {
            let mut config = load_config_or_default();
            if keep_scanning {
                config.auto_stop_on_scan = false;
            }
            if let Some(label) = label {
                config.label = label;
            }
            config.validate()?;
            run_scan(config, width, timeout.map(Duration::from_secs)).await
        }
        Command::Devices => list_devices().await,
        Command::Decode { image } => decode_file(&image),
        Command::Config { write } => show_config(write),
    }
}

fn load_config_or_default() -> ScannerConfig {
    match equiscan_core::load_config() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("Ignoring config file: {}", e);
            ScannerConfig::default()
        }
    }
}

async fn run_scan(config: ScannerConfig, width: u32, timeout: Option<Duration>) -> Result<()> {
    let (result_tx, mut result_rx) = mpsc::unbounded_channel();
    let on_result = Arc::new(move |text: String| {
        let _ = result_tx.send(text);
    });

    let controller = ScanController::new(
        Arc::new(NativeHost),
        Arc::new(NativeEngine::new()),
        ContainerHandle::new("terminal", width),
        config,
        on_result,
    );
    controller.mount();
    eprintln!("{}", controller.label());

    let outcome = scan_loop(&controller, &mut result_rx, timeout).await;

    // Camera must be closed before the process exits
    if let Some(release) = controller.unmount() {
        release.await?;
    }
    outcome
}

async fn scan_loop(
    controller: &ScanController,
    results: &mut mpsc::UnboundedReceiver<String>,
    timeout: Option<Duration>,
) -> Result<()> {
    if controller.start().await != ScanStatus::Scanning {
        return Err(match controller.last_error() {
            Some(err) => report(&err),
            None => eyre!("Scanner did not start"),
        });
    }

    let auto_stop = controller.config().auto_stop_on_scan;
    let deadline = async {
        match timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            Some(text) = results.recv() => {
                println!("{}", text);
                if auto_stop {
                    return Ok(());
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, stopping scanner");
                controller.stop().await;
                return Ok(());
            }
            _ = &mut deadline => {
                controller.stop().await;
                return Err(eyre!(
                    "No QR code scanned within {} seconds",
                    timeout.unwrap_or_default().as_secs()
                ));
            }
        }
    }
}

/// Print user guidance for a scanner error.
fn report(err: &ScanError) -> color_eyre::eyre::Report {
    eprintln!("{}", err.title());
    eprintln!("  {}", err.message());
    eprintln!("  {}", err.kind().suggestion());
    if let Some(detail) = err.detail() {
        tracing::debug!("Native error: {}", detail);
    }
    eyre!("{}", err.title())
}

async fn list_devices() -> Result<()> {
    let config = load_config_or_default();
    let cameras = NativeEngine::new()
        .list_devices()
        .await
        .map_err(|e| report(&ScanError::from(e)))?;

    if cameras.is_empty() {
        println!("No cameras found");
        return Ok(());
    }

    let preferred = device::select_preferred(&cameras, &config.back_camera_keywords)
        .map(|camera| camera.id.clone());
    for camera in &cameras {
        let marker = if preferred.as_ref() == Some(&camera.id) {
            "*"
        } else {
            " "
        };
        println!("{} {}\t{}", marker, camera.id, camera.label);
    }
    Ok(())
}

fn decode_file(path: &Path) -> Result<()> {
    let data = std::fs::read(path)?;
    let found =
        decode::decode_qr_from_image(&data).map_err(|e| eyre!("{}: {}", path.display(), e))?;
    for text in found {
        println!("{}", text);
    }
    Ok(())
}

fn show_config(write: bool) -> Result<()> {
    let config = equiscan_core::load_config()?;
    if write {
        let path = equiscan_core::save_config(&config)?;
        eprintln!("Saved to {}", path.display());
    } else {
        eprintln!("Config file: {}", equiscan_core::get_config_path()?.display());
    }
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
