//! USB Serial command-line tool
//!
//! Lists attached USB serial devices, monitors one, or sends a single
//! message and prints the reply. `--simulate` swaps the hardware for the
//! virtual devices configured in the settings file.

mod commands;
mod settings;

use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use settings::Settings;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use usbser_detect::DeviceSource;
use usbser_framing::FramingPolicy;
use usbser_session::SessionManager;
use usbser_sim::VirtualConnector;
use usbser_transport::{Connector, ParitySetting, SerialConfig};

#[derive(Debug, Parser)]
#[command(name = "usbser", version, about = "Talk to USB serial devices")]
struct Cli {
    /// Use virtual devices instead of real hardware
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List attached USB serial devices
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Print everything a device sends; lines typed on stdin are sent to it
    Monitor {
        /// Port key, system path, or device id
        device: String,
        #[command(flatten)]
        line: LineArgs,
    },
    /// Send one message and print the reply
    Send {
        /// Port key, system path, or device id
        device: String,
        message: String,
        #[command(flatten)]
        line: LineArgs,
        /// How long to wait for a reply, in milliseconds
        #[arg(long)]
        wait_ms: Option<u64>,
    },
    /// Show the settings file, optionally writing the defaults
    Settings {
        /// Write default settings if no file exists yet
        #[arg(long)]
        init: bool,
    },
}

/// Overrides for the configured line settings
#[derive(Debug, Args)]
struct LineArgs {
    #[arg(short, long)]
    baud: Option<u32>,
    /// none, odd or even
    #[arg(long)]
    parity: Option<String>,
    /// Split frames on newlines
    #[arg(long, conflicts_with = "delimiter")]
    lines: bool,
    /// Split frames on this terminator (escapes like \r\n allowed)
    #[arg(long)]
    delimiter: Option<String>,
    /// Show received data as hex
    #[arg(long)]
    hex: bool,
}

impl LineArgs {
    /// Apply the overrides on top of the saved settings
    fn apply(&self, settings: &mut Settings) -> Result<SerialConfig> {
        if let Some(baud) = self.baud {
            settings.serial.baud_rate = Some(baud);
        }
        if let Some(parity) = &self.parity {
            settings.serial.parity = Some(ParitySetting::Name(parity.clone()));
        }
        if self.lines {
            settings.session.framing = FramingPolicy::lines();
        }
        if let Some(delimiter) = &self.delimiter {
            settings.session.framing = FramingPolicy::delimited(&commands::parse_escapes(delimiter)?);
        }
        settings.show_hex |= self.hex;
        Ok(settings.serial.to_config()?)
    }
}

async fn run<S: DeviceSource, C: Connector>(
    manager: SessionManager<S, C>,
    command: Command,
    mut settings: Settings,
) -> Result<()> {
    match command {
        Command::List { json } => commands::list(&manager, json),
        Command::Monitor { device, line } => {
            let config = line.apply(&mut settings)?;
            let manager = manager.with_options(settings.session.clone());
            commands::monitor(&manager, &device, config, &settings).await
        }
        Command::Send {
            device,
            message,
            line,
            wait_ms,
        } => {
            let config = line.apply(&mut settings)?;
            let window = Duration::from_millis(wait_ms.unwrap_or(settings.read_window_ms));
            let manager = manager.with_options(settings.session.clone());
            commands::send(&manager, &device, &message, config, &settings, window).await
        }
        Command::Settings { init } => show_settings(&settings, init),
    }
}

fn show_settings(settings: &Settings, init: bool) -> Result<()> {
    let path = Settings::settings_path();
    let exists = path.as_ref().is_some_and(|p| p.exists());
    if init && !exists {
        let written = settings.save()?;
        println!("Wrote {}", written.display());
    } else if let Some(path) = &path {
        println!("# {}{}", path.display(), if exists { "" } else { " (not created)" });
    }
    println!("{}", serde_json::to_string_pretty(settings)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so command output stays pipeable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "usbser=info,usbser_transport=info,usbser_detect=info,usbser_framing=info,usbser_session=info,usbser_sim=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let settings = Settings::load();

    if cli.simulate {
        tracing::info!("Using {} virtual device(s)", settings.virtual_devices.len());
        let sim = VirtualConnector::from_configs(&settings.virtual_devices);
        run(SessionManager::new(sim.clone(), sim), cli.command, settings).await
    } else {
        run(SessionManager::system(), cli.command, settings).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_line_args_override_settings() {
        let cli = Cli::parse_from([
            "usbser", "send", "/dev/ttyUSB0", "AT", "--baud", "115200", "--parity", "odd",
            "--delimiter", "\\r\\n",
        ]);
        let Command::Send { line, .. } = cli.command else {
            panic!("expected send");
        };

        let mut settings = Settings::default();
        let config = line.apply(&mut settings).unwrap();
        assert_eq!(config.to_string(), "115200 8O1");
        assert_eq!(settings.session.framing, FramingPolicy::delimited(b"\r\n"));
    }

    #[test]
    fn test_bad_parity_is_rejected() {
        let cli = Cli::parse_from(["usbser", "--simulate", "monitor", "1", "--parity", "mark"]);
        assert!(cli.simulate);
        let Command::Monitor { line, .. } = cli.command else {
            panic!("expected monitor");
        };
        assert!(line.apply(&mut Settings::default()).is_err());
    }
}
