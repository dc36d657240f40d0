// devlink CLI
// Connects to a device, prints its banner and runs the interactive shell on stdin/stdout

use clap::{Parser, Subcommand, ValueEnum};
use devlink::config::{load_config, AppConfig};
use devlink::connection::Connection;
use devlink::shell::{Shell, ShellExit};
use devlink::transport::{BdAddr, Endpoint};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::io::BufReader;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "devlink", version, about = "Interactive client for embedded devices over Bluetooth or serial")]
struct Cli {
    /// Path to a devlink.toml configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset (e.g. "debug", "devlink=trace")
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Line ending appended to every command
    #[arg(long, global = true, value_enum)]
    line_ending: Option<LineEnding>,

    #[command(subcommand)]
    target: Target,
}

#[derive(Subcommand)]
enum Target {
    /// Connect over a Bluetooth RFCOMM socket
    Bluetooth {
        /// Device address, e.g. 24:0A:C4:12:34:56
        #[arg(long)]
        address: BdAddr,

        /// RFCOMM channel
        #[arg(long)]
        channel: Option<u8>,
    },
    /// Connect over a USB/UART serial port
    Serial {
        /// Port path or name, e.g. /dev/ttyUSB0 or COM3
        #[arg(long)]
        port: String,

        /// Baud rate
        #[arg(long)]
        baud: Option<u32>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum LineEnding {
    None,
    Lf,
    Crlf,
}

impl LineEnding {
    fn as_str(self) -> &'static str {
        match self {
            Self::None => "",
            Self::Lf => "\n",
            Self::Crlf => "\r\n",
        }
    }
}

impl Target {
    fn endpoint(&self, config: &AppConfig) -> Endpoint {
        match self {
            Self::Bluetooth { address, channel } => Endpoint::Bluetooth {
                address: *address,
                channel: channel.unwrap_or(config.endpoint.rfcomm_channel),
            },
            Self::Serial { port, baud } => Endpoint::Serial {
                path: port.clone(),
                baud_rate: baud.unwrap_or(config.endpoint.baud_rate),
            },
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("devlink: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if let Some(ending) = cli.line_ending {
        config.shell.line_ending = ending.as_str().to_string();
    }
    init_logging(&config.logging.level);

    let endpoint = cli.target.endpoint(&config);
    let prompt = config.shell.prompt.clone();
    let connection = Connection::new(config.connection.clone()).with_display(move |chunk| {
        let mut stdout = std::io::stdout().lock();
        let _ = write!(stdout, "\n[stream] {}\n{}", chunk.text().trim_end(), prompt);
        let _ = stdout.flush();
    });

    match connection.connect(&endpoint).await {
        Ok(Some(banner)) => println!("{}", banner.text().trim_end()),
        Ok(None) => {}
        Err(e) => {
            error!(%endpoint, error = %e, "connection failed");
            return ExitCode::FAILURE;
        }
    }

    let shell = Shell::new(&connection, config.shell.clone());
    let mut stdout = tokio::io::stdout();
    let outcome = shell.run(BufReader::new(tokio::io::stdin()), &mut stdout).await;

    connection.disconnect().await;

    match outcome {
        Ok(ShellExit::ConnectionLost) => ExitCode::FAILURE,
        Ok(exit) => {
            info!(?exit, dropped_chunks = connection.chunks().dropped(), "session ended");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "shell failed");
            ExitCode::FAILURE
        }
    }
}
