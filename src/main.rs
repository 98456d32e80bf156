use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use taxlots::api::{self, CliRegime, SimulateArgs};
use taxlots::config::ServerConfig;
use taxlots::error::TaxLotResult;

/// Lot-level tax projections for funds, fixed income and deferred wrappers.
#[derive(Parser, Debug)]
#[command(name = "taxlots", version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API
    Serve {
        /// TOML file with host, port and solver settings
        #[arg(long, default_value = "config/taxlots.toml")]
        config: PathBuf,
        #[arg(long)]
        host: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Project one regime month by month
    Simulate {
        #[arg(long, value_enum, default_value_t = CliRegime::Fund)]
        regime: CliRegime,
        #[command(flatten)]
        args: SimulateArgs,
    },
    /// Project every regime and the gross rates that close the gap to the deferred wrapper
    Compare {
        #[arg(long)]
        config: Option<PathBuf>,
        #[command(flatten)]
        args: SimulateArgs,
    },
    /// Solve the gross annual rate a regime needs to reach a net target
    EquivalentRate {
        #[arg(long, value_enum, default_value_t = CliRegime::Fund)]
        regime: CliRegime,
        /// Net value to reach; defaults to the deferred wrapper's net value
        #[arg(long)]
        target: Option<f64>,
        #[arg(long)]
        config: Option<PathBuf>,
        #[command(flatten)]
        args: SimulateArgs,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "taxlots=debug,tower_http=debug"
    } else {
        "taxlots=info,tower_http=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run(cli.command).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(command: Command) -> TaxLotResult<()> {
    match command {
        Command::Serve { config, host, port } => {
            let mut server_config = ServerConfig::load_or_default(Some(&config))?;
            if let Some(host) = host {
                server_config.host = host;
            }
            if let Some(port) = port {
                server_config.port = port;
            }
            info!("taxlots v{}", env!("CARGO_PKG_VERSION"));
            api::run_http_server(server_config).await?;
        }
        Command::Simulate { regime, args } => {
            let model = api::build_inputs(args)?;
            print_json(&api::run_simulation(&model, regime.into())?)?;
        }
        Command::Compare { config, args } => {
            let solver = ServerConfig::load_or_default(config.as_deref())?
                .solver
                .to_solver_config();
            let model = api::build_inputs(args)?;
            print_json(&api::run_comparison(&model, &solver)?)?;
        }
        Command::EquivalentRate {
            regime,
            target,
            config,
            args,
        } => {
            let solver = ServerConfig::load_or_default(config.as_deref())?
                .solver
                .to_solver_config();
            let model = api::build_inputs(args)?;
            print_json(&model.equivalent_rate(regime.into(), target, &solver)?)?;
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> TaxLotResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
