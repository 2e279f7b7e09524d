use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::process::ExitCode;
use std::sync::Arc;

mod cli;

use cli::Cli;
use cli::commands::Commands;
use loadsim::config::Config;
use loadsim::drivers::{AgbotDriver, Harness, NodeDriver, ProbeDriver};
use loadsim::error::{EXIT_INPUT, LoadsimError};
use loadsim::report::{FileReporter, Reporter};

fn setup_logging(verbose: bool, log_level: Option<&str>) {
    let default_level = if verbose { "debug" } else { log_level.unwrap_or("info") };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();
}

fn open_report(config: &Config, command: &str, name: &str) -> Result<Arc<dyn Reporter>> {
    let path = config.report.path_for(command, name);
    let reporter = FileReporter::create(&path).context("Failed to prepare report file")?;
    info!("Writing report to {}", path.display());
    Ok(Arc::new(reporter))
}

/// Record a fatal error in the report before handing it up.
fn reported<T>(reporter: &Arc<dyn Reporter>, result: loadsim::Result<T>) -> loadsim::Result<T> {
    if let Err(e) = &result {
        reporter.error(&e.to_string());
    }
    result
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Agbot { name_base } => handle_agbot_command(name_base, cli.command.name(), config).await,
        Commands::Node {
            name_base,
            short_hostname,
        } => handle_node_command(name_base, short_hostname.clone(), cli.command.name(), config).await,
        Commands::Probe { num_times } => handle_probe_command(*num_times, cli.command.name(), config).await,
    }
}

async fn handle_agbot_command(name: &str, command: &str, config: &Config) -> Result<()> {
    config.exchange.require_credentials()?;
    let driver = AgbotDriver::new(config.exchange.clone(), config.agbot.clone(), name);
    let reporter = open_report(config, command, driver.name_base())?;
    let harness = reported(&reporter, Harness::from_config(config, reporter.clone()))?;

    println!(
        "{} {} agbots for {} agreement checks",
        "Simulating:".green(),
        config.agbot.agbots,
        config.agbot.agreement_checks
    );
    println!("Using exchange {}", config.exchange.url.cyan());

    let summary = reported(&reporter, driver.run(&harness).await).context("Agbot simulation failed")?;
    println!("\n{}", summary.to_string().bold());
    Ok(())
}

async fn handle_node_command(name: &str, hostname: Option<String>, command: &str, config: &Config) -> Result<()> {
    config.exchange.require_credentials()?;
    let driver = NodeDriver::new(config.exchange.clone(), config.node.clone(), name, hostname);
    let reporter = open_report(config, command, driver.name_base())?;
    let harness = reported(&reporter, Harness::from_config(config, reporter.clone()))?;

    println!(
        "{} {} nodes for {} heartbeats",
        "Simulating:".green(),
        config.node.nodes,
        config.node.heartbeats
    );
    println!("Using exchange {}", config.exchange.url.cyan());

    let summary = reported(&reporter, driver.run(&harness).await).context("Node simulation failed")?;
    println!("\n{}", summary.to_string().bold());
    Ok(())
}

async fn handle_probe_command(num_times: u32, command: &str, config: &Config) -> Result<()> {
    let probe = ProbeDriver::new(config.probe.clone(), num_times)?;
    let reporter = open_report(config, command, command)?;
    let harness = reported(&reporter, Harness::from_config(config, reporter.clone()))?;

    println!("{}", "Starting probe...".cyan());
    let summary = reported(&reporter, probe.run(&harness).await).context("Probe failed")?;
    println!("{}", summary.to_string().bold());
    Ok(())
}

fn exit_code(err: &eyre::Report) -> u8 {
    let code = err.downcast_ref::<LoadsimError>().map(LoadsimError::exit_code).unwrap_or(EXIT_INPUT);
    u8::try_from(code).unwrap_or(1)
}

async fn run(cli: Cli) -> Result<()> {
    // Load configuration, then let the environment override it
    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.apply_process_env().context("Invalid environment configuration")?;

    setup_logging(cli.is_verbose() || config.verbose, config.log_level.as_deref());
    info!("Starting with config from: {:?}", cli.config);

    run_application(&cli, &config).await
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{:?}", err);
            eprintln!("{} {:?}", "Error:".red(), err);
            ExitCode::from(exit_code(&err))
        }
    }
}
