use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use router_harness::certs::{certificate_info, check_private_key_permissions, CertificateManager};
use router_harness::channels::Channel;
use router_harness::config::{DeviceConfig, HarnessSettings};
use router_harness::report;
use router_harness::runner::{LiveBackends, Runner};
use router_harness::scenario::{load_scenarios, ScenarioConfig};

#[derive(Parser)]
#[command(name = "router-harness")]
#[command(about = "Router MQTT broker and Data to Server test harness")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    verbose: bool,

    #[arg(long, global = true, help = "Harness settings file (TOML)")]
    settings: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configured scenarios against the device
    Run {
        #[arg(
            short,
            long,
            default_value = "all",
            help = "Channel to test: ssh, api, gui or all"
        )]
        test_type: String,
        #[arg(
            short,
            long,
            default_value = "config/device_config.json",
            help = "Device configuration file"
        )]
        config: PathBuf,
        #[arg(
            long,
            default_value = "config/test_scenarios",
            help = "Directory holding scenario files"
        )]
        scenario_dir: PathBuf,
    },
    /// Certificate management
    Certs {
        #[command(subcommand)]
        action: CertCommands,
    },
    /// Scenario inspection
    Scenarios {
        #[command(subcommand)]
        action: ScenarioCommands,
    },
    /// Harness settings management
    Settings {
        #[command(subcommand)]
        action: SettingsCommands,
    },
}

#[derive(Subcommand)]
enum CertCommands {
    /// Generate a CA and broker server certificate
    Generate {
        #[arg(short, long, help = "Output directory (defaults to the settings certificate directory)")]
        out: Option<PathBuf>,
    },
    /// Show certificate information
    Show {
        #[arg(help = "Certificate file")]
        cert_file: PathBuf,
        #[arg(long, help = "Private key file to check permissions of")]
        key_file: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ScenarioCommands {
    /// List the scenarios a device configuration would run
    List {
        #[arg(
            short,
            long,
            default_value = "config/device_config.json",
            help = "Device configuration file"
        )]
        config: PathBuf,
        #[arg(
            long,
            default_value = "config/test_scenarios",
            help = "Directory holding scenario files"
        )]
        scenario_dir: PathBuf,
    },
}

#[derive(Subcommand)]
enum SettingsCommands {
    /// Write default settings
    Init {
        #[arg(long, help = "Settings file path")]
        path: Option<PathBuf>,
    },
    /// Show effective settings
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let settings_path = cli
        .settings
        .clone()
        .unwrap_or_else(HarnessSettings::get_config_path);

    let result = match cli.command {
        Commands::Run {
            test_type,
            config,
            scenario_dir,
        } => handle_run(&test_type, config, scenario_dir, settings_path).await,
        Commands::Certs { action } => handle_cert_commands(action, settings_path),
        Commands::Scenarios { action } => handle_scenario_commands(action),
        Commands::Settings { action } => handle_settings_commands(action, settings_path),
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

async fn handle_run(
    test_type: &str,
    config_path: PathBuf,
    scenario_dir: PathBuf,
    settings_path: PathBuf,
) -> Result<()> {
    let channels = Channel::parse_selection(test_type).map_err(anyhow::Error::msg)?;

    let device = DeviceConfig::load_from_file(&config_path)
        .with_context(|| format!("Failed to load device configuration: {:?}", config_path))?;
    let settings = HarnessSettings::load_from_file(&settings_path)
        .context("Failed to load harness settings")?;

    info!(
        "Testing {} ({}) on channels: {}",
        device.device.name,
        device.device.ip,
        channels
            .iter()
            .map(Channel::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    );

    let scenarios = load_scenarios(&device, &scenario_dir);
    if scenarios.is_empty() {
        warn!("Nothing to run, no report written");
        return Ok(());
    }

    let backends = LiveBackends::new(&device, &settings);
    let mut runner = Runner::new(&device, &settings, backends);
    let results = runner.run(&scenarios, &channels).await;

    report::write_report(&results, &device, &settings.output.results_dir)?;
    Ok(())
}

fn handle_cert_commands(action: CertCommands, settings_path: PathBuf) -> Result<()> {
    match action {
        CertCommands::Generate { out } => {
            let cert_dir = match out {
                Some(dir) => dir,
                None => {
                    let settings = HarnessSettings::load_from_file(&settings_path)
                        .context("Failed to load harness settings")?;
                    settings.output.certificate_dir
                }
            };
            let bundle = CertificateManager::new(cert_dir).generate_broker_bundle()?;
            println!("CA certificate:     {}", bundle.ca_file.display());
            println!("Server certificate: {}", bundle.cert_file.display());
            println!("Server key:         {}", bundle.key_file.display());
        }
        CertCommands::Show {
            cert_file,
            key_file,
        } => {
            let info = certificate_info(&cert_file)?;
            println!("Certificate Information:");
            println!("  Subject: {}", info.subject);
            println!("  Issuer: {}", info.issuer);
            println!(
                "  Valid from: {}",
                info.not_before.format("%Y-%m-%d %H:%M:%S UTC")
            );
            println!(
                "  Valid until: {}",
                info.not_after.format("%Y-%m-%d %H:%M:%S UTC")
            );
            println!("  Serial: {}", info.serial_number);
            println!("  SHA-256: {}", info.sha256_fingerprint);
            println!(
                "  Status: {}",
                if info.is_valid { "Valid" } else { "Invalid" }
            );
            println!("  Days until expiry: {}", info.days_until_expiry);

            if let Some(key_file) = key_file {
                let secure = check_private_key_permissions(&key_file)?;
                println!(
                    "  Key permissions: {}",
                    if secure { "OK" } else { "too permissive" }
                );
            }
        }
    }
    Ok(())
}

fn handle_scenario_commands(action: ScenarioCommands) -> Result<()> {
    match action {
        ScenarioCommands::List {
            config,
            scenario_dir,
        } => {
            let device = DeviceConfig::load_from_file(&config)
                .with_context(|| format!("Failed to load device configuration: {:?}", config))?;
            for scenario in load_scenarios(&device, &scenario_dir) {
                let target = match &scenario.config {
                    ScenarioConfig::Broker(broker) => format!("port {}", broker.expected_port()),
                    ScenarioConfig::DataToServer(dts) => format!(
                        "{}:{} topic {}",
                        dts.server.server_address, dts.server.port, dts.server.topic
                    ),
                };
                println!(
                    "{:<16} {:<24} {:<40} {}",
                    scenario.kind,
                    scenario.name,
                    target,
                    scenario.description.as_deref().unwrap_or("")
                );
            }
        }
    }
    Ok(())
}

fn handle_settings_commands(action: SettingsCommands, settings_path: PathBuf) -> Result<()> {
    match action {
        SettingsCommands::Init { path } => {
            let path = path.unwrap_or(settings_path);
            HarnessSettings::default()
                .save_to_file(&path)
                .context("Failed to create default settings")?;
            info!("Default settings created at: {:?}", path);
        }
        SettingsCommands::Show => {
            let settings = HarnessSettings::load_from_file(&settings_path)
                .context("Failed to load harness settings")?;
            let toml_str =
                toml::to_string_pretty(&settings).context("Failed to serialize settings")?;
            println!("{}", toml_str);
        }
    }
    Ok(())
}
