//! Remote Node Exporter binary
//!
//! Serves Prometheus node metrics read from a remote host over SSH.

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use remote_node_exporter::{
    start_web_server, Channel, ExporterConfig, NodeCollector, SshConnector, WebConfig,
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_SSH_PORT, DEFAULT_WEB_PORT,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "remote_node_exporter")]
#[command(about = "Prometheus node metrics for a remote host, gathered over SSH")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = "Austin Couch")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Web server bind address
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Web server port
    #[arg(short, long, env = "PORT", default_value_t = DEFAULT_WEB_PORT)]
    port: u16,

    /// Remote host to read metrics from
    #[arg(long, env = "SSH_HOST", default_value = "127.0.0.1")]
    ssh_host: String,

    /// Remote SSH port
    #[arg(long, env = "SSH_PORT", default_value_t = DEFAULT_SSH_PORT)]
    ssh_port: u16,

    /// Remote user name (also read from SSH_USERNAME)
    #[arg(long, env = "SSH_USER")]
    ssh_user: Option<String>,

    /// Remote password, used through sshpass (also read from SSH_PASSWORD)
    #[arg(long, env = "SSH_PASS", hide_env_values = true)]
    ssh_pass: Option<String>,

    /// Private key file for key authentication
    #[arg(long, env = "SSH_KEYFILE")]
    ssh_keyfile: Option<PathBuf>,

    /// Remote `.prom` file or directory of `*.prom` files to pass through
    #[arg(long, env = "TEXTFILE_PATH")]
    textfile_path: Option<String>,

    /// Seconds to wait for the SSH connection
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS)]
    connect_timeout: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the web server (default)
    Serve(ServeArgs),

    /// Run one scrape, print it and exit
    Scrape(ScrapeArgs),
}

#[derive(Args, Default)]
struct ServeArgs {
    /// Disable gzip compression of responses
    #[arg(long)]
    no_compression: bool,
}

#[derive(Args)]
struct ScrapeArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Prometheus text exposition
    Text,
    /// Metric records as JSON
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&cli)?;

    match &cli.command {
        Some(Commands::Serve(args)) => serve_command(&cli, args).await?,
        Some(Commands::Scrape(args)) => scrape_command(&cli, args).await?,
        None => serve_command(&cli, &ServeArgs::default()).await?,
    }

    Ok(())
}

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let level = if cli.debug {
        Level::DEBUG
    } else if cli.verbose {
        Level::INFO
    } else {
        Level::WARN
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to install the log subscriber")?;

    Ok(())
}

fn print_banner(cli: &Cli) {
    println!("Remote Node Exporter");
    println!("   Version: {}", env!("CARGO_PKG_VERSION"));
    println!("   Remote host: {}:{}", cli.ssh_host, cli.ssh_port);
    println!();
}

fn exporter_config(cli: &Cli) -> ExporterConfig {
    let username = cli
        .ssh_user
        .clone()
        .or_else(|| std::env::var("SSH_USERNAME").ok());
    let password = cli
        .ssh_pass
        .clone()
        .or_else(|| std::env::var("SSH_PASSWORD").ok());

    ExporterConfig::new(&cli.ssh_host)
        .with_port(cli.ssh_port)
        .with_username(username)
        .with_password(password)
        .with_identity_file(cli.ssh_keyfile.clone())
        .with_textfile_path(cli.textfile_path.clone())
        .with_connect_timeout(Duration::from_secs(cli.connect_timeout))
}

async fn serve_command(cli: &Cli, args: &ServeArgs) -> anyhow::Result<()> {
    print_banner(cli);

    let config = Arc::new(exporter_config(cli));
    let channel = Arc::new(Channel::new(SshConnector::new(Arc::clone(&config))));
    if let Err(e) = channel.connect().await {
        warn!(
            "Initial connection to {} failed, retrying on first scrape: {}",
            config.address(),
            e
        );
    }

    let collector = Arc::new(NodeCollector::from_config(Arc::clone(&channel), &config));
    let web_config = WebConfig::new(&cli.host, cli.port).with_compression(!args.no_compression);

    info!("Web server configuration:");
    info!("  - Bind address: {}", web_config.bind_address());
    info!("  - Remote host: {}", config.address());
    info!("  - Compression enabled: {}", web_config.enable_compression);
    if let Some(path) = &config.textfile_path {
        info!("  - Textfile path: {}", path);
    }

    let served = start_web_server(web_config, collector).await;
    channel.disconnect().await;
    served.context("web server failed")
}

async fn scrape_command(cli: &Cli, args: &ScrapeArgs) -> anyhow::Result<()> {
    let config = Arc::new(exporter_config(cli));
    let channel = Arc::new(Channel::new(SshConnector::new(Arc::clone(&config))));
    let collector = NodeCollector::from_config(Arc::clone(&channel), &config);

    let result = match args.format {
        OutputFormat::Text => collector.scrape().await.map_err(anyhow::Error::from),
        OutputFormat::Json => match collector.collect_records().await {
            Ok(records) => serde_json::to_string_pretty(&records).map_err(anyhow::Error::from),
            Err(e) => Err(e.into()),
        },
    };
    channel.disconnect().await;

    let output = result.with_context(|| format!("scrape of {} failed", config.address()))?;
    print!("{}", output);
    if args.format == OutputFormat::Json {
        println!();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from([
            "remote_node_exporter",
            "--port",
            "9200",
            "--ssh-host",
            "192.168.2.1",
            "--ssh-user",
            "admin",
            "--textfile-path",
            "/opt/metrics/",
        ])
        .unwrap();
        assert_eq!(cli.port, 9200);
        assert!(cli.command.is_none());

        let config = exporter_config(&cli);
        assert_eq!(config.destination(), "admin@192.168.2.1");
        assert_eq!(config.textfile_target().as_deref(), Some("/opt/metrics/*.prom"));
    }

    #[test]
    fn test_default_values() {
        let cli = Cli::try_parse_from(["remote_node_exporter"]).unwrap();
        assert_eq!(cli.host, "0.0.0.0");
        assert_eq!(cli.connect_timeout, DEFAULT_CONNECT_TIMEOUT_SECS);
        if std::env::var_os("PORT").is_none() {
            assert_eq!(cli.port, DEFAULT_WEB_PORT);
        }
    }

    #[test]
    fn test_subcommands() {
        let cli =
            Cli::try_parse_from(["remote_node_exporter", "scrape", "--format", "json"]).unwrap();
        match cli.command {
            Some(Commands::Scrape(args)) => assert_eq!(args.format, OutputFormat::Json),
            _ => panic!("expected scrape"),
        }

        let cli =
            Cli::try_parse_from(["remote_node_exporter", "serve", "--no-compression"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Serve(ServeArgs { no_compression: true }))));

        let yaml = Cli::try_parse_from(["remote_node_exporter", "scrape", "--format", "yaml"]);
        assert!(yaml.is_err());
    }
}
