use crate::chrome::ChromiumEngine;
use crate::config::{Config, ConfigOverrides};
use crate::engine::RenderingEngine;
use crate::orchestrator::ScanOrchestrator;
use crate::policy::{PrivateNetworkResolver, SystemResolver};
use crate::utils::strip_quotes;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "adscan")]
#[command(version, about = "Scan an ad creative in headless Chrome and log its network activity")]
#[command(
    long_about = "Loads a page in headless Chrome, records every resource request, response and error, \
and aborts requests into private networks."
)]
pub struct Cli {
    #[arg(long, value_name = "BOOL", value_parser = parse_flag, help = "Load cookies before navigation")]
    pub use_cookie: Option<bool>,

    #[arg(long, value_name = "BOOL", value_parser = parse_flag, help = "Enable JavaScript")]
    pub enable_javascript: Option<bool>,

    #[arg(
        long,
        value_name = "BOOL",
        value_parser = parse_flag,
        help = "Page is served locally; exempt its first request from the private-network check"
    )]
    pub hosted_locally: Option<bool>,

    #[arg(long, env = "ADSCAN_URL", value_parser = parse_string, help = "URL to scan")]
    pub url: Option<String>,

    #[arg(long, env = "ADSCAN_LOG_FILE", value_parser = parse_path, help = "Where to write the JSON log")]
    pub log_file: Option<PathBuf>,

    #[arg(long, value_parser = parse_path, help = "Directory of <domain>.txt cookie files")]
    pub cookie_dir: Option<PathBuf>,

    #[arg(long, help = "Block requests whose destination cannot be resolved")]
    pub fail_closed: bool,

    #[arg(long, help = "Path to config file")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Path to Chrome executable")]
    pub chrome_path: Option<PathBuf>,

    #[arg(long, help = "Run Chrome in headless mode")]
    pub headless: Option<bool>,

    #[arg(long, help = "Print the scan summary as JSON")]
    pub json: bool,

    #[arg(long, help = "Pretty-print JSON output and log")]
    pub pretty: bool,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,
}

/// Any value other than `false` counts as true.
fn parse_flag(value: &str) -> Result<bool, String> {
    Ok(strip_quotes(value) != "false")
}

fn parse_string(value: &str) -> Result<String, String> {
    Ok(strip_quotes(value))
}

fn parse_path(value: &str) -> Result<PathBuf, String> {
    Ok(PathBuf::from(strip_quotes(value)))
}

impl Cli {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            use_cookie: self.use_cookie,
            javascript_enabled: self.enable_javascript,
            hosted_locally: self.hosted_locally,
            url: self.url.clone().filter(|u| !u.is_empty()),
            log_file: self.log_file.clone(),
            cookie_dir: self.cookie_dir.clone(),
            chrome_path: self.chrome_path.clone(),
            headless: self.headless,
            fail_closed: self.fail_closed,
            json_pretty: self.pretty.then_some(true),
        }
    }
}

pub async fn run() -> crate::Result<()> {
    let cli = Cli::parse();

    let config = if let Some(config_path) = &cli.config {
        let content = std::fs::read_to_string(config_path)?;
        toml::from_str(&content)?
    } else {
        Config::load()?
    };

    let config = config.load_with_overrides(cli.overrides());
    config.validate()?;

    let resolver = PrivateNetworkResolver::new(&config.policy, Arc::new(SystemResolver));
    let orchestrator = ScanOrchestrator::new(config.scan.clone(), resolver)
        .with_pretty_json(config.output.json_pretty);

    let mut engine = ChromiumEngine::new(config.browser.clone());
    let result = orchestrator.run(&mut engine).await;
    if let Err(e) = engine.close().await {
        tracing::debug!("Error while closing Chrome: {}", e);
    }

    let report = result?;
    crate::output::print_output(&report, cli.json, config.output.json_pretty)
}
