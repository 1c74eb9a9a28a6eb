//! CLI-facing application layer.
//!
//! `App::run` resolves configuration, builds the [`IpWatch`] service and
//! dispatches one subcommand. Library calls return typed errors; this layer
//! turns them into messages on stderr and a process exit code.
//!
//! Exit codes: 0 success, 1 invalid input or failed operation, 2 invalid
//! configuration.

use std::io::Read;
use std::net::Ipv4Addr;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::cli::{Cli, Command};
use crate::config::Config;
use crate::errors::IoResultExt;
use crate::facade::IpWatch;
use crate::model::{EnrichmentResult, SightingRecord, TabId};
use crate::netutil::parse_ipv4;
use crate::output::{OutputFormat, OutputFormatter, TabStats, TextFormatter, filter_records};
use crate::store::MergeOutcome;
use crate::structured_output::{LookupReport, TabReport};
use crate::styled_output::StyledFormatter;

/// Application façade.
pub struct App;

impl App {
    /// Execute one CLI command.
    ///
    /// Returns: intended process exit code.
    pub async fn run(cli: &Cli) -> Result<i32> {
        if matches!(cli.command, Command::Schema) {
            println!("{}", TabReport::generate_json_schema()?);
            return Ok(0);
        }

        let config = match Self::load_config(cli) {
            Ok(config) => config,
            Err(e) => {
                if cli.error_enabled() {
                    eprintln!("Configuration error: {e}");
                }
                return Ok(2);
            }
        };
        debug!(
            state = ?config.storage.state_file,
            geo = %config.network.geo_endpoint,
            abuse = %config.network.abuse_endpoint,
            "configuration resolved"
        );

        let service = IpWatch::from_config(&config)?;
        let render = Renderer::new(&config);

        match &cli.command {
            Command::Scan { tab, url, file } => {
                let content = read_content(file.as_deref())?;
                let found = service.ingest_page(*tab, url, &content).await?;
                if render.format.is_structured() {
                    let records = service.tab_records(*tab).await;
                    let listed = filter_records(&records, "");
                    render.tab(*tab, &listed, TabStats::of(&records), None)?;
                } else {
                    println!("Recorded {} public IPv4 address(es) for tab {tab}", found.len());
                    for ip in found {
                        println!("  {ip}");
                    }
                }
            }
            Command::List { tab, search } => {
                let records = service.tab_records(*tab).await;
                let listed = filter_records(&records, search.as_deref().unwrap_or(""));
                render.tab(*tab, &listed, TabStats::of(&records), search.as_deref())?;
            }
            Command::Enrich { tab, ip: Some(ip) } => {
                let Some(ip) = Self::parse_ip(cli, ip) else {
                    return Ok(1);
                };
                let (result, outcome) = service.enrich_and_merge(*tab, ip).await?;
                if outcome == MergeOutcome::Dropped && cli.warn_enabled() {
                    eprintln!("Warning: {ip} is not recorded for tab {tab}; result not stored");
                }
                render.lookup(ip, result)?;
            }
            Command::Enrich { tab, ip: None } => {
                let summary = service.scan_tab(*tab).await?;
                if render.format.is_structured() {
                    let records = service.tab_records(*tab).await;
                    let listed = filter_records(&records, "");
                    render.tab(*tab, &listed, TabStats::of(&records), None)?;
                } else {
                    println!(
                        "Scanned {} address(es) for tab {tab}: {} stored, {} dropped",
                        summary.scanned, summary.merged, summary.dropped
                    );
                }
            }
            Command::Lookup { ip } => {
                let Some(ip) = Self::parse_ip(cli, ip) else {
                    return Ok(1);
                };
                let result = service.lookup(ip).await;
                render.lookup(ip, result)?;
            }
            Command::Clear { tab } => {
                let removed = service.lifecycle().clear_tab(*tab).await?;
                if !render.format.is_structured() {
                    if removed {
                        println!("Cleared data for tab {tab}");
                    } else {
                        println!("No data recorded for tab {tab}");
                    }
                }
            }
            Command::CloseTab { tab } => {
                // The removal is fire-and-forget for the service, but the
                // process must not exit before it ran.
                service
                    .lifecycle()
                    .on_tab_closed(*tab)
                    .await
                    .context("tab close task failed")?;
            }
            Command::SetKey { key } => {
                service.save_api_key(key).await?;
                if !render.format.is_structured() {
                    if key.trim().is_empty() {
                        println!("API key removed");
                    } else {
                        println!("API key saved");
                    }
                }
            }
            Command::Schema => {}
        }
        Ok(0)
    }

    fn load_config(cli: &Cli) -> Result<Config, crate::config::ConfigError> {
        let mut config = Config::load(cli.config.as_deref())?;
        config.merge_with_cli(cli);
        config.validate()?;
        Ok(config)
    }

    fn parse_ip(cli: &Cli, raw: &str) -> Option<Ipv4Addr> {
        match parse_ipv4(raw) {
            Ok(ip) => Some(ip),
            Err(e) => {
                if cli.error_enabled() {
                    eprintln!("Error: {e}");
                }
                None
            }
        }
    }
}

fn read_content(file: Option<&Path>) -> crate::errors::Result<String> {
    match file {
        Some(path) => {
            std::fs::read_to_string(path).with_path(path.display().to_string(), "read")
        }
        None => {
            let mut content = String::new();
            std::io::stdin()
                .read_to_string(&mut content)
                .with_path("<stdin>", "read")?;
            Ok(content)
        }
    }
}

/// Picks the formatter for the resolved output settings.
struct Renderer {
    format: OutputFormat,
    color: bool,
}

impl Renderer {
    fn new(config: &Config) -> Self {
        Self {
            format: config.output.format,
            color: config.output.color,
        }
    }

    fn text_formatter(&self) -> Box<dyn OutputFormatter> {
        match self.format {
            OutputFormat::Styled if self.color => Box::new(StyledFormatter::new()),
            OutputFormat::Styled => Box::new(StyledFormatter::without_colors()),
            _ => Box::new(TextFormatter),
        }
    }

    fn tab(
        &self,
        tab: TabId,
        records: &[&SightingRecord],
        stats: TabStats,
        search: Option<&str>,
    ) -> Result<()> {
        let out = match self.format {
            OutputFormat::Json => TabReport::new(tab, records, stats)
                .with_search(search)
                .to_json()?,
            OutputFormat::Yaml => TabReport::new(tab, records, stats)
                .with_search(search)
                .to_yaml()?,
            OutputFormat::Plain | OutputFormat::Styled => {
                self.text_formatter().format_tab(tab, records, stats)?
            }
        };
        print_block(&out);
        Ok(())
    }

    fn lookup(&self, ip: Ipv4Addr, result: EnrichmentResult) -> Result<()> {
        let out = match self.format {
            OutputFormat::Json => LookupReport::new(ip, result).to_json()?,
            OutputFormat::Yaml => LookupReport::new(ip, result).to_yaml()?,
            OutputFormat::Plain | OutputFormat::Styled => {
                self.text_formatter().format_lookup(ip, &result)?
            }
        };
        print_block(&out);
        Ok(())
    }
}

fn print_block(out: &str) {
    if out.ends_with('\n') {
        print!("{out}");
    } else {
        println!("{out}");
    }
}
