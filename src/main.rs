use anyhow::{Context, Result};
use clap::Parser;
use colored::control::set_override as set_color_override;
use policy_test::channel::{SessionConfig, SshSession};
use policy_test::engine::execute;
use policy_test::error::SchemaError;
use policy_test::expand::expand;
use policy_test::parser::PacketTracerParser;
use policy_test::pipeline::{Artifacts, conclude};
use policy_test::report::print_human;
use policy_test::resolve::{AddressResolver, Hostfile};
use policy_test::spec::{default_retry_path, load_spec};
use policy_test::validate::check_spec;
use std::io::{self, BufRead, IsTerminal};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "policy-test",
    version,
    about = "Validate firewall policy with packet-tracer over an ssh session"
)]
struct Cli {
    /// IP address or hostname of the firewall
    #[arg(short = 'i', long)]
    host: String,

    /// SSH port
    #[arg(short = 's', long = "ssh-port", visible_alias = "ssh_port", default_value_t = 22)]
    ssh_port: u16,

    /// Privilege 15 username
    #[arg(short = 'u', long)]
    username: String,

    /// YAML file with the test declarations
    #[arg(short = 'y', long = "yaml", value_name = "FILE")]
    spec: PathBuf,

    /// Prompt for the login password
    #[arg(short = 'p', long)]
    password: bool,

    /// Prompt for the enable password
    #[arg(short = 'e', long = "enable-password", visible_alias = "enable_password")]
    enable_password: bool,

    /// Hostfile consulted before DNS (column 2 address, column 3 name)
    #[arg(long, value_name = "FILE", visible_alias = "hf")]
    hostfile: Option<PathBuf>,

    /// Where to write the retry spec [default: retry.yml next to the spec]
    #[arg(long = "retry-file", value_name = "FILE")]
    retry_file: Option<PathBuf>,

    /// Also write all outcomes and statistics to this YAML file
    #[arg(long, value_name = "FILE")]
    results: Option<PathBuf>,

    /// ssh client to run
    #[arg(long = "ssh-command", value_name = "CMD", default_value = "ssh")]
    ssh_command: String,

    /// Seconds to wait for the device to answer a command
    #[arg(long, value_name = "SECS", default_value_t = 30)]
    timeout: u64,

    /// Validate and expand only; list the commands without connecting
    #[arg(long = "dry-run")]
    dry_run: bool,

    /// Only report failed and skipped testlets
    #[arg(long = "hide-passes")]
    hide_passes: bool,

    #[arg(long = "no-color")]
    no_color: bool,

    /// Do not print the report
    #[arg(short = 'q', long)]
    silent: bool,

    #[arg(short = 'v', long)]
    verbose: bool,
}

/// Reads a secret without echo on a terminal, or one line from piped stdin.
fn prompt_secret(label: &str) -> Result<String> {
    let secret = if io::stdin().is_terminal() {
        rpassword::prompt_password(format!("{label}: "))
    } else {
        read_secret(&mut io::stdin().lock())
    };
    secret.with_context(|| format!("failed to read {}", label.to_lowercase()))
}

fn read_secret(reader: &mut impl BufRead) -> io::Result<String> {
    rpassword::read_password_from_bufread(reader)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        std::env::var("RUST_LOG").unwrap_or_else(|_| "policy_test=info".to_string())
    } else {
        std::env::var("RUST_LOG").unwrap_or_else(|_| "policy_test=warn".to_string())
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    set_color_override(!cli.no_color);

    let spec = load_spec(&cli.spec)?;
    let hostfile = match &cli.hostfile {
        Some(path) => {
            let table = Hostfile::load(path)?;
            info!("Loaded {} hostfile entries from {}", table.len(), path.display());
            Some(table)
        }
        None => None,
    };
    let resolver = AddressResolver::new(hostfile);

    let validated = match check_spec(&spec, &resolver) {
        Ok(v) => v,
        Err(SchemaError::Invalid(report)) => {
            report.log_failures();
            error!(
                "{} of {} declarations failed validation; fix them and rerun",
                report.failures().count(),
                report.declarations.len()
            );
            std::process::exit(2);
        }
        Err(e) => {
            error!("{}", e);
            std::process::exit(2);
        }
    };
    let testlets = expand(&validated, &resolver);

    if cli.dry_run {
        for t in &testlets {
            let mark = if t.executable { "run " } else { "skip" };
            println!("{} {}: {}", mark, t.interface, t.command);
        }
        return Ok(());
    }

    let mut config = SessionConfig::new(cli.host.clone(), cli.ssh_port, cli.username.clone());
    config.ssh_command = cli.ssh_command.clone();
    config.timeout = Duration::from_secs(cli.timeout);
    if cli.password {
        config.password = Some(prompt_secret("Password")?);
    }
    if cli.enable_password {
        config.enable_password = Some(prompt_secret("Enable password")?);
    }
    config.preflight()?;

    let mut session = SshSession::open(&config)
        .with_context(|| format!("failed to open session to {}", cli.host))?;
    let summary = execute(testlets, &mut session, &PacketTracerParser)
        .context("device session failed, run aborted")?;

    if !cli.silent {
        print_human(&summary, cli.hide_passes);
    }
    let artifacts = Artifacts {
        retry: cli
            .retry_file
            .clone()
            .unwrap_or_else(|| default_retry_path(&cli.spec)),
        results: cli.results.clone(),
    };
    let retried = conclude(&summary, &artifacts, move || session.close())?;
    if retried > 0 && !cli.silent {
        println!("{} testlet(s) to retry: {}", retried, artifacts.retry.display());
    }

    Ok(())
}
