use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use certbot_dns_azure::{Authenticator, AzureConfig, ResourceId, CONFIG_TEMPLATE};
use clap::{Args as ClapArgs, Parser};
use fs_err as fs;
use tracing::info;

fn app_version() -> String {
    const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");
    const VERSION: &str = git_version::git_version!(
        args = ["--abbrev=20", "--always", "--dirty=-modified"],
        prefix = "git:",
        fallback = "unknown"
    );
    format!("v{CARGO_PKG_VERSION} ({VERSION})")
}

#[derive(ClapArgs)]
struct ChallengeArgs {
    /// Path to the configuration file
    #[arg(short, long, visible_alias = "credentials")]
    config: PathBuf,
    /// Domain being validated
    #[arg(long, env = "CERTBOT_DOMAIN")]
    domain: String,
    /// Validation value to publish or withdraw
    #[arg(long, env = "CERTBOT_VALIDATION")]
    validation: String,
    /// TXT record name, defaults to `_acme-challenge.<domain>`
    #[arg(long)]
    validation_name: Option<String>,
}

impl ChallengeArgs {
    fn validation_name(&self) -> String {
        match &self.validation_name {
            Some(name) => name.clone(),
            None => {
                let base = self.domain.strip_prefix("*.").unwrap_or(&self.domain);
                format!("_acme-challenge.{base}")
            }
        }
    }

    fn authenticator(&self) -> Result<Authenticator> {
        let config = AzureConfig::load(&self.config).context("Failed to load configuration")?;
        Authenticator::from_config(&config).context("Failed to create authenticator")
    }
}

#[derive(Parser)]
enum Command {
    /// Publish a dns-01 validation value
    Perform {
        #[command(flatten)]
        challenge: ChallengeArgs,
        /// Seconds to wait for DNS propagation after publishing
        #[arg(long, default_value_t = 10)]
        propagation_seconds: u64,
    },
    /// Withdraw a published validation value
    Cleanup {
        #[command(flatten)]
        challenge: ChallengeArgs,
    },
    /// Validate the configuration file
    Check {
        /// Path to the configuration file
        #[arg(short, long, visible_alias = "credentials")]
        config: PathBuf,
    },
    /// Generate configuration template
    Cfg {
        /// Write to file
        #[arg(short, long)]
        write_to: Option<PathBuf>,
    },
}

#[derive(Parser)]
#[command(author, version, about, long_version = app_version())]
struct Args {
    #[command(subcommand)]
    command: Command,
}

fn check(config: &Path) -> Result<()> {
    let config = AzureConfig::load(config).context("Failed to load configuration")?;
    config.zones.validate()?;
    println!("environment: {}", config.environment);
    println!("credential: {}", config.credentials.select().kind());
    for (domain, resource_id) in config.zones.iter() {
        let resource = ResourceId::parse(resource_id)?;
        let zone = resource.dns_zone().unwrap_or(domain);
        match resource.txt_record() {
            Some(record) => println!("{domain} -> {zone} (TXT {record})"),
            None => println!("{domain} -> {zone}"),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    {
        use tracing_subscriber::{fmt, EnvFilter};
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        fmt().with_env_filter(filter).init();
    }

    let args = Args::parse();
    match args.command {
        Command::Perform {
            challenge,
            propagation_seconds,
        } => {
            let authenticator = challenge.authenticator()?;
            authenticator
                .perform(
                    &challenge.domain,
                    &challenge.validation_name(),
                    &challenge.validation,
                )
                .await?;
            info!("waiting {propagation_seconds}s for DNS propagation");
            tokio::time::sleep(Duration::from_secs(propagation_seconds)).await;
        }
        Command::Cleanup { challenge } => {
            let authenticator = challenge.authenticator()?;
            authenticator
                .cleanup(
                    &challenge.domain,
                    &challenge.validation_name(),
                    &challenge.validation,
                )
                .await?;
        }
        Command::Check { config } => check(&config)?,
        Command::Cfg { write_to } => match write_to {
            Some(path) => fs::write(path, CONFIG_TEMPLATE)?,
            None => print!("{CONFIG_TEMPLATE}"),
        },
    }
    Ok(())
}
