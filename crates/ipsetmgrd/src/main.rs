//! ipsetmgrd - ipset membership manager
//!
//! Reconciles the kernel sets listed in a JSON file and destroys the ones
//! named on the command line.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use ipsetmgr::{load_set_specs, IpsetConfig, IpsetMgr, SetKey};
use ipsetmgr_common::{CommandExecutor, LoggingExecutor, ShellExecutor};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// ipset membership manager
#[derive(Parser, Debug)]
#[command(name = "ipsetmgrd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON configuration file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// JSON file listing desired set memberships
    #[arg(short = 's', long)]
    sets: Option<PathBuf>,

    /// Sets to destroy, as <family>:<id> (repeatable)
    #[arg(short = 'd', long = "destroy")]
    destroy: Vec<SetKey>,

    /// hashsize for created sets (overrides the config file)
    #[arg(long)]
    hashsize: Option<u32>,

    /// maxelem for created sets (overrides the config file)
    #[arg(long)]
    maxelem: Option<u32>,

    /// Delta size at which a set is rebuilt instead of patched
    #[arg(long)]
    switch_threshold: Option<usize>,

    /// ipset binary
    #[arg(long)]
    ipset_cmd: Option<String>,

    /// Command prefix for privileged execution (e.g. "sudo -n")
    #[arg(long)]
    root_helper: Option<String>,

    /// Destroy every managed set before exiting
    #[arg(long)]
    teardown: bool,

    /// Log commands instead of executing them
    #[arg(long)]
    dry_run: bool,

    /// Log level filter (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,
}

impl Args {
    /// Config file values with command line overrides applied
    fn build_config(&self) -> anyhow::Result<IpsetConfig> {
        let mut config = match &self.config {
            Some(path) => IpsetConfig::from_json_file(path)?,
            None => IpsetConfig::default(),
        };

        if self.hashsize.is_some() {
            config.hashsize = self.hashsize;
        }
        if self.maxelem.is_some() {
            config.maxelem = self.maxelem;
        }
        if let Some(threshold) = self.switch_threshold {
            config.switch_threshold = threshold;
        }
        if let Some(cmd) = &self.ipset_cmd {
            config.ipset_cmd = cmd.clone();
        }
        if self.root_helper.is_some() {
            config.root_helper = self.root_helper.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level);

    info!("--- Starting ipsetmgrd ---");

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("ipsetmgrd failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = args.build_config().context("invalid configuration")?;

    let executor: Arc<dyn CommandExecutor> = if args.dry_run {
        info!("Dry-run mode: commands are logged, not executed");
        Arc::new(LoggingExecutor)
    } else {
        match &config.root_helper {
            Some(helper) => Arc::new(ShellExecutor::with_root_helper(helper)),
            None => Arc::new(ShellExecutor::new()),
        }
    };

    let mgr = IpsetMgr::new(config, executor);

    if let Some(path) = &args.sets {
        let specs = load_set_specs(path)?;
        for spec in &specs {
            let outcome = mgr
                .set_members(&spec.id, spec.family, &spec.members)
                .await
                .with_context(|| format!("failed to sync set {}:{}", spec.family, spec.id))?;
            info!("{}:{} -> {:?}", spec.family, spec.id, outcome);
        }
    }

    for key in &args.destroy {
        mgr.purge(&key.id, key.family)
            .await
            .with_context(|| format!("failed to destroy set {}", key))?;
    }

    if args.teardown {
        mgr.destroy_all().await.context("teardown failed")?;
    }

    info!(
        "ipsetmgrd done ({} set(s) managed)",
        mgr.managed_sets().await.len()
    );
    Ok(())
}

fn init_logging(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_level(true)
        .init();
}
