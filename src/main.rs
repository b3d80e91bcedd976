//! installkit - command-line entry point
//!
//! Thin front-end over the library: loads a catalog, resolves a request and
//! optionally runs a simulated transaction.

use anyhow::{Context, Result};
use installkit::cli::{Cli, Commands, SelectionArgs};
use installkit::{
    Catalog, DryRunBuilder, InstallKitError, InstallerConfig, OperationRunner, Resolver,
    SelectionRequest, TransactionCoordinator, TransactionStatus,
};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Initialize logging; RUST_LOG overrides the default level
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse_args();
    init_tracing(cli.verbose);
    debug!("CLI arguments parsed: {:?}", cli);

    let config = match &cli.config {
        Some(path) => InstallerConfig::load_from_file(path)?,
        None => InstallerConfig::default(),
    };
    config.validate()?;

    match cli.command {
        Commands::Validate { catalog } => {
            let loaded = Catalog::load_from_file(&catalog)?;
            println!("✓ Catalog is valid: {} component(s)", loaded.len());
            let resolver = Resolver::new(&loaded);
            for rule in resolver.cyclic_rules() {
                println!(
                    "! Autodependency rule {} of {} can never fire",
                    rule.rule, rule.owner
                );
            }
        }
        Commands::Resolve { selection, json } => {
            let catalog = Catalog::load_from_file(&selection.catalog)?;
            let resolver = Resolver::with_options(&catalog, config.resolver_options());
            let result = resolver
                .resolve(&request(&selection))
                .map_err(InstallKitError::from)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                for (i, id) in result.apply_order().enumerate() {
                    println!("{:>3}. {}", i + 1, id);
                }
            }
        }
        Commands::Simulate {
            selection,
            fail,
            json,
        } => {
            let catalog = Catalog::load_from_file(&selection.catalog)?;
            let resolver = Resolver::with_options(&catalog, config.resolver_options());

            let runner = Arc::new(OperationRunner::new(config.workers)?);
            let handle = Arc::clone(&runner);
            if let Err(e) = ctrlc::set_handler(move || handle.cancel()) {
                warn!("Failed to install Ctrl-C handler: {}", e);
            }

            let builder = fail
                .into_iter()
                .fold(DryRunBuilder::new(), |builder, id| builder.fail_apply(id));
            let report = TransactionCoordinator::new(&runner, builder)
                .install(&resolver, &request(&selection))
                .context("Transaction did not run")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                match &report.status {
                    TransactionStatus::Committed => println!("✓ Transaction committed"),
                    TransactionStatus::RolledBack { component, detail } => {
                        println!("✗ Transaction rolled back: {} failed ({})", component, detail);
                        println!("  Reverted: {}", report.reverted.join(", "));
                    }
                    TransactionStatus::Canceled => println!("✗ Transaction canceled before apply"),
                }
            }

            if !report.is_committed() {
                info!("Exiting with failure status after rollback");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn request(args: &SelectionArgs) -> SelectionRequest {
    if args.default {
        SelectionRequest::Default
    } else {
        SelectionRequest::Explicit(args.ids.clone())
    }
}
