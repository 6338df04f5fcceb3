use std::process;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use kubestrap::cli::{
    build_executor, build_provisioner, build_reporter, format_outcome, format_plan,
    format_teardown_report, format_validation_result, load_manifest, plan_manifest,
    render_config, run_provision, run_teardown, to_json, validate_manifest_file, Cli, Commands,
};
use kubestrap::report::OutcomeReporter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    // Load .env file if specified
    if let Some(ref env_file) = cli.env_file {
        if let Err(e) = dotenvy::from_path(env_file) {
            error!("Failed to load env file {}: {}", env_file.display(), e);
            process::exit(1);
        }
    }

    match run(cli).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}

/// Cancel `token` on Ctrl-C so in-flight remote commands are torn down
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling in-flight commands");
            token.cancel();
        }
    });
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    match cli.command {
        Commands::Provision(args) => {
            let manifest = load_manifest(&args.manifest)
                .with_context(|| format!("loading {}", args.manifest.display()))?;
            let executor = Arc::new(build_executor(&args.connection));
            let provisioner = build_provisioner(&args.connection, executor);
            let reporter = build_reporter(&args.connection);

            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());

            let outcome = run_provision(
                &provisioner,
                &manifest,
                reporter.as_ref().map(|r| r as &dyn OutcomeReporter),
                &cancel,
            )
            .await;

            if args.json {
                println!("{}", to_json(&outcome)?);
            } else {
                print!("{}", format_outcome(&outcome));
            }
            Ok(if outcome.success { 0 } else { 1 })
        }

        Commands::Teardown(args) => {
            let manifest = load_manifest(&args.manifest)
                .with_context(|| format!("loading {}", args.manifest.display()))?;
            let executor = Arc::new(build_executor(&args.connection));
            let provisioner = build_provisioner(&args.connection, executor);
            let reporter = build_reporter(&args.connection);

            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());

            let report = run_teardown(
                &provisioner,
                &manifest,
                reporter.as_ref().map(|r| r as &dyn OutcomeReporter),
                &cancel,
            )
            .await;

            if args.json {
                println!("{}", to_json(&report)?);
            } else {
                print!("{}", format_teardown_report(&report));
            }
            Ok(if report.success() { 0 } else { 1 })
        }

        Commands::Plan(args) => {
            let manifest = load_manifest(&args.manifest)
                .with_context(|| format!("loading {}", args.manifest.display()))?;
            let plan = plan_manifest(&manifest)?;
            if args.json {
                println!("{}", to_json(&plan)?);
            } else {
                print!("{}", format_plan(&plan));
            }
            Ok(0)
        }

        Commands::Render(args) => {
            let manifest = load_manifest(&args.manifest)
                .with_context(|| format!("loading {}", args.manifest.display()))?;
            print!("{}", render_config(&manifest, args.target)?);
            Ok(0)
        }

        Commands::Validate(args) => {
            let result = validate_manifest_file(&args.manifest);
            print!(
                "{}",
                format_validation_result(&result, &args.manifest.display().to_string())
            );
            Ok(if result.valid { 0 } else { 1 })
        }
    }
}
