use anyhow::Result;
use clap::Parser;
use console::style;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use video2note::pipeline::{LogObserver, RunObserver, SpinnerObserver};
use video2note::{output, utils, Cli, Config, ExecutionContext, ProviderRegistry, Runner};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("error:").red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    init_tracing(&config.app.log_level, cli.log_json);

    if !config.app.mock {
        // Non-fatal: the configured providers may not need every tool
        let missing_deps = utils::check_dependencies().await;
        if !missing_deps.is_empty() {
            eprintln!("⚠️  Dependency check warnings:");
            for dep in missing_deps {
                eprintln!("   • {}", dep);
            }
        }
    }

    let observer: Arc<dyn RunObserver> = if !cli.log_json && console::Term::stderr().is_term() {
        Arc::new(SpinnerObserver::new())
    } else {
        Arc::new(LogObserver)
    };

    let cancellation = CancellationToken::new();
    let on_interrupt = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing in-flight work");
            on_interrupt.cancel();
        }
    });

    let registry = ProviderRegistry::new();
    for (capability, names) in registry.list() {
        tracing::debug!("{} providers: {}", capability, names.join(", "));
    }

    let runner = Runner::new(Arc::new(config), Arc::new(registry)).with_observer(observer);
    let mut ctx = ExecutionContext::with_cancellation(cancellation);

    let report = runner.run_with(cli.run_mode(), &mut ctx).await?;
    output::print_report(&report);

    Ok(())
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}
