use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tessel_config::{Loader, TesselConfig};
use tessel_lsp::TesselLanguageServer;
use tokio::io::{stdin, stdout};
use tower_lsp::{LspService, Server};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tessel-lsp", version)]
#[command(about = "Language server for the Tessel configuration language")]
struct Args {
    /// Library search path, lowest priority first. May be repeated.
    #[arg(short = 'J', long = "jpath", env = "TESSEL_PATH", value_delimiter = ':')]
    jpath: Vec<PathBuf>,

    /// Derive import paths from the project layout (tesselfile.json and main.tsl)
    #[arg(long)]
    project: bool,

    /// External variable visible through std.extVar. May be repeated.
    #[arg(long = "ext-var", value_name = "KEY=VALUE", value_parser = parse_ext_var)]
    ext_vars: Vec<(String, String)>,

    /// Report evaluation errors (the default)
    #[arg(long = "eval-diags")]
    eval_diags: bool,

    /// Only report syntax errors
    #[arg(long = "no-eval-diags", conflicts_with = "eval_diags")]
    no_eval_diags: bool,

    /// Report lint warnings
    #[arg(long = "lint-diags")]
    lint_diags: bool,

    /// Configuration file layered over the built-in defaults
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long = "log-level")]
    log_level: Option<String>,
}

fn parse_ext_var(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))
}

fn load_config(args: &Args) -> anyhow::Result<TesselConfig> {
    let mut loader = Loader::new();
    if let Some(path) = &args.config {
        loader = loader.with_file(path);
    }
    loader = loader.with_env();
    if args.project {
        loader = loader.set_override("server.resolve_paths_with_project", true)?;
    }
    if args.eval_diags || args.no_eval_diags {
        loader = loader.set_override("diagnostics.eval", args.eval_diags)?;
    }
    if args.lint_diags {
        loader = loader.set_override("diagnostics.lint", true)?;
    }
    if let Some(level) = &args.log_level {
        loader = loader.set_override("logging.level", level.as_str())?;
    }
    let mut config = loader.build().context("failed to load configuration")?;
    config.server.jpath.extend(args.jpath.iter().cloned());
    config.server.ext_vars.extend(args.ext_vars.iter().cloned());
    Ok(config)
}

fn init_tracing(level: &str) {
    // stdout carries the protocol
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    init_tracing(&config.logging.level);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        project = config.server.resolve_paths_with_project,
        "starting tessel-lsp"
    );

    let (service, socket) = LspService::new(|client| TesselLanguageServer::new(client, &config));
    Server::new(stdin(), stdout(), socket).serve(service).await;
    Ok(())
}
