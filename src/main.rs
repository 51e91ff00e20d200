mod cli;
mod handlers;

use anyhow::Result;
use snipcon::config::Config;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = cli::Cli::parse();

    // Load config
    let cfg = Config::load();

    // RUST_LOG wins over LOG_LEVEL; logs go to stderr so captured stdout stays clean
    let level = cfg.get("LOG_LEVEL").unwrap_or_else(|| "warn".to_string());
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Effective markdown switch with config default
    let md = if args.no_md {
        false
    } else if args.md {
        true
    } else {
        cfg.get_bool("PRETTIFY_MARKDOWN")
    };

    handlers::run::run(&args, &cfg, md)
}
