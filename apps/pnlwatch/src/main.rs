mod app;
mod table;

use clap::{Parser, ValueEnum};
use pnlwatch_domain::services::sorting::SortColumn;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "pnlwatch")]
#[command(about = "Polls an exchange and tracks per-position PnL history.", version)]
struct Cli {
    /// Config file path (TOML). If omitted, uses env PNLWATCH_CONFIG.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Column to sort the position table by (default: unrealized PnL).
    #[arg(long)]
    sort: Option<SortArg>,

    /// Sort ascending instead of descending.
    #[arg(long)]
    ascending: bool,

    /// Run a single poll cycle, print the table and exit.
    #[arg(long)]
    once: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum SortArg {
    Symbol,
    Cost,
    Pnl,
    Pnl1h,
    Pnl24h,
    Realized,
}

impl From<SortArg> for SortColumn {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::Symbol => SortColumn::Symbol,
            SortArg::Cost => SortColumn::Cost,
            SortArg::Pnl => SortColumn::UnrealizedPnl,
            SortArg::Pnl1h => SortColumn::Change1h,
            SortArg::Pnl24h => SortColumn::Change24h,
            SortArg::Realized => SortColumn::RealizedPnl,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    if let Err(err) = init_tracing() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
    if let Err(err) = init_metrics() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }

    let config_path = match cli.config.or_else(|| {
        std::env::var("PNLWATCH_CONFIG")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
    }) {
        Some(path) => path,
        None => {
            eprintln!("error: missing --config and env PNLWATCH_CONFIG is not set");
            std::process::exit(1);
        }
    };

    let opts = app::AppOpts {
        config_path,
        sort_column: cli.sort.map(SortColumn::from),
        ascending: cli.ascending,
        once: cli.once,
    };

    if let Err(err) = app::run(opts) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing() -> Result<(), String> {
    let filter = std::env::var("PNLWATCH_LOG").unwrap_or_else(|_| "info".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_new(filter)
        .map_err(|err| format!("invalid log filter: {err}"))?;

    // logs go to stderr; stdout is reserved for the position table
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

#[cfg(feature = "prometheus")]
fn init_metrics() -> Result<Option<SocketAddr>, String> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    let Some(raw) = std::env::var("PNLWATCH_METRICS_ADDR").ok() else {
        return Ok(None);
    };
    if raw.trim().is_empty() {
        return Ok(None);
    }

    let addr: SocketAddr = raw
        .parse()
        .map_err(|err| format!("invalid PNLWATCH_METRICS_ADDR (expected host:port): {err}"))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|err| format!("failed to install prometheus exporter: {err}"))?;

    tracing::info!(metrics_addr = %addr, "prometheus metrics exporter enabled");
    Ok(Some(addr))
}

#[cfg(not(feature = "prometheus"))]
fn init_metrics() -> Result<Option<SocketAddr>, String> {
    Ok(None)
}
