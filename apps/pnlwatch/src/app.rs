use crate::table;
use pnlwatch_application::config;
use pnlwatch_application::poller::{seed_store, Poller, PollerEvent, PollerSettings};
use pnlwatch_domain::services::sorting::{SortColumn, SortState};
use pnlwatch_domain::services::store::PositionStore;
use pnlwatch_infrastructure::exchange::bybit::BybitSnapshotSource;
use pnlwatch_infrastructure::persistence::state_files::FilesystemStateStore;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

const DEFAULT_TIMEOUT_MS: u64 = 5000;

pub struct AppOpts {
    pub config_path: PathBuf,
    pub sort_column: Option<SortColumn>,
    pub ascending: bool,
    pub once: bool,
}

/// State for the position table sort. `--ascending` applies to whichever
/// column is in effect, the default one included.
fn sort_state_for(column: Option<SortColumn>, ascending: bool) -> SortState {
    let mut sort = SortState::new();
    if let Some(column) = column {
        sort.select(column);
        if !ascending {
            // re-selecting the same column flips to descending
            sort.select(column);
        }
    } else if ascending {
        sort.select(sort.column());
    }
    sort
}

pub fn run(opts: AppOpts) -> Result<(), String> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| format!("failed to init tokio runtime: {err}"))?;
    runtime.block_on(run_async(opts))
}

async fn run_async(opts: AppOpts) -> Result<(), String> {
    let config = config::load_config(&opts.config_path)?;

    let state = Arc::new(FilesystemStateStore::new(&config.persistence.state_dir)?);
    let store = Arc::new(PositionStore::new(config.retention_policy()));
    seed_store(&store, state.as_ref());

    if config.resolve_api_key().is_none() {
        tracing::warn!(
            "no api key in config or env {}, expect an auth failure",
            config::API_KEY_ENV
        );
    }
    let source = Arc::new(BybitSnapshotSource::new(
        config.exchange.base_url.clone(),
        config.resolve_api_key(),
        config.exchange.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
        config.settle_asset(),
    )?);

    let sort = sort_state_for(opts.sort_column, opts.ascending);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let (stop_tx, stop_rx) = watch::channel(false);
    let poller = Poller::new(
        store.clone(),
        source,
        state,
        PollerSettings {
            poll_interval: config.poll_interval(),
            save_interval: config.save_interval(),
        },
        event_tx,
    );
    let poller_task = tokio::spawn(poller.run(stop_rx));

    let mut auth_error: Option<String> = None;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down, flushing state");
                let _ = stop_tx.send(true);
            }
            maybe_event = event_rx.recv() => {
                let Some(event) = maybe_event else { break; };
                match event {
                    PollerEvent::Updated(summary) => {
                        table::render(&store, &summary, &sort);
                        if opts.once {
                            let _ = stop_tx.send(true);
                        }
                    }
                    PollerEvent::CycleError(msg) => {
                        tracing::warn!(error = %msg, "poll cycle skipped, data is stale");
                        if opts.once {
                            let _ = stop_tx.send(true);
                        }
                    }
                    PollerEvent::AuthFailure(msg) => {
                        auth_error = Some(msg);
                    }
                    PollerEvent::Stopped => break,
                }
            }
        }
    }

    poller_task
        .await
        .map_err(|err| format!("poller task failed: {err}"))?;

    match auth_error {
        Some(msg) => Err(format!("authentication failed: {msg}")),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::sort_state_for;
    use pnlwatch_domain::services::sorting::SortColumn;

    #[test]
    fn default_column_and_direction_without_flags() {
        let sort = sort_state_for(None, false);
        assert_eq!(sort.column(), SortColumn::UnrealizedPnl);
        assert!(!sort.ascending());
    }

    #[test]
    fn ascending_applies_to_the_default_column() {
        let sort = sort_state_for(None, true);
        assert_eq!(sort.column(), SortColumn::UnrealizedPnl);
        assert!(sort.ascending());
    }

    #[test]
    fn explicit_column_honors_both_directions() {
        let descending = sort_state_for(Some(SortColumn::Cost), false);
        assert_eq!(descending.column(), SortColumn::Cost);
        assert!(!descending.ascending());

        let ascending = sort_state_for(Some(SortColumn::Cost), true);
        assert_eq!(ascending.column(), SortColumn::Cost);
        assert!(ascending.ascending());
    }

    #[test]
    fn selecting_the_default_column_explicitly_still_honors_direction() {
        let sort = sort_state_for(Some(SortColumn::UnrealizedPnl), false);
        assert_eq!(sort.column(), SortColumn::UnrealizedPnl);
        assert!(!sort.ascending());
    }
}
