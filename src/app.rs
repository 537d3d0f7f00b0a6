//! Orchestration loop: one work cycle immediately at startup, then one per
//! minute, forever.
//!
//! A cycle that fails or panics is converted into an error and retried
//! through the `process_loop` profile; when that budget is spent the cycle is
//! logged and abandoned until the next tick. Nothing a cycle does can take
//! the process down.

use crate::error::{ApiError, Retryable, RetryError};
use crate::game::GameApi;
use crate::notify::NotifyClient;
use crate::profiles::RetryProfiles;
use crate::providers::{self, Provider};
use crate::retry;
use crate::sheet::{self, existing_keys, parse_sheet_items, sheet_name_of_range, supply_row, SheetStore};
use crate::{provided, supplied};
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Fixed period between cycles.
const CYCLE_PERIOD: Duration = Duration::from_secs(60);

/// Failure of one work cycle, fed back through the retry executor.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("supply fetch failed: {0}")]
    Supply(RetryError<ApiError>),
    #[error("sheet read failed: {0}")]
    SheetRead(RetryError<ApiError>),
    #[error("sheet append failed: {0}")]
    SheetAppend(RetryError<ApiError>),
    #[error("cycle panicked: {0}")]
    Panic(String),
}

impl Retryable for CycleError {
    fn retryable(&self) -> bool {
        // A cycle is retried as a unit regardless of what broke it.
        true
    }
}

/// The long-lived driver owning every collaborator, including the provider
/// roster (populated once at startup, immutable afterwards).
pub struct App<G, S> {
    game: Arc<G>,
    sheet: Arc<S>,
    notify: Arc<NotifyClient>,
    providers: Vec<Provider>,
    profiles: RetryProfiles,
    spreadsheet_id: String,
    sheet_range: String,
}

impl<G, S> App<G, S>
where
    G: GameApi + 'static,
    S: SheetStore + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        game: Arc<G>,
        sheet: Arc<S>,
        notify: Arc<NotifyClient>,
        providers: Vec<Provider>,
        profiles: RetryProfiles,
        spreadsheet_id: String,
        sheet_range: String,
    ) -> Self {
        Self { game, sheet, notify, providers, profiles, spreadsheet_id, sheet_range }
    }

    /// Run until the token is cancelled: one cycle now, then one per tick.
    pub async fn run(&self, token: &CancellationToken) {
        tracing::info!("starting supply monitor, running immediately and then every minute");

        self.run_once(token).await;

        let mut ticker = tokio::time::interval(CYCLE_PERIOD);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // the interval's first tick completes immediately

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!("shutdown requested, stopping cycle loop");
                    return;
                }
                _ = ticker.tick() => self.run_once(token).await,
            }
        }
    }

    /// Drive one guarded cycle: panics become errors, errors go through the
    /// `process_loop` retry profile, and exhaustion is logged and dropped.
    pub async fn run_once(&self, token: &CancellationToken) {
        let result = retry::execute(token, &self.profiles.process_loop, || {
            AssertUnwindSafe(self.cycle(token)).catch_unwind().map(|caught| match caught {
                Ok(outcome) => outcome,
                Err(panic) => Err(CycleError::Panic(panic_message(panic.as_ref()))),
            })
        })
        .await;

        match result {
            Ok(()) => {}
            Err(err) if err.is_cancelled() => tracing::debug!("cycle aborted by shutdown"),
            Err(err) => tracing::error!(error = %err, "cycle abandoned until next tick"),
        }
    }

    async fn cycle(&self, token: &CancellationToken) -> Result<(), CycleError> {
        tracing::debug!("starting process cycle");
        self.game.reset_call_count();

        let supplied_records =
            retry::execute(token, &self.profiles.api_request, || self.game.pending_supply())
                .await
                .map_err(CycleError::Supply)?;
        let calls_after_supply = self.game.call_count();

        if supplied_records.is_empty() {
            tracing::debug!("no pending supply found");
        } else {
            tracing::debug!(count = supplied_records.len(), "processing pending supply");
            self.supplied_pass(token, &supplied_records).await?;
        }

        let calls_before_provided = self.game.call_count();
        self.provided_pass(token).await;
        let total_calls = self.game.call_count();

        tracing::debug!(
            api_calls_supply = calls_after_supply,
            api_calls_provided = total_calls - calls_before_provided,
            total_api_calls = total_calls,
            "api call summary for cycle"
        );
        Ok(())
    }

    async fn supplied_pass(
        &self,
        token: &CancellationToken,
        supplied_records: &[crate::game::SuppliedItem],
    ) -> Result<(), CycleError> {
        let read_range = self.read_range();
        let rows = retry::execute(token, &self.profiles.sheet_read, || {
            self.sheet.read_range(&self.spreadsheet_id, &read_range)
        })
        .await
        .map_err(CycleError::SheetRead)?;
        tracing::debug!(rows = rows.len(), "retrieved existing sheet data");

        let existing = existing_keys(&rows);
        let new_items = supplied::collect_new_items(
            token,
            self.game.as_ref(),
            &self.profiles.api_request,
            supplied_records,
            &existing,
        )
        .await;

        if new_items.is_empty() {
            tracing::debug!("no new items to add to sheet");
            return Ok(());
        }

        let new_rows: Vec<Vec<Value>> = new_items
            .iter()
            .map(|item| supply_row(&item.crime_url, &item.item_name, &item.user_name))
            .collect();
        retry::execute(token, &self.profiles.sheet_read, || {
            self.sheet.append_rows(&self.spreadsheet_id, &self.sheet_range, &new_rows)
        })
        .await
        .map_err(CycleError::SheetAppend)?;

        tracing::info!(
            added = new_items.len(),
            skipped = supplied_records.len() - new_items.len(),
            "sheet update complete"
        );

        Arc::clone(&self.notify).notify_new_items(token, &new_items);
        Ok(())
    }

    /// The provided pass is best-effort: a failed read skips it for this
    /// cycle instead of failing the whole cycle.
    async fn provided_pass(&self, token: &CancellationToken) {
        tracing::debug!("starting provided items processing");

        let read_range = self.read_range();
        let rows = match retry::execute(token, &self.profiles.sheet_read, || {
            self.sheet.read_range(&self.spreadsheet_id, &read_range)
        })
        .await
        {
            Ok(rows) => rows,
            Err(err) => {
                tracing::error!(
                    error = %err,
                    "failed to read sheet data, skipping provided items pass"
                );
                return;
            }
        };

        let sheet_items = parse_sheet_items(&rows);
        let logs =
            providers::aggregate_send_logs(token, &self.providers, &self.profiles.api_request)
                .await;

        let updates = provided::find_provider_updates(
            token,
            self.game.as_ref(),
            &self.profiles.api_request,
            &sheet_items,
            &logs,
        )
        .await;

        if updates.is_empty() {
            tracing::debug!("no provided items to update");
            return;
        }

        let sheet_name = sheet_name_of_range(&self.sheet_range);
        sheet::apply_provided_updates(
            token,
            self.sheet.as_ref(),
            &self.profiles.sheet_read,
            &self.spreadsheet_id,
            sheet_name,
            &updates,
        )
        .await;
    }

    /// The full read window; the configured range only anchors the sheet name.
    fn read_range(&self) -> String {
        format!("{}!A1:Z1000", sheet_name_of_range(&self.sheet_range))
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
