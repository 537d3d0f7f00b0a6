//! Provided-items pass: match provider send logs against unprovisioned rows.

use crate::game::{GameApi, LogEntry};
use crate::resolution;
use crate::retry::RetryPolicy;
use crate::sheet::{SheetItem, SheetRowUpdate};
use chrono::TimeZone;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Render a log timestamp the way the sheet's timestamp column expects it.
pub fn format_log_timestamp(timestamp: i64) -> String {
    match chrono::Local.timestamp_opt(timestamp, 0).single() {
        Some(datetime) => datetime.format("%H:%M:%S - %d/%m/%y").to_string(),
        None => String::new(),
    }
}

/// Provider name from an aggregated log key (`provider_name|log_id`).
pub fn provider_of_log_key(combined_id: &str) -> &str {
    match combined_id.split_once('|') {
        Some((provider, _)) => provider,
        None => "Unknown",
    }
}

/// Walk every aggregated log entry and compute the cell updates for rows it
/// settles. A log item is assigned to at most one row: the first
/// unprovisioned row whose recipient and item both match.
pub async fn find_provider_updates(
    token: &CancellationToken,
    api: &dyn GameApi,
    policy: &RetryPolicy,
    sheet_items: &[SheetItem],
    logs: &HashMap<String, LogEntry>,
) -> Vec<SheetRowUpdate> {
    tracing::debug!(
        sheet_items = sheet_items.len(),
        log_entries = logs.len(),
        "starting provider update matching"
    );

    let mut updates = Vec::new();
    for (combined_id, entry) in logs {
        let provider_name = provider_of_log_key(combined_id);
        let receiver_id = entry.data.receiver;
        let Some(receiver_name) =
            resolution::user_name_by_id(token, api, policy, receiver_id).await
        else {
            continue;
        };

        for log_item in &entry.data.items {
            let Some(item_name) =
                resolution::item_name_by_id(token, api, policy, log_item.id).await
            else {
                continue;
            };

            for sheet_item in sheet_items {
                if sheet_item.has_provider
                    || !resolution::matches_user(&sheet_item.user_name, &receiver_name, receiver_id)
                    || !resolution::matches_item(&sheet_item.item_name, &item_name, log_item.id)
                {
                    continue;
                }

                let market_value =
                    resolution::item_market_value(token, api, policy, log_item.id).await;
                let update = SheetRowUpdate {
                    row_index: sheet_item.row_index,
                    provider: provider_name.to_string(),
                    date_time: format_log_timestamp(entry.timestamp),
                    market_value,
                };

                tracing::info!(
                    row = sheet_item.row_index,
                    item = %sheet_item.item_name,
                    user = %sheet_item.user_name,
                    provider = %provider_name,
                    market_value,
                    "found provided item match"
                );

                updates.push(update);
                break;
            }
        }
    }

    tracing::debug!(updates_found = updates.len(), "completed provider update matching");
    updates
}
