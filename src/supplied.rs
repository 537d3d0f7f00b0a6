//! Supplied-items pass: turn pending supply into new work-queue rows.

use crate::game::{GameApi, SuppliedItem};
use crate::notify::ItemInfo;
use crate::resolution;
use crate::retry::RetryPolicy;
use crate::sheet::composite_key;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;

/// Crime report link persisted in the sheet and used as the dedup anchor.
pub fn crime_report_url(crime_id: u64) -> String {
    format!("http://www.torn.com/factions.php?step=your#/tab=crimes&crimeId={}", crime_id)
}

/// Resolve labels for each pending-supply record and keep the ones whose
/// composite key is not already present. Two records normalizing to the same
/// key within one batch also collapse to one row.
pub async fn collect_new_items(
    token: &CancellationToken,
    api: &dyn GameApi,
    policy: &RetryPolicy,
    supplied: &[SuppliedItem],
    existing: &HashSet<String>,
) -> Vec<ItemInfo> {
    let mut added: HashSet<String> = HashSet::new();
    let mut new_items = Vec::new();

    for record in supplied {
        let crime_url = crime_report_url(record.crime_id);
        let item_name = resolution::item_label(token, api, policy, record.item_id).await;
        let user_name = resolution::user_label(token, api, policy, record.user_id).await;

        tracing::info!(
            crime_id = record.crime_id,
            item = %item_name,
            user = %user_name,
            crime_url = %crime_url,
            "pending supply item"
        );

        let key = composite_key(&crime_url, &user_name, &item_name);
        if existing.contains(&key) || added.contains(&key) {
            tracing::debug!(key = %key, "skipping duplicate entry");
            continue;
        }

        tracing::debug!(key = %key, "adding new item to sheet");
        added.insert(key);
        new_items.push(ItemInfo { item_name, user_name, crime_url });
    }

    tracing::debug!(
        total_items = supplied.len(),
        new_rows = new_items.len(),
        "finished processing supplied items"
    );
    new_items
}
