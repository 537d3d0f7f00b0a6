//! Identity resolution: ids to names, with placeholder fallbacks.
//!
//! Two flavors per lookup. The matching path (`*_name_by_id`) returns `None`
//! on failure so the caller skips that log entry. The enrichment path
//! (`*_label`) falls back to an `"Item ID: <n>"` / `"User ID: <n>"`
//! placeholder so one unresolved identity never blocks a cycle; the matcher
//! recognizes those placeholders on later cycles.

use crate::error::{ApiError, RetryError};
use crate::game::GameApi;
use crate::retry::{self, RetryPolicy};
use tokio_util::sync::CancellationToken;

pub async fn user_name_by_id(
    token: &CancellationToken,
    api: &dyn GameApi,
    policy: &RetryPolicy,
    user_id: u64,
) -> Option<String> {
    match retry::execute(token, policy, || api.user_by_id(user_id)).await {
        Ok(user) => Some(user.name),
        Err(err) => {
            tracing::debug!(error = %err, user_id, "failed to resolve user for matching");
            None
        }
    }
}

pub async fn user_label(
    token: &CancellationToken,
    api: &dyn GameApi,
    policy: &RetryPolicy,
    user_id: u64,
) -> String {
    match retry::execute(token, policy, || api.user_by_id(user_id)).await {
        Ok(user) => user.name,
        Err(err) => {
            tracing::warn!(error = %err, user_id, "failed to resolve user, using placeholder");
            format!("User ID: {}", user_id)
        }
    }
}

pub async fn item_name_by_id(
    token: &CancellationToken,
    api: &dyn GameApi,
    policy: &RetryPolicy,
    item_id: u64,
) -> Option<String> {
    match retry::execute(token, policy, || api.item_by_id(item_id)).await {
        Ok(item) => Some(item.name),
        Err(err) => {
            tracing::debug!(error = %err, item_id, "failed to resolve item for matching");
            None
        }
    }
}

pub async fn item_label(
    token: &CancellationToken,
    api: &dyn GameApi,
    policy: &RetryPolicy,
    item_id: u64,
) -> String {
    match retry::execute(token, policy, || api.item_by_id(item_id)).await {
        Ok(item) => item.name,
        Err(err) => {
            tracing::warn!(error = %err, item_id, "failed to resolve item, using placeholder");
            format!("Item ID: {}", item_id)
        }
    }
}

/// Market value lookup; unresolvable items price at zero rather than blocking
/// the update.
pub async fn item_market_value(
    token: &CancellationToken,
    api: &dyn GameApi,
    policy: &RetryPolicy,
    item_id: u64,
) -> f64 {
    let result: Result<_, RetryError<ApiError>> =
        retry::execute(token, policy, || api.item_by_id(item_id)).await;
    match result {
        Ok(item) => item.market_value,
        Err(err) => {
            tracing::warn!(error = %err, item_id, "failed to get item market value");
            0.0
        }
    }
}

/// A sheet recipient matches a log receiver on exact name or on the persisted
/// placeholder format.
pub fn matches_user(sheet_user: &str, log_user: &str, log_user_id: u64) -> bool {
    sheet_user == log_user || sheet_user == format!("User ID: {}", log_user_id)
}

/// A sheet item matches a log item on exact name or on the persisted
/// placeholder format.
pub fn matches_item(sheet_item: &str, log_item: &str, log_item_id: u64) -> bool {
    sheet_item == log_item || sheet_item == format!("Item ID: {}", log_item_id)
}
