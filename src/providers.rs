//! Provider roster: the accounts whose item sends settle the work queue.
//!
//! Populated once at startup from the configured key list and owned by the
//! orchestration loop; nothing mutates it afterwards.

use crate::game::{GameApi, LogEntry, TornClient};
use crate::retry::{self, RetryPolicy};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One provider account, named by whoever owns its API key.
#[derive(Clone)]
pub struct Provider {
    pub name: String,
    pub api: Arc<dyn GameApi>,
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider").field("name", &self.name).finish()
    }
}

/// Resolve each configured key to its player name. Keys that fail to resolve
/// are skipped with a warning rather than failing startup.
pub async fn load_providers(
    token: &CancellationToken,
    keys: &[String],
    policy: &RetryPolicy,
) -> Vec<Provider> {
    load_providers_with(token, keys, policy, |key| -> Arc<dyn GameApi> {
        Arc::new(TornClient::new(key, ""))
    })
    .await
}

pub async fn load_providers_with<F>(
    token: &CancellationToken,
    keys: &[String],
    policy: &RetryPolicy,
    make_api: F,
) -> Vec<Provider>
where
    F: Fn(&str) -> Arc<dyn GameApi>,
{
    let mut providers = Vec::new();
    for raw in keys {
        let key = raw.trim();
        if key.is_empty() {
            continue;
        }

        let api = make_api(key);
        match retry::execute(token, policy, || api.who_am_i()).await {
            Ok(name) => {
                tracing::info!(provider = %name, "loaded provider API key");
                providers.push(Provider { name, api });
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to resolve provider key, skipping");
            }
        }
    }
    providers
}

/// Fetch each provider's send logs (each fetch retry-wrapped; a failing
/// provider is skipped for this cycle) and merge them into one map keyed
/// `provider_name|log_id`.
pub async fn aggregate_send_logs(
    token: &CancellationToken,
    providers: &[Provider],
    policy: &RetryPolicy,
) -> HashMap<String, LogEntry> {
    let mut combined = HashMap::new();
    for provider in providers {
        match retry::execute(token, policy, || provider.api.send_logs()).await {
            Ok(logs) => {
                for (id, entry) in logs {
                    combined.insert(format!("{}|{}", provider.name, id), entry);
                }
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    provider = %provider.name,
                    "failed to fetch send logs for provider"
                );
            }
        }
    }
    tracing::debug!(combined_log_entries = combined.len(), "aggregated provider send logs");
    combined
}
