//! Game-API collaborator: pending-supply extraction, identity lookups, and
//! provider send-logs.
//!
//! All calls are idempotent GETs. Item and user lookups go through a one-hour
//! TTL cache so repeated cycles stay cheap; the call counter is purely
//! diagnostic and reported in the per-cycle summary.

use crate::cache::TtlCache;
use crate::error::ApiError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Freshness window for item/user lookups.
const LOOKUP_CACHE_TTL: Duration = Duration::from_secs(60 * 60);
/// Send logs cover this trailing window, in seconds.
const SEND_LOG_WINDOW_SECS: i64 = 48 * 60 * 60;
/// Log category for item sends.
const ITEM_SEND_LOG_TYPE: u32 = 4102;

/// One item owed to a member for a crime slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuppliedItem {
    pub item_id: u64,
    pub user_id: u64,
    pub crime_id: u64,
}

/// Subset of the item record this bot consumes.
#[derive(Debug, Clone, Deserialize)]
pub struct Item {
    pub name: String,
    #[serde(default)]
    pub market_value: f64,
}

/// Subset of the user record this bot consumes.
#[derive(Debug, Clone, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub player_id: u64,
    pub name: String,
}

/// One item within a send-log entry.
#[derive(Debug, Clone, Deserialize)]
pub struct LogItem {
    pub id: u64,
    #[serde(default)]
    pub uid: u64,
    #[serde(default)]
    pub qty: u32,
}

/// Payload of an item-send log entry.
#[derive(Debug, Clone, Deserialize)]
pub struct SendData {
    pub receiver: u64,
    #[serde(default)]
    pub items: Vec<LogItem>,
    #[serde(default)]
    pub message: String,
}

/// One entry from the item-send log.
#[derive(Debug, Clone, Deserialize)]
pub struct LogEntry {
    #[serde(default)]
    pub title: String,
    pub timestamp: i64,
    #[serde(default)]
    pub category: String,
    pub data: SendData,
}

#[derive(Debug, Deserialize)]
struct ItemsResponse {
    #[serde(default)]
    items: HashMap<String, Item>,
}

#[derive(Debug, Deserialize)]
struct LogsResponse {
    log: Option<HashMap<String, LogEntry>>,
}

#[derive(Debug, Deserialize)]
struct CrimesResponse {
    #[serde(default)]
    crimes: Vec<Crime>,
}

#[derive(Debug, Deserialize)]
struct Crime {
    id: u64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    slots: Vec<Slot>,
}

#[derive(Debug, Deserialize)]
struct Slot {
    #[serde(default)]
    position: String,
    item_requirement: Option<ItemRequirement>,
    user: Option<SlotUser>,
}

#[derive(Debug, Deserialize)]
struct ItemRequirement {
    id: u64,
    #[serde(default)]
    is_reusable: bool,
    #[serde(default)]
    is_available: bool,
}

#[derive(Debug, Deserialize)]
struct SlotUser {
    id: u64,
}

/// Seam over the game API so the processing passes are testable with fakes.
#[async_trait]
pub trait GameApi: Send + Sync {
    /// Items owed for crimes currently in planning.
    async fn pending_supply(&self) -> Result<Vec<SuppliedItem>, ApiError>;
    async fn item_by_id(&self, id: u64) -> Result<Item, ApiError>;
    async fn user_by_id(&self, id: u64) -> Result<UserProfile, ApiError>;
    /// Item-send log entries over the trailing 48-hour window, keyed by log id.
    async fn send_logs(&self) -> Result<HashMap<String, LogEntry>, ApiError>;
    /// Resolve the key this client was built with to its player name.
    async fn who_am_i(&self) -> Result<String, ApiError>;

    /// Diagnostic request count since the last reset.
    fn call_count(&self) -> u64;
    fn reset_call_count(&self);
}

/// Concrete client for the Torn API.
#[derive(Debug)]
pub struct TornClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    faction_api_key: String,
    items: TtlCache<u64, Item>,
    users: TtlCache<u64, UserProfile>,
    calls: AtomicU64,
}

impl TornClient {
    pub fn new(api_key: impl Into<String>, faction_api_key: impl Into<String>) -> Self {
        Self::with_base_url("https://api.torn.com", api_key, faction_api_key)
    }

    /// Point the client at a different host (used by tests).
    pub fn with_base_url(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        faction_api_key: impl Into<String>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("default http client");
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            faction_api_key: faction_api_key.into(),
            items: TtlCache::new(LOOKUP_CACHE_TTL),
            users: TtlCache::new(LOOKUP_CACHE_TTL),
            calls: AtomicU64::new(0),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T, ApiError> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        let response = self.http.get(&url).send().await.map_err(ApiError::from_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status { status: status.as_u16(), body });
        }

        response.json::<T>().await.map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl GameApi for TornClient {
    async fn pending_supply(&self) -> Result<Vec<SuppliedItem>, ApiError> {
        tracing::debug!("fetching planning crimes for pending supply");
        let url = format!(
            "{}/v2/faction/crimes?key={}&cat=planning&offset=0",
            self.base_url, self.faction_api_key
        );
        let response: CrimesResponse = self.get_json(url).await?;
        tracing::debug!(total_crimes = response.crimes.len(), "retrieved faction crimes");

        let mut supplied = Vec::new();
        for crime in &response.crimes {
            tracing::debug!(
                crime_id = crime.id,
                crime_name = %crime.name,
                crime_status = %crime.status,
                slots = crime.slots.len(),
                "walking crime slots"
            );
            for slot in &crime.slots {
                let (Some(requirement), Some(user)) = (&slot.item_requirement, &slot.user) else {
                    continue;
                };
                if requirement.is_available {
                    continue;
                }
                tracing::info!(
                    crime_id = crime.id,
                    position = %slot.position,
                    item_id = requirement.id,
                    user_id = user.id,
                    reusable = requirement.is_reusable,
                    "found pending supply"
                );
                supplied.push(SuppliedItem {
                    item_id: requirement.id,
                    user_id: user.id,
                    crime_id: crime.id,
                });
            }
        }

        tracing::debug!(total = supplied.len(), "finished extracting pending supply");
        Ok(supplied)
    }

    async fn item_by_id(&self, id: u64) -> Result<Item, ApiError> {
        if let Some(item) = self.items.get(&id) {
            return Ok(item);
        }

        let url =
            format!("{}/torn/{}?selections=items&key={}", self.base_url, id, self.api_key);
        let response: ItemsResponse = self.get_json(url).await?;
        let item = response
            .items
            .get(&id.to_string())
            .cloned()
            .ok_or(ApiError::NotFound { kind: "item", id })?;

        self.items.insert(id, item.clone());
        Ok(item)
    }

    async fn user_by_id(&self, id: u64) -> Result<UserProfile, ApiError> {
        if let Some(user) = self.users.get(&id) {
            return Ok(user);
        }

        let url = format!("{}/user/{}?selections=basic&key={}", self.base_url, id, self.api_key);
        let user: UserProfile = self.get_json(url).await?;

        self.users.insert(id, user.clone());
        Ok(user)
    }

    async fn send_logs(&self) -> Result<HashMap<String, LogEntry>, ApiError> {
        let to = chrono::Utc::now().timestamp();
        let from = to - SEND_LOG_WINDOW_SECS;
        tracing::debug!(from, to, "querying item-send logs");

        let url = format!(
            "{}/user?selections=log&log={}&from={}&to={}&key={}",
            self.base_url, ITEM_SEND_LOG_TYPE, from, to, self.api_key
        );
        let response: LogsResponse = self.get_json(url).await?;
        let log = response.log.unwrap_or_default();

        tracing::debug!(entries = log.len(), "parsed item-send logs");
        Ok(log)
    }

    async fn who_am_i(&self) -> Result<String, ApiError> {
        let url = format!("{}/user/?selections=basic&key={}", self.base_url, self.api_key);
        let user: UserProfile = self.get_json(url).await?;
        Ok(user.name)
    }

    fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn reset_call_count(&self) {
        self.calls.store(0, Ordering::Relaxed);
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Retryable;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client(server: &MockServer) -> TornClient {
        TornClient::with_base_url(server.uri(), "test-key", "faction-key")
    }

    #[tokio::test]
    async fn item_lookup_hits_upstream_once_then_caches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/torn/1258"))
            .and(query_param("selections", "items"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": { "1258": { "name": "Binoculars", "market_value": 5312.0 } }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server).await;
        let first = client.item_by_id(1258).await.expect("lookup");
        assert_eq!(first.name, "Binoculars");
        assert_eq!(first.market_value, 5312.0);

        let second = client.item_by_id(1258).await.expect("cached lookup");
        assert_eq!(second.name, "Binoculars");
        assert_eq!(client.call_count(), 1, "second lookup served from cache");
    }

    #[tokio::test]
    async fn pending_supply_keeps_only_unavailable_slots_with_users() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/faction/crimes"))
            .and(query_param("cat", "planning"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "crimes": [{
                    "id": 42,
                    "name": "Break the Bank",
                    "status": "planning",
                    "slots": [
                        {
                            "position": "Picklock",
                            "item_requirement": { "id": 27, "is_reusable": false, "is_available": false },
                            "user": { "id": 777, "joined_at": 0, "progress": 1.0 }
                        },
                        {
                            "position": "Muscle",
                            "item_requirement": { "id": 99, "is_reusable": true, "is_available": true },
                            "user": { "id": 888, "joined_at": 0, "progress": 1.0 }
                        },
                        { "position": "Lookout", "item_requirement": null, "user": { "id": 999 } }
                    ]
                }]
            })))
            .mount(&server)
            .await;

        let client = client(&server).await;
        let supplied = client.pending_supply().await.expect("fetch");
        assert_eq!(
            supplied,
            vec![SuppliedItem { item_id: 27, user_id: 777, crime_id: 42 }]
        );
    }

    #[tokio::test]
    async fn non_success_status_is_surfaced_with_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user/777"))
            .respond_with(ResponseTemplate::new(403).set_body_string("key disabled"))
            .mount(&server)
            .await;

        let client = client(&server).await;
        let err = client.user_by_id(777).await.unwrap_err();
        match err {
            ApiError::Status { status, ref body } => {
                assert_eq!(status, 403);
                assert_eq!(body, "key disabled");
            }
            other => panic!("expected status error, got {:?}", other),
        }
        assert!(!err.retryable());
    }

    #[tokio::test]
    async fn send_logs_parse_entries_and_tolerate_null() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .and(query_param("selections", "log"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "log": {
                    "abc123": {
                        "title": "Item send",
                        "timestamp": 1700000000,
                        "category": "Items",
                        "data": {
                            "receiver": 777,
                            "items": [{ "id": 27, "uid": 0, "qty": 1 }],
                            "message": ""
                        }
                    }
                }
            })))
            .mount(&server)
            .await;

        let client = client(&server).await;
        let logs = client.send_logs().await.expect("fetch logs");
        assert_eq!(logs.len(), 1);
        let entry = &logs["abc123"];
        assert_eq!(entry.data.receiver, 777);
        assert_eq!(entry.data.items[0].id, 27);

        // A window with no sends comes back as log: null.
        let empty_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "log": null })))
            .mount(&empty_server)
            .await;
        let empty_client = TornClient::with_base_url(empty_server.uri(), "k", "f");
        assert!(empty_client.send_logs().await.expect("empty logs").is_empty());
    }

    #[tokio::test]
    async fn who_am_i_resolves_the_key_owner() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user/"))
            .and(query_param("selections", "basic"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "player_id": 123, "name": "Quartermaster"
            })))
            .mount(&server)
            .await;

        let client = client(&server).await;
        assert_eq!(client.who_am_i().await.expect("whoami"), "Quartermaster");
    }

    #[tokio::test]
    async fn missing_item_in_payload_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/torn/5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": {} })))
            .mount(&server)
            .await;

        let client = client(&server).await;
        let err = client.item_by_id(5).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound { kind: "item", id: 5 }));
    }
}
