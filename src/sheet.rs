//! Spreadsheet collaborator: the values REST surface plus the row mapping the
//! bot reads and writes.
//!
//! Columns are positional: A=status, B=provider, C=crime URL, D=timestamp,
//! E=item name, F=recipient name, G=market value, H=market-value formula.

use crate::error::{ApiError, RetryError};
use crate::retry::{self, RetryPolicy};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const STATUS_NEEDED: &str = "Needed";
pub const STATUS_PROVIDED: &str = "Provided";

/// Column H formula: mirror column G into the totals once the row is settled.
pub const MARKET_VALUE_FORMULA: &str = "=IF(OR(INDIRECT(\"A\"&ROW())=\"Provided\",INDIRECT(\"A\"&ROW())=\"Cash Sent\"), INDIRECT(\"G\"&ROW()), 0)";

/// Seam over the spreadsheet so the passes are testable with an in-memory
/// store. Rows are sparse sequences of heterogeneous cells.
#[async_trait]
pub trait SheetStore: Send + Sync {
    async fn read_range(
        &self,
        spreadsheet_id: &str,
        range: &str,
    ) -> Result<Vec<Vec<Value>>, ApiError>;

    async fn append_rows(
        &self,
        spreadsheet_id: &str,
        range: &str,
        rows: &[Vec<Value>],
    ) -> Result<(), ApiError>;

    async fn update_cell(
        &self,
        spreadsheet_id: &str,
        cell_ref: &str,
        value: Value,
    ) -> Result<(), ApiError>;
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

/// Concrete client over the Sheets v4 values endpoints with bearer auth.
#[derive(Debug)]
pub struct SheetsClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl SheetsClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base_url("https://sheets.googleapis.com", token)
    }

    /// Point the client at a different host (used by tests).
    pub fn with_base_url(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("default http client");
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn values_url(&self, spreadsheet_id: &str, range: &str, suffix: &str) -> String {
        // Ranges carry sheet names with spaces; encode just enough for a path.
        let encoded = range.replace(' ', "%20");
        format!(
            "{}/v4/spreadsheets/{}/values/{}{}",
            self.base_url, spreadsheet_id, encoded, suffix
        )
    }

    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status { status: status.as_u16(), body });
        }
        Ok(response)
    }
}

#[async_trait]
impl SheetStore for SheetsClient {
    async fn read_range(
        &self,
        spreadsheet_id: &str,
        range: &str,
    ) -> Result<Vec<Vec<Value>>, ApiError> {
        let url = self.values_url(spreadsheet_id, range, "");
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;
        let response = self.check(response).await?;
        let range: ValueRange =
            response.json().await.map_err(|e| ApiError::Decode(e.to_string()))?;
        Ok(range.values)
    }

    async fn append_rows(
        &self,
        spreadsheet_id: &str,
        range: &str,
        rows: &[Vec<Value>],
    ) -> Result<(), ApiError> {
        let url = self.values_url(
            spreadsheet_id,
            range,
            ":append?valueInputOption=USER_ENTERED&insertDataOption=INSERT_ROWS",
        );
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&json!({ "values": rows }))
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;
        self.check(response).await?;
        Ok(())
    }

    async fn update_cell(
        &self,
        spreadsheet_id: &str,
        cell_ref: &str,
        value: Value,
    ) -> Result<(), ApiError> {
        let url = self.values_url(spreadsheet_id, cell_ref, "?valueInputOption=USER_ENTERED");
        let response = self
            .http
            .put(&url)
            .bearer_auth(&self.token)
            .json(&json!({ "values": [[value]] }))
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;
        self.check(response).await?;
        Ok(())
    }
}

/// One parsed work-queue row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetItem {
    /// 1-based sheet row number.
    pub row_index: usize,
    pub crime_url: String,
    pub item_name: String,
    pub user_name: String,
    pub provider: String,
    pub has_provider: bool,
}

/// A pending set of cell writes for one provided row.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetRowUpdate {
    pub row_index: usize,
    pub provider: String,
    pub date_time: String,
    pub market_value: f64,
}

/// Render a cell as text; absent and null cells read as empty.
pub fn cell_text(row: &[Value], index: usize) -> String {
    match row.get(index) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Sheet name portion of an A1 range like `"Test Sheet!A1"`.
pub fn sheet_name_of_range(range: &str) -> &str {
    range.split('!').next().unwrap_or(range)
}

/// A1 reference for a single cell.
pub fn cell_ref(sheet_name: &str, column: &str, row_index: usize) -> String {
    format!("{}!{}{}", sheet_name, column, row_index)
}

/// Composite dedup key for one unit of work.
pub fn composite_key(crime_url: &str, user_name: &str, item_name: &str) -> String {
    format!("{}|{}|{}", crime_url, user_name, item_name)
}

/// Dedup set over rows that already carry all three key fields.
pub fn existing_keys(rows: &[Vec<Value>]) -> HashSet<String> {
    let mut existing = HashSet::new();
    for row in rows {
        if row.len() < 6 {
            continue;
        }
        let crime_url = cell_text(row, 2);
        let item_name = cell_text(row, 4);
        let user_name = cell_text(row, 5);
        if !crime_url.is_empty() && !item_name.is_empty() && !user_name.is_empty() {
            existing.insert(composite_key(&crime_url, &user_name, &item_name));
        }
    }
    tracing::debug!(entries = existing.len(), "built existing items set");
    existing
}

/// Parse raw rows into structured items, skipping rows that are too short or
/// missing a key field.
pub fn parse_sheet_items(rows: &[Vec<Value>]) -> Vec<SheetItem> {
    let mut items = Vec::new();

    for (i, row) in rows.iter().enumerate() {
        let row_number = i + 1;
        if row.len() < 6 {
            tracing::debug!(row = row_number, columns = row.len(), "skipping short row");
            continue;
        }

        let provider = cell_text(row, 1).trim().to_string();
        let item = SheetItem {
            row_index: row_number,
            crime_url: cell_text(row, 2),
            item_name: cell_text(row, 4),
            user_name: cell_text(row, 5),
            has_provider: !provider.is_empty(),
            provider,
        };

        if item.crime_url.is_empty() || item.item_name.is_empty() || item.user_name.is_empty() {
            tracing::debug!(row = row_number, "skipping row with missing required fields");
            continue;
        }
        items.push(item);
    }

    tracing::debug!(total_rows = rows.len(), parsed = items.len(), "parsed sheet items");
    items
}

/// The freshly appended row for one new supply request.
pub fn supply_row(crime_url: &str, item_name: &str, user_name: &str) -> Vec<Value> {
    vec![
        json!(STATUS_NEEDED),
        json!(""),
        json!(crime_url),
        json!(""),
        json!(item_name),
        json!(user_name),
        json!(""),
        json!(MARKET_VALUE_FORMULA),
    ]
}

/// Write the four cells of each provided-row update, each write going through
/// the retry executor. A failed cell abandons the rest of that row; remaining
/// updates still run.
pub async fn apply_provided_updates(
    token: &CancellationToken,
    store: &dyn SheetStore,
    policy: &RetryPolicy,
    spreadsheet_id: &str,
    sheet_name: &str,
    updates: &[SheetRowUpdate],
) {
    tracing::debug!(updates = updates.len(), "updating provided item rows");

    for update in updates {
        if apply_single_update(token, store, policy, spreadsheet_id, sheet_name, update).await {
            tracing::info!(
                row = update.row_index,
                provider = %update.provider,
                datetime = %update.date_time,
                market_value = update.market_value,
                "updated provided item row"
            );
        }
    }
}

async fn apply_single_update(
    token: &CancellationToken,
    store: &dyn SheetStore,
    policy: &RetryPolicy,
    spreadsheet_id: &str,
    sheet_name: &str,
    update: &SheetRowUpdate,
) -> bool {
    let cells: [(&str, Value, &str); 4] = [
        ("A", json!(STATUS_PROVIDED), "status"),
        ("B", json!(update.provider), "provider"),
        ("D", json!(update.date_time), "datetime"),
        ("G", json!(update.market_value), "market value"),
    ];

    for (column, value, label) in cells {
        let cell = cell_ref(sheet_name, column, update.row_index);
        let result: Result<(), RetryError<ApiError>> = retry::execute(token, policy, || {
            store.update_cell(spreadsheet_id, &cell, value.clone())
        })
        .await;

        if let Err(err) = result {
            tracing::error!(
                error = %err,
                row = update.row_index,
                column,
                "failed to update {} column",
                label
            );
            return false;
        }
    }
    true
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Retryable;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn row(cells: &[&str]) -> Vec<Value> {
        cells.iter().map(|c| json!(c)).collect()
    }

    #[test]
    fn parse_skips_short_and_incomplete_rows() {
        let rows = vec![
            row(&["Needed", ""]),
            row(&["Needed", "", "http://crime/1", "", "", "Alice"]),
            row(&["Needed", " Bob ", "http://crime/2", "", "Lockpick", "Alice"]),
        ];

        let items = parse_sheet_items(&rows);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].row_index, 3);
        assert_eq!(items[0].provider, "Bob");
        assert!(items[0].has_provider);
    }

    #[test]
    fn rows_without_provider_are_flagged() {
        let rows = vec![row(&["Needed", "  ", "http://crime/1", "", "Lockpick", "Alice"])];
        let items = parse_sheet_items(&rows);
        assert_eq!(items.len(), 1);
        assert!(!items[0].has_provider);
        assert_eq!(items[0].provider, "");
    }

    #[test]
    fn existing_keys_require_all_three_fields() {
        let rows = vec![
            row(&["Needed", "", "http://crime/1", "", "Lockpick", "Alice"]),
            row(&["Needed", "", "", "", "Lockpick", "Bob"]),
            row(&["short"]),
        ];

        let keys = existing_keys(&rows);
        assert_eq!(keys.len(), 1);
        assert!(keys.contains("http://crime/1|Alice|Lockpick"));
    }

    #[test]
    fn cell_text_renders_numbers_without_quotes() {
        let row = vec![json!("Needed"), json!(42), Value::Null];
        assert_eq!(cell_text(&row, 0), "Needed");
        assert_eq!(cell_text(&row, 1), "42");
        assert_eq!(cell_text(&row, 2), "");
        assert_eq!(cell_text(&row, 9), "");
    }

    #[test]
    fn supply_row_has_the_expected_shape() {
        let row = supply_row("http://crime/5", "Lockpick", "Alice");
        assert_eq!(row.len(), 8);
        assert_eq!(row[0], json!(STATUS_NEEDED));
        assert_eq!(row[2], json!("http://crime/5"));
        assert_eq!(row[4], json!("Lockpick"));
        assert_eq!(row[5], json!("Alice"));
        assert_eq!(row[7], json!(MARKET_VALUE_FORMULA));
    }

    #[test]
    fn range_helpers_split_and_join() {
        assert_eq!(sheet_name_of_range("Test Sheet!A1"), "Test Sheet");
        assert_eq!(sheet_name_of_range("Queue"), "Queue");
        assert_eq!(cell_ref("Test Sheet", "D", 7), "Test Sheet!D7");
    }

    #[tokio::test]
    async fn read_range_parses_values_and_tolerates_empty_sheets() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "range": "Test Sheet!A1:Z1000",
                "values": [["Needed", "", "http://crime/1"]]
            })))
            .mount(&server)
            .await;

        let client = SheetsClient::with_base_url(server.uri(), "token");
        let rows = client.read_range("sheet1", "Test Sheet!A1:Z1000").await.expect("read");
        assert_eq!(rows.len(), 1);
        assert_eq!(cell_text(&rows[0], 2), "http://crime/1");

        let empty = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "range": "A1" })))
            .mount(&empty)
            .await;
        let client = SheetsClient::with_base_url(empty.uri(), "token");
        assert!(client.read_range("sheet1", "A1").await.expect("read").is_empty());
    }

    #[tokio::test]
    async fn append_posts_user_entered_rows() {
        let server = MockServer::start().await;
        let rows = vec![supply_row("http://crime/5", "Lockpick", "Alice")];
        Mock::given(method("POST"))
            .and(query_param("valueInputOption", "USER_ENTERED"))
            .and(query_param("insertDataOption", "INSERT_ROWS"))
            .and(body_json(json!({ "values": rows })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let client = SheetsClient::with_base_url(server.uri(), "token");
        client
            .append_rows("sheet1", "Test Sheet!A1", &rows)
            .await
            .expect("append");
    }

    #[tokio::test]
    async fn update_cell_puts_a_single_value() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(query_param("valueInputOption", "USER_ENTERED"))
            .and(body_json(json!({ "values": [["Provided"]] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let client = SheetsClient::with_base_url(server.uri(), "token");
        client
            .update_cell("sheet1", "Test Sheet!A5", json!("Provided"))
            .await
            .expect("update");
    }

    #[tokio::test]
    async fn failed_writes_surface_status_errors() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(429).set_body_string("quota"))
            .mount(&server)
            .await;

        let client = SheetsClient::with_base_url(server.uri(), "token");
        let err = client
            .update_cell("sheet1", "Test Sheet!A5", json!("Provided"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Status { status: 429, .. }));
        assert!(err.retryable());
    }
}
