/// Quake feed clients
use crate::config::FeedConfig;
use crate::domain::RawQuakeEvent;
use crate::errors::FetchError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Source of raw event updates consumed by the tracker
#[async_trait]
pub trait QuakeFeed: Send + Sync {
    /// Most recent events, newest first as the feed orders them
    async fn fetch_list(&self) -> Result<Vec<RawQuakeEvent>, FetchError>;

    /// Latest update for one event
    async fn fetch_latest(&self, event_id: &str) -> Result<RawQuakeEvent, FetchError>;

    /// Every update recorded for one event, oldest first
    async fn fetch_history(&self, event_id: &str) -> Result<Vec<RawQuakeEvent>, FetchError>;
}

/// HTTP client wrapper with common configuration
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("quake-tracker/0.1")
            .build()?;
        Ok(Self { client })
    }

    pub fn get_client(&self) -> &Client {
        &self.client
    }
}

/// Client for the early-warning JSON feed
pub struct EarlyWarningClient {
    http_client: HttpClient,
    config: FeedConfig,
}

impl EarlyWarningClient {
    pub fn new(config: FeedConfig) -> Result<Self, FetchError> {
        Ok(Self {
            http_client: HttpClient::new()?,
            config,
        })
    }

    fn event_url(&self, event_id: &str) -> String {
        self.config.event_url.replace("{event_id}", event_id)
    }

    async fn get_items(&self, url: &str) -> Result<Vec<Value>, FetchError> {
        let resp = self.http_client.get_client().get(url).send().await?;

        if !resp.status().is_success() {
            return Err(FetchError::Status(resp.status().as_u16()));
        }

        let json: Value = resp.json().await?;
        extract_items(json)
    }
}

/// Unwrap the item array from the envelopes the feed has been seen to use
fn extract_items(json: Value) -> Result<Vec<Value>, FetchError> {
    if let Some(code) = json.get("code").and_then(|c| c.as_i64()) {
        if code != 0 {
            let message = json
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("no message");
            return Err(FetchError::Decode(format!(
                "feed returned code {}: {}",
                code, message
            )));
        }
    }

    let items = if let Some(arr) = json.as_array() {
        arr.clone()
    } else if let Some(arr) = json.get("data").and_then(|x| x.as_array()) {
        arr.clone()
    } else if let Some(arr) = json.get("items").and_then(|x| x.as_array()) {
        arr.clone()
    } else if json.get("data").map(|d| d.is_object()).unwrap_or(false) {
        vec![json["data"].clone()]
    } else {
        return Err(FetchError::Decode("no item array in payload".to_string()));
    };

    Ok(items)
}

/// Parse items, dropping those without an event id
fn parse_events(items: &[Value]) -> Vec<RawQuakeEvent> {
    items
        .iter()
        .filter_map(|item| match RawQuakeEvent::from_value(item) {
            Ok(raw) => Some(raw),
            Err(e) => {
                debug!("Dropping feed item: {}", e);
                None
            }
        })
        .collect()
}

/// Order updates oldest first, ties broken by update ordinal; untimed items go last
pub fn order_history(mut events: Vec<RawQuakeEvent>) -> Vec<RawQuakeEvent> {
    events.sort_by_key(|e| {
        let at = e.effective_update_at();
        (at.is_none(), at, e.updates)
    });
    events
}

#[async_trait]
impl QuakeFeed for EarlyWarningClient {
    async fn fetch_list(&self) -> Result<Vec<RawQuakeEvent>, FetchError> {
        let items = self.get_items(&self.config.list_url).await?;
        Ok(parse_events(&items))
    }

    async fn fetch_latest(&self, event_id: &str) -> Result<RawQuakeEvent, FetchError> {
        self.fetch_history(event_id)
            .await?
            .pop()
            .ok_or_else(|| FetchError::NotFound(event_id.to_string()))
    }

    async fn fetch_history(&self, event_id: &str) -> Result<Vec<RawQuakeEvent>, FetchError> {
        let items = self.get_items(&self.event_url(event_id)).await?;
        let events: Vec<RawQuakeEvent> = parse_events(&items)
            .into_iter()
            .filter(|e| e.event_id == event_id)
            .collect();
        Ok(order_history(events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_items_envelope() {
        let json = serde_json::json!({"code": 0, "data": [{"eventId": 1}, {"eventId": 2}]});
        assert_eq!(extract_items(json).unwrap().len(), 2);
    }

    #[test]
    fn test_extract_items_bare_array() {
        let json = serde_json::json!([{"eventId": 1}]);
        assert_eq!(extract_items(json).unwrap().len(), 1);
    }

    #[test]
    fn test_extract_items_error_code() {
        let json = serde_json::json!({"code": 500, "message": "busy"});
        assert!(matches!(extract_items(json), Err(FetchError::Decode(_))));
    }

    #[test]
    fn test_parse_events_drops_items_without_id() {
        let items = vec![
            serde_json::json!({"eventId": "a", "magnitude": 3.2}),
            serde_json::json!({"magnitude": 4.0}),
        ];
        let events = parse_events(&items);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id, "a");
    }

    #[test]
    fn test_order_history_sorts_by_update_time() {
        let items = vec![
            serde_json::json!({"eventId": "a", "updateAt": 1700000020, "updates": 3}),
            serde_json::json!({"eventId": "a", "updates": 9}),
            serde_json::json!({"eventId": "a", "updateAt": 1700000000, "updates": 1}),
            serde_json::json!({"eventId": "a", "updateAt": 1700000010, "updates": 2}),
        ];
        let ordered = order_history(parse_events(&items));
        let ordinals: Vec<_> = ordered.iter().map(|e| e.updates).collect();
        assert_eq!(ordinals, vec![Some(1), Some(2), Some(3), Some(9)]);
    }

    #[test]
    fn test_event_url_substitution() {
        let client = EarlyWarningClient::new(FeedConfig {
            list_url: "http://feed/list".to_string(),
            event_url: "http://feed/events/{event_id}/updates".to_string(),
        })
        .unwrap();
        assert_eq!(client.event_url("77"), "http://feed/events/77/updates");
    }
}
