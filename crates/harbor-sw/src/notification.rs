//! Notification rendering and click routing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};
use url::Url;

use crate::clients::{ClientId, Clients, UrlMatch};
use crate::config::NotificationDefaults;
use crate::lifecycle::ServiceWorkerId;
use crate::ServiceWorkerError;

/// Identifier of a displayed notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotificationId(u64);

impl NotificationId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Display options, in the shape pages pass them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NotificationOptions {
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
    /// Notifications sharing a tag replace each other.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub vibrate: Vec<u32>,
    pub data: Map<String, Value>,
    pub require_interaction: bool,
}

impl NotificationOptions {
    /// Routing URL carried in `data.url`.
    pub fn url(&self) -> Option<&str> {
        self.data.get("url").and_then(Value::as_str)
    }
}

/// Raw push payload: `{ notification: { title, body, icon }, data: { tag, url, .. } }`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PushPayload {
    pub notification: PushNotification,
    pub data: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PushNotification {
    pub title: Option<String>,
    pub body: Option<String>,
    pub icon: Option<String>,
}

/// Title and options for a push delivery. Missing fields and non-JSON
/// payloads take the configured defaults.
pub fn content_from_push(
    data: Option<&[u8]>,
    defaults: &NotificationDefaults,
) -> (String, NotificationOptions) {
    let payload = match data.filter(|d| !d.is_empty()) {
        Some(raw) => serde_json::from_slice::<PushPayload>(raw).unwrap_or_else(|e| {
            debug!(error = %e, "Push payload is not JSON, using defaults");
            PushPayload::default()
        }),
        None => PushPayload::default(),
    };

    let tag = payload
        .data
        .get("tag")
        .and_then(Value::as_str)
        .unwrap_or(defaults.tag.as_str())
        .to_string();
    let PushNotification { title, body, icon } = payload.notification;

    let options = NotificationOptions {
        body: body.unwrap_or_else(|| defaults.body.clone()),
        icon: Some(icon.unwrap_or_else(|| defaults.icon.clone())),
        badge: Some(defaults.badge.clone()),
        tag: Some(tag),
        vibrate: defaults.vibrate.clone(),
        data: payload.data,
        require_interaction: false,
    };
    (title.unwrap_or_else(|| defaults.title.clone()), options)
}

/// Overlay caller options on the default icon and badge. Caller values win;
/// options that do not fit the expected shape fall back to the defaults.
pub fn merge_options(
    caller: Option<Map<String, Value>>,
    defaults: &NotificationDefaults,
) -> NotificationOptions {
    let mut merged = Map::new();
    merged.insert("icon".to_string(), Value::String(defaults.icon.clone()));
    merged.insert("badge".to_string(), Value::String(defaults.badge.clone()));
    merged.extend(caller.unwrap_or_default());

    serde_json::from_value(Value::Object(merged)).unwrap_or_else(|e| {
        debug!(error = %e, "Malformed notification options, using defaults");
        NotificationOptions {
            icon: Some(defaults.icon.clone()),
            badge: Some(defaults.badge.clone()),
            ..Default::default()
        }
    })
}

/// Where a notification came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationSource {
    /// Background push delivery.
    Push,
    /// Delegated by a page through `SHOW_NOTIFICATION`.
    Foreground,
}

/// A displayed notification.
#[derive(Debug, Clone)]
pub struct Notification {
    pub id: NotificationId,
    pub title: String,
    pub options: NotificationOptions,
    pub source: NotificationSource,
    pub shown_at: Instant,
}

/// Result of routing a click.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOutcome {
    /// An existing window was focused.
    Focused(ClientId),
    /// No window matched; a new one was opened.
    Opened(ClientId),
}

/// Displayed notifications, oldest first.
#[derive(Debug)]
pub struct NotificationDispatcher {
    defaults: NotificationDefaults,
    displayed: Vec<Notification>,
}

impl NotificationDispatcher {
    pub fn new(defaults: NotificationDefaults) -> Self {
        Self {
            defaults,
            displayed: Vec::new(),
        }
    }

    pub fn defaults(&self) -> &NotificationDefaults {
        &self.defaults
    }

    pub fn displayed(&self) -> &[Notification] {
        &self.displayed
    }

    pub fn get(&self, id: NotificationId) -> Option<&Notification> {
        self.displayed.iter().find(|n| n.id == id)
    }

    /// Render a push delivery.
    pub fn on_push(&mut self, data: Option<&[u8]>) -> Notification {
        let (title, options) = content_from_push(data, &self.defaults);
        self.show(title, options, NotificationSource::Push)
    }

    /// Render a page-delegated notification.
    pub fn on_message(&mut self, title: String, options: Option<Map<String, Value>>) -> Notification {
        let options = merge_options(options, &self.defaults);
        self.show(title, options, NotificationSource::Foreground)
    }

    /// Display a notification, replacing any with the same tag.
    pub fn show(
        &mut self,
        title: String,
        options: NotificationOptions,
        source: NotificationSource,
    ) -> Notification {
        if let Some(tag) = options.tag.as_deref() {
            let before = self.displayed.len();
            self.displayed.retain(|n| n.options.tag.as_deref() != Some(tag));
            if self.displayed.len() < before {
                debug!(tag, "Replacing notification");
            }
        }

        let notification = Notification {
            id: NotificationId::new(),
            title,
            options,
            source,
            shown_at: Instant::now(),
        };
        info!(title = %notification.title, ?source, "Showing notification");
        self.displayed.push(notification.clone());
        notification
    }

    /// Dismiss a notification and route the click to a window.
    ///
    /// The routing URL (default `/`) is resolved against `scope`. A window at
    /// exactly that URL is focused; failing that, when configured, one whose
    /// URL contains the raw routing string; otherwise a new window opens.
    /// The root route never takes the contains fallback, since every URL
    /// contains `/`.
    pub fn on_click(
        &mut self,
        id: NotificationId,
        scope: &Url,
        clients: &mut Clients,
        controller: Option<ServiceWorkerId>,
    ) -> Result<ClickOutcome, ServiceWorkerError> {
        let position = self
            .displayed
            .iter()
            .position(|n| n.id == id)
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("notification {id:?}")))?;
        let notification = self.displayed.remove(position);

        let route = notification.options.url().unwrap_or("/");
        let target = scope
            .join(route)
            .map_err(|e| ServiceWorkerError::InvalidUrl(format!("{route}: {e}")))?;

        let existing = clients.find(target.as_str(), UrlMatch::Exact).or_else(|| {
            (self.defaults.click_contains_fallback && route != "/")
                .then(|| clients.find(route, UrlMatch::Contains))
                .flatten()
        });

        match existing {
            Some(client) => {
                clients.focus(client)?;
                debug!(url = %target, "Focused existing window");
                Ok(ClickOutcome::Focused(client))
            }
            None => {
                let client = clients.open_window(target.clone(), controller);
                debug!(url = %target, "Opened window");
                Ok(ClickOutcome::Opened(client))
            }
        }
    }

    /// Close every notification with `tag`.
    pub fn close(&mut self, tag: &str) -> usize {
        let before = self.displayed.len();
        self.displayed.retain(|n| n.options.tag.as_deref() != Some(tag));
        before - self.displayed.len()
    }

    /// Drop notifications older than the configured timeout.
    pub fn expire(&mut self) -> usize {
        let Some(secs) = self.defaults.timeout_secs else {
            return 0;
        };
        let timeout = Duration::from_secs(secs);
        let before = self.displayed.len();
        self.displayed.retain(|n| n.shown_at.elapsed() < timeout);
        let expired = before - self.displayed.len();
        if expired > 0 {
            debug!(expired, "Expired notifications");
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn defaults() -> NotificationDefaults {
        NotificationDefaults::default()
    }

    fn scope() -> Url {
        Url::parse("https://app.test/").unwrap()
    }

    #[test]
    fn test_tag_only_payload_uses_defaults() {
        let raw = json!({ "data": { "tag": "x" } }).to_string();
        let (title, options) = content_from_push(Some(raw.as_bytes()), &defaults());

        assert_eq!(title, "New Notification");
        assert_eq!(options.body, "You have a new notification");
        assert_eq!(options.tag.as_deref(), Some("x"));
        assert_eq!(options.vibrate, vec![200, 100, 200]);
        assert_eq!(options.badge.as_deref(), Some("/icons/icon-72x72.png"));
    }

    #[test]
    fn test_non_json_payload_falls_back() {
        let (title, options) = content_from_push(Some(b"plain text"), &defaults());
        assert_eq!(title, "New Notification");
        assert_eq!(options.tag.as_deref(), Some("default"));

        let (title, _) = content_from_push(None, &defaults());
        assert_eq!(title, "New Notification");
    }

    #[test]
    fn test_full_payload() {
        let raw = json!({
            "notification": { "title": "Session moved", "body": "Now in hall B", "icon": "/i.png" },
            "data": { "tag": "session-4", "url": "/sessions/4" }
        })
        .to_string();
        let (title, options) = content_from_push(Some(raw.as_bytes()), &defaults());
        assert_eq!(title, "Session moved");
        assert_eq!(options.icon.as_deref(), Some("/i.png"));
        assert_eq!(options.url(), Some("/sessions/4"));
    }

    #[test]
    fn test_merge_caller_wins() {
        let caller = json!({ "icon": "/custom.png", "body": "b", "tag": "t" });
        let options = merge_options(caller.as_object().cloned(), &defaults());
        assert_eq!(options.icon.as_deref(), Some("/custom.png"));
        assert_eq!(options.badge.as_deref(), Some("/icons/icon-72x72.png"));
        assert_eq!(options.body, "b");

        let bad = json!({ "vibrate": "buzz" });
        let options = merge_options(bad.as_object().cloned(), &defaults());
        assert_eq!(options.icon.as_deref(), Some("/icons/icon-192x192.png"));
        assert!(options.vibrate.is_empty());
    }

    #[test]
    fn test_same_tag_replaces() {
        let mut dispatcher = NotificationDispatcher::new(defaults());
        dispatcher.on_push(Some(br#"{"data":{"tag":"a"}}"#));
        dispatcher.on_push(Some(br#"{"data":{"tag":"b"}}"#));
        let latest = dispatcher.on_push(Some(br#"{"notification":{"title":"new"},"data":{"tag":"a"}}"#));

        assert_eq!(dispatcher.displayed().len(), 2);
        assert_eq!(dispatcher.get(latest.id).unwrap().title, "new");
        assert_eq!(dispatcher.close("b"), 1);
        assert_eq!(dispatcher.displayed().len(), 1);
    }

    #[test]
    fn test_untagged_messages_accumulate() {
        let mut dispatcher = NotificationDispatcher::new(defaults());
        dispatcher.on_message("one".to_string(), None);
        dispatcher.on_message("two".to_string(), None);
        assert_eq!(dispatcher.displayed().len(), 2);
        assert_eq!(dispatcher.displayed()[0].source, NotificationSource::Foreground);
    }

    #[test]
    fn test_click_focuses_exact_match() {
        let mut dispatcher = NotificationDispatcher::new(defaults());
        let mut clients = Clients::new();
        let target = clients.open_window(scope().join("/inbox").unwrap(), None);
        clients.open_window(scope(), None);

        let n = dispatcher.on_push(Some(br#"{"data":{"url":"/inbox"}}"#));
        let outcome = dispatcher.on_click(n.id, &scope(), &mut clients, None).unwrap();

        assert_eq!(outcome, ClickOutcome::Focused(target));
        assert!(clients.get(target).unwrap().focused);
        assert!(dispatcher.displayed().is_empty());
    }

    #[test]
    fn test_click_contains_fallback_and_open() {
        let mut dispatcher = NotificationDispatcher::new(defaults());
        let mut clients = Clients::new();
        let list = clients.open_window(scope().join("/inbox?page=2").unwrap(), None);

        let n = dispatcher.on_push(Some(br#"{"data":{"url":"/inbox"}}"#));
        assert_eq!(
            dispatcher.on_click(n.id, &scope(), &mut clients, None).unwrap(),
            ClickOutcome::Focused(list)
        );

        let n = dispatcher.on_push(Some(br#"{"data":{"url":"/settings"}}"#));
        let outcome = dispatcher.on_click(n.id, &scope(), &mut clients, None).unwrap();
        let ClickOutcome::Opened(id) = outcome else {
            panic!("expected a new window, got {outcome:?}");
        };
        assert_eq!(clients.get(id).unwrap().url.as_str(), "https://app.test/settings");
        assert_eq!(clients.len(), 2);
    }

    #[test]
    fn test_click_without_url_opens_root() {
        let mut dispatcher = NotificationDispatcher::new(defaults());
        let mut clients = Clients::new();
        let inbox = clients.open_window(scope().join("/inbox").unwrap(), None);

        let n = dispatcher.on_push(None);
        let outcome = dispatcher.on_click(n.id, &scope(), &mut clients, None).unwrap();
        let ClickOutcome::Opened(id) = outcome else {
            panic!("expected a new window, got {outcome:?}");
        };
        assert_eq!(clients.get(id).unwrap().url.as_str(), "https://app.test/");
        assert!(!clients.get(inbox).unwrap().focused);

        // An open root window is still found by exact match.
        let n = dispatcher.on_push(None);
        assert_eq!(
            dispatcher.on_click(n.id, &scope(), &mut clients, None).unwrap(),
            ClickOutcome::Focused(id)
        );
    }

    #[test]
    fn test_click_without_fallback_opens() {
        let mut config = defaults();
        config.click_contains_fallback = false;
        let mut dispatcher = NotificationDispatcher::new(config);
        let mut clients = Clients::new();
        clients.open_window(scope().join("/inbox?page=2").unwrap(), None);

        let n = dispatcher.on_push(Some(br#"{"data":{"url":"/inbox"}}"#));
        let outcome = dispatcher.on_click(n.id, &scope(), &mut clients, None).unwrap();
        assert!(matches!(outcome, ClickOutcome::Opened(_)));
    }

    #[test]
    fn test_click_unknown_notification() {
        let mut dispatcher = NotificationDispatcher::new(defaults());
        let n = dispatcher.on_push(None);
        let mut clients = Clients::new();
        dispatcher.on_click(n.id, &scope(), &mut clients, None).unwrap();
        assert!(dispatcher.on_click(n.id, &scope(), &mut clients, None).is_err());
    }

    #[test]
    fn test_expire() {
        let mut config = defaults();
        config.timeout_secs = Some(0);
        let mut dispatcher = NotificationDispatcher::new(config);
        dispatcher.on_push(None);
        assert_eq!(dispatcher.expire(), 1);

        let mut dispatcher = NotificationDispatcher::new(defaults());
        dispatcher.on_push(None);
        assert_eq!(dispatcher.expire(), 0);
    }
}
