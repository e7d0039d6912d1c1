//! Windows (pages) the background process can see, focus and open.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use url::Url;

use crate::lifecycle::ServiceWorkerId;
use crate::ServiceWorkerError;

/// Identifier of an open window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// A controlled or uncontrolled window.
#[derive(Debug, Clone)]
pub struct Client {
    pub id: ClientId,
    pub url: Url,
    pub focused: bool,
    /// Worker currently serving this window's requests.
    pub controller: Option<ServiceWorkerId>,
}

impl Client {
    pub fn focus(&mut self) {
        self.focused = true;
    }
}

/// How a click target is matched against open windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlMatch {
    Exact,
    /// Window URL contains the target string.
    Contains,
}

/// Clients API.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<ClientId, Client>,
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: ClientId) -> Option<&Client> {
        self.clients.get(&id)
    }

    /// All windows, oldest first.
    pub fn match_all(&self) -> Vec<&Client> {
        let mut all: Vec<&Client> = self.clients.values().collect();
        all.sort_by_key(|c| c.id);
        all
    }

    /// First window whose URL matches `target` under `mode`.
    pub fn find(&self, target: &str, mode: UrlMatch) -> Option<ClientId> {
        self.match_all()
            .into_iter()
            .find(|c| match mode {
                UrlMatch::Exact => c.url.as_str() == target,
                UrlMatch::Contains => c.url.as_str().contains(target),
            })
            .map(|c| c.id)
    }

    /// Focus a window, unfocusing every other one.
    pub fn focus(&mut self, id: ClientId) -> Result<(), ServiceWorkerError> {
        if !self.clients.contains_key(&id) {
            return Err(ServiceWorkerError::NotFound(format!("client {id:?}")));
        }
        for client in self.clients.values_mut() {
            client.focused = false;
        }
        if let Some(client) = self.clients.get_mut(&id) {
            client.focus();
        }
        Ok(())
    }

    /// Open and focus a new window.
    pub fn open_window(&mut self, url: Url, controller: Option<ServiceWorkerId>) -> ClientId {
        let id = ClientId::new();
        for client in self.clients.values_mut() {
            client.focused = false;
        }
        self.clients.insert(
            id,
            Client {
                id,
                url,
                focused: true,
                controller,
            },
        );
        id
    }

    /// Put every window under `worker`.
    pub fn claim(&mut self, worker: ServiceWorkerId) {
        for client in self.clients.values_mut() {
            client.controller = Some(worker);
        }
    }

    pub fn remove(&mut self, id: ClientId) -> Option<Client> {
        self.clients.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
