//! Open pages a worker may control.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use url::Url;

use crate::WorkerId;

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
}

/// A client (open page or dedicated worker).
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Worker currently controlling this client.
    pub controller: Option<WorkerId>,
}

/// Clients registry.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    /// Create new clients registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an uncontrolled client and return its id.
    pub fn open(&mut self, url: Url, client_type: ClientType) -> String {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        let id = format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed));
        self.clients.insert(
            id.clone(),
            Client {
                id: id.clone(),
                url,
                client_type,
                controller: None,
            },
        );
        id
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    /// Remove a client.
    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }

    /// All clients, optionally including ones no worker controls.
    pub fn match_all(&self, include_uncontrolled: bool) -> Vec<&Client> {
        self.clients
            .values()
            .filter(|c| include_uncontrolled || c.controller.is_some())
            .collect()
    }

    /// Take control of every client on `origin`. Returns how many changed hands.
    pub fn claim(&mut self, worker: WorkerId, origin: &Url) -> usize {
        let mut claimed = 0;
        for client in self.clients.values_mut() {
            if client.url.origin() == origin.origin() && client.controller != Some(worker) {
                client.controller = Some(worker);
                claimed += 1;
            }
        }
        claimed
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_open_and_get() {
        let mut clients = Clients::new();
        let id = clients.open(url("https://house.example/"), ClientType::Window);

        let client = clients.get(&id).unwrap();
        assert_eq!(client.client_type, ClientType::Window);
        assert!(client.controller.is_none());
        assert_eq!(clients.match_all(false).len(), 0);
        assert_eq!(clients.match_all(true).len(), 1);
    }

    #[test]
    fn test_claim_same_origin_only() {
        let mut clients = Clients::new();
        let worker = WorkerId::new();
        let home = clients.open(url("https://house.example/"), ClientType::Window);
        let fotos = clients.open(url("https://house.example/fotos.html"), ClientType::Window);
        let foreign = clients.open(url("https://other.example/"), ClientType::Window);

        assert_eq!(clients.claim(worker, &url("https://house.example/")), 2);
        assert_eq!(clients.get(&home).unwrap().controller, Some(worker));
        assert_eq!(clients.get(&fotos).unwrap().controller, Some(worker));
        assert!(clients.get(&foreign).unwrap().controller.is_none());

        // Already controlled
        assert_eq!(clients.claim(worker, &url("https://house.example/")), 0);
    }

    #[test]
    fn test_remove() {
        let mut clients = Clients::new();
        let id = clients.open(url("https://house.example/"), ClientType::Worker);
        assert!(clients.remove(&id).is_some());
        assert!(clients.is_empty());
    }
}
