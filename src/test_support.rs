//! Test utilities shared across the crate.
//!
//! This module is only compiled during tests (`#[cfg(test)]`).

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::client::{
    ClientError, ClientEvent, ClientTurnServer, DeviceInfo, DeviceMap, DeviceTarget, ListenerId,
    RelationsOptions, RelationsResponse, ToDeviceBatch, TurnServersListener, WidgetClient,
};
use crate::widget::Widget;

/// Arguments of one `relations` call.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationsCall {
    pub room_id: String,
    pub event_id: String,
    pub rel_type: Option<String>,
    pub event_type: Option<String>,
    pub options: RelationsOptions,
}

/// A client that records every call and lets tests drive TURN events by hand.
pub struct MockClient {
    polling: AtomicBool,
    servers: Mutex<Result<Vec<ClientTurnServer>, ClientError>>,
    listeners: Mutex<Vec<(ListenerId, TurnServersListener)>>,
    next_id: AtomicU64,
    subscribe_calls: AtomicUsize,
    unsubscribe_calls: AtomicUsize,
    devices: Mutex<DeviceMap>,
    downloaded: Mutex<Vec<Vec<String>>>,
    queued: Mutex<Vec<ToDeviceBatch>>,
    encrypted: Mutex<Vec<(Vec<DeviceTarget>, Value)>>,
    relations: Mutex<RelationsResponse>,
    relations_calls: Mutex<Vec<RelationsCall>>,
}

impl MockClient {
    pub fn new(polling: bool) -> Self {
        Self {
            polling: AtomicBool::new(polling),
            servers: Mutex::new(Ok(Vec::new())),
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            subscribe_calls: AtomicUsize::new(0),
            unsubscribe_calls: AtomicUsize::new(0),
            devices: Mutex::new(DeviceMap::new()),
            downloaded: Mutex::new(Vec::new()),
            queued: Mutex::new(Vec::new()),
            encrypted: Mutex::new(Vec::new()),
            relations: Mutex::new(RelationsResponse::default()),
            relations_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_polling(&self, polling: bool) {
        self.polling.store(polling, Ordering::SeqCst);
    }

    /// Sets what `turn_servers()` returns. Does not emit.
    pub fn set_servers(&self, servers: Vec<ClientTurnServer>) {
        *self.servers.lock().unwrap() = Ok(servers);
    }

    pub fn fail_servers(&self, error: ClientError) {
        *self.servers.lock().unwrap() = Err(error);
    }

    pub fn emit(&self, event: ClientEvent) {
        let listeners: Vec<TurnServersListener> = self
            .listeners
            .lock()
            .unwrap()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(&event);
        }
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    pub fn unsubscribe_calls(&self) -> usize {
        self.unsubscribe_calls.load(Ordering::SeqCst)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    pub fn add_device(&self, user_id: &str, device: DeviceInfo) {
        self.devices
            .lock()
            .unwrap()
            .entry(user_id.to_string())
            .or_default()
            .insert(device.device_id.clone(), device);
    }

    pub fn downloaded_users(&self) -> Vec<Vec<String>> {
        self.downloaded.lock().unwrap().clone()
    }

    pub fn queued_batches(&self) -> Vec<ToDeviceBatch> {
        self.queued.lock().unwrap().clone()
    }

    pub fn encrypted_sends(&self) -> Vec<(Vec<DeviceTarget>, Value)> {
        self.encrypted.lock().unwrap().clone()
    }

    pub fn set_relations(&self, page: RelationsResponse) {
        *self.relations.lock().unwrap() = page;
    }

    pub fn relations_calls(&self) -> Vec<RelationsCall> {
        self.relations_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl WidgetClient for MockClient {
    fn polling_turn_servers(&self) -> bool {
        self.polling.load(Ordering::SeqCst)
    }

    fn turn_servers(&self) -> Result<Vec<ClientTurnServer>, ClientError> {
        self.servers.lock().unwrap().clone()
    }

    fn on_turn_servers(&self, listener: TurnServersListener) -> ListenerId {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners.lock().unwrap().push((id, listener));
        id
    }

    fn off_turn_servers(&self, id: ListenerId) {
        self.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().unwrap().retain(|(existing, _)| *existing != id);
    }

    async fn queue_to_device(&self, batch: ToDeviceBatch) -> Result<(), ClientError> {
        self.queued.lock().unwrap().push(batch);
        Ok(())
    }

    async fn download_keys(&self, user_ids: &[String]) -> Result<DeviceMap, ClientError> {
        self.downloaded.lock().unwrap().push(user_ids.to_vec());
        let devices = self.devices.lock().unwrap();
        Ok(user_ids
            .iter()
            .filter_map(|id| devices.get(id).map(|d| (id.clone(), d.clone())))
            .collect())
    }

    async fn encrypt_and_send_to_devices(
        &self,
        targets: &[DeviceTarget],
        payload: &Value,
    ) -> Result<(), ClientError> {
        self.encrypted
            .lock()
            .unwrap()
            .push((targets.to_vec(), payload.clone()));
        Ok(())
    }

    async fn relations(
        &self,
        room_id: &str,
        event_id: &str,
        rel_type: Option<&str>,
        event_type: Option<&str>,
        options: &RelationsOptions,
    ) -> Result<RelationsResponse, ClientError> {
        self.relations_calls.lock().unwrap().push(RelationsCall {
            room_id: room_id.to_string(),
            event_id: event_id.to_string(),
            rel_type: rel_type.map(str::to_string),
            event_type: event_type.map(str::to_string),
            options: options.clone(),
        });
        Ok(self.relations.lock().unwrap().clone())
    }
}

/// The widget used by driver tests.
pub fn test_widget() -> Widget {
    Widget {
        id: "test".to_string(),
        creator_user_id: "@alice:example.org".to_string(),
        widget_type: "example".to_string(),
        url: "https://example.org".to_string(),
    }
}
