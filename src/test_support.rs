//! In-memory stand-ins for the remote store and SMS gateway.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::firestore::RemoteStore;
use crate::sms::SmsGateway;

pub struct MemoryRemote {
    docs: Mutex<BTreeMap<(String, String), Value>>,
    failures: Mutex<VecDeque<Error>>,
    calls: Mutex<Vec<String>>,
    online: AtomicBool,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self {
            docs: Mutex::new(BTreeMap::new()),
            failures: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            online: AtomicBool::new(true),
        }
    }
}

impl MemoryRemote {
    /// Queue an error for the next write call.
    pub fn fail_next(&self, err: Error) {
        self.failures.lock().unwrap().push_back(err);
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn insert(&self, collection: &str, doc: Value) {
        let id = doc["id"].as_str().unwrap().to_string();
        self.docs
            .lock()
            .unwrap()
            .insert((collection.to_string(), id), doc);
    }

    pub fn get(&self, collection: &str, id: &str) -> Option<Value> {
        self.docs
            .lock()
            .unwrap()
            .get(&(collection.to_string(), id.to_string()))
            .cloned()
    }

    /// Successful and failed write calls, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn take_failure(&self) -> Option<Error> {
        self.failures.lock().unwrap().pop_front()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn upsert(&self, collection: &str, id: &str, data: &Value) -> Result<()> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        self.calls
            .lock()
            .unwrap()
            .push(format!("upsert {collection}/{id}"));
        self.docs
            .lock()
            .unwrap()
            .insert((collection.to_string(), id.to_string()), data.clone());
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        self.calls
            .lock()
            .unwrap()
            .push(format!("delete {collection}/{id}"));
        self.docs
            .lock()
            .unwrap()
            .remove(&(collection.to_string(), id.to_string()));
        Ok(())
    }

    async fn query_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<Value>> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(Error::Network("offline".into()));
        }
        Ok(self
            .docs
            .lock()
            .unwrap()
            .iter()
            .filter(|((c, _), doc)| c == collection && doc[field] == value)
            .map(|(_, doc)| doc.clone())
            .collect())
    }

    async fn health(&self) -> Result<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Network("offline".into()))
        }
    }
}

#[derive(Default)]
pub struct MemorySms {
    pub sent: Mutex<Vec<(String, String)>>,
    pub fail: AtomicBool,
}

impl MemorySms {
    /// The six-digit code from the most recent message.
    pub fn last_code(&self) -> String {
        let sent = self.sent.lock().unwrap();
        let (_, text) = sent.last().expect("no sms sent");
        text.split(|c: char| !c.is_ascii_digit())
            .find(|chunk| chunk.len() == 6)
            .expect("no code in sms")
            .to_string()
    }
}

#[async_trait]
impl SmsGateway for MemorySms {
    async fn send(&self, to: &str, text: &str) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Network("sms gateway unreachable".into()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), text.to_string()));
        Ok(())
    }
}
