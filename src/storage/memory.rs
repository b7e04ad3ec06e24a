//! In-memory credential store for tests and embedding.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::Result;
use crate::models::{CredentialPayload, CredentialRecord, Provider, RecordSummary};

use super::{CredentialStore, RecordList};

/// Keeps every provider's records behind one async mutex.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<Provider, Vec<CredentialRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn with_list<T>(
        &self,
        provider: Provider,
        f: impl FnOnce(&mut RecordList) -> Result<T> + Send,
    ) -> Result<T> {
        let mut all = self.records.lock().await;
        let current = all.get(&provider).cloned().unwrap_or_default();
        let mut list = RecordList::new(provider, current);
        let out = f(&mut list)?;
        all.insert(provider, list.into_records());
        Ok(out)
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn add(&self, record: CredentialRecord) -> Result<()> {
        self.with_list(record.provider, move |list| list.insert(record))
            .await
    }

    async fn list(&self, provider: Provider) -> Result<Vec<CredentialRecord>> {
        let all = self.records.lock().await;
        Ok(all.get(&provider).cloned().unwrap_or_default())
    }

    async fn get(&self, provider: Provider, name: &str) -> Result<CredentialRecord> {
        self.with_list(provider, |list| list.find(name).cloned())
            .await
    }

    async fn get_active(&self, provider: Provider) -> Result<CredentialRecord> {
        self.with_list(provider, |list| list.active().cloned()).await
    }

    async fn activate(&self, provider: Provider, name: &str) -> Result<()> {
        self.with_list(provider, |list| list.activate(name)).await
    }

    async fn deactivate_all(&self, provider: Provider) -> Result<()> {
        self.with_list(provider, |list| {
            list.deactivate_all();
            Ok(())
        })
        .await
    }

    async fn delete_active(&self, provider: Provider) -> Result<Option<RecordSummary>> {
        self.with_list(provider, |list| Ok(list.remove_active().map(|r| r.summary())))
            .await
    }

    async fn delete(&self, provider: Provider, name: &str) -> Result<RecordSummary> {
        self.with_list(provider, |list| list.remove(name).map(|r| r.summary()))
            .await
    }

    async fn update_payload(
        &self,
        provider: Provider,
        name: &str,
        payload: CredentialPayload,
        expiry: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.with_list(provider, move |list| list.update_payload(name, payload, expiry))
            .await
    }
}
