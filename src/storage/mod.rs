//! Provider-scoped persistence for credential records.
//!
//! Every mutation is a read-modify-write of the provider's whole record list,
//! serialized by a per-provider lock so two in-process writers cannot lose
//! each other's update.

mod json_file;
mod memory;
mod records;

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;
pub(crate) use records::RecordList;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{CredentialPayload, CredentialRecord, Provider, RecordSummary};

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Append a record. Names are unique per provider.
    ///
    /// A record added with `active = true` deactivates its siblings.
    async fn add(&self, record: CredentialRecord) -> Result<()>;

    /// All records of a provider in insertion order.
    async fn list(&self, provider: Provider) -> Result<Vec<CredentialRecord>>;

    async fn get(&self, provider: Provider, name: &str) -> Result<CredentialRecord>;

    /// The active record, or `NotFound` when the store is empty or nothing is active.
    async fn get_active(&self, provider: Provider) -> Result<CredentialRecord>;

    /// Make `name` the only active record of the provider.
    async fn activate(&self, provider: Provider, name: &str) -> Result<()>;

    async fn deactivate_all(&self, provider: Provider) -> Result<()>;

    /// Remove whichever record is active. Returns `None` when none was.
    async fn delete_active(&self, provider: Provider) -> Result<Option<RecordSummary>>;

    async fn delete(&self, provider: Provider, name: &str) -> Result<RecordSummary>;

    /// Replace a record's payload after a refresh.
    async fn update_payload(
        &self,
        provider: Provider,
        name: &str,
        payload: CredentialPayload,
        expiry: Option<DateTime<Utc>>,
    ) -> Result<()>;
}
