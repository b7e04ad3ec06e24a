use chrono::{DateTime, Utc};

use crate::error::{AccessError, Result};
use crate::models::{validate_name, CredentialPayload, CredentialRecord, Provider};

/// One provider's record list with the store's mutation rules applied.
///
/// Both store backends load a `RecordList`, mutate it, and write it back.
#[derive(Debug, Clone)]
pub(crate) struct RecordList {
    provider: Provider,
    records: Vec<CredentialRecord>,
}

impl RecordList {
    pub fn new(provider: Provider, records: Vec<CredentialRecord>) -> Self {
        Self { provider, records }
    }

    pub fn into_records(self) -> Vec<CredentialRecord> {
        self.records
    }

    pub fn records(&self) -> &[CredentialRecord] {
        &self.records
    }

    fn position(&self, name: &str) -> Result<usize> {
        self.records
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| AccessError::not_found(format!("{} credential {name:?}", self.provider)))
    }

    pub fn find(&self, name: &str) -> Result<&CredentialRecord> {
        let idx = self.position(name)?;
        Ok(&self.records[idx])
    }

    pub fn active(&self) -> Result<&CredentialRecord> {
        let mut active = self.records.iter().filter(|r| r.active);
        let first = active
            .next()
            .ok_or_else(|| AccessError::not_found(format!("active {} credential", self.provider)))?;
        if active.next().is_some() {
            tracing::warn!(
                provider = %self.provider,
                name = %first.name,
                "Store has more than one active record; using the first"
            );
        }
        Ok(first)
    }

    pub fn insert(&mut self, record: CredentialRecord) -> Result<()> {
        validate_name(&record.name).map_err(AccessError::credential)?;
        if record.provider != self.provider {
            return Err(AccessError::credential(format!(
                "record {:?} belongs to {}, not {}",
                record.name, record.provider, self.provider
            )));
        }
        if self.records.iter().any(|r| r.name == record.name) {
            return Err(AccessError::DuplicateName {
                provider: self.provider,
                name: record.name,
            });
        }
        if record.active {
            self.deactivate_all();
        }
        self.records.push(record);
        Ok(())
    }

    pub fn activate(&mut self, name: &str) -> Result<()> {
        let idx = self.position(name)?;
        self.deactivate_all();
        self.records[idx].active = true;
        Ok(())
    }

    pub fn deactivate_all(&mut self) {
        for record in &mut self.records {
            record.active = false;
        }
    }

    pub fn remove_active(&mut self) -> Option<CredentialRecord> {
        let idx = self.records.iter().position(|r| r.active)?;
        Some(self.records.remove(idx))
    }

    pub fn remove(&mut self, name: &str) -> Result<CredentialRecord> {
        let idx = self.position(name)?;
        Ok(self.records.remove(idx))
    }

    pub fn update_payload(
        &mut self,
        name: &str,
        payload: CredentialPayload,
        expiry: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let idx = self.position(name)?;
        let record = &mut self.records[idx];
        if record.variant() != payload.variant() {
            return Err(AccessError::credential(format!(
                "cannot replace {} payload of {name:?} with {}",
                record.variant(),
                payload.variant()
            )));
        }
        record.payload = payload;
        record.expiry = expiry;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BearerPair, CliDelegated, CliTool};

    fn cli_record(name: &str) -> CredentialRecord {
        CredentialRecord::new(
            Provider::Azure,
            name,
            CredentialPayload::CliDelegated(CliDelegated {
                tool: CliTool::Az,
                account: None,
                tenant: None,
            }),
        )
    }

    fn active_names(list: &RecordList) -> Vec<&str> {
        list.records()
            .iter()
            .filter(|r| r.active)
            .map(|r| r.name.as_str())
            .collect()
    }

    #[test]
    fn activate_is_exclusive() {
        let mut list = RecordList::new(Provider::Azure, Vec::new());
        for name in ["a", "b", "c"] {
            list.insert(cli_record(name)).unwrap();
        }

        list.activate("a").unwrap();
        list.activate("c").unwrap();
        assert_eq!(active_names(&list), vec!["c"]);

        let err = list.activate("missing").unwrap_err();
        assert_eq!(err.code(), "not_found");
        assert_eq!(active_names(&list), vec!["c"]);
    }

    #[test]
    fn inserting_active_record_deactivates_siblings() {
        let mut list = RecordList::new(Provider::Azure, Vec::new());
        list.insert(cli_record("a")).unwrap();
        list.activate("a").unwrap();

        let mut b = cli_record("b");
        b.active = true;
        list.insert(b).unwrap();
        assert_eq!(active_names(&list), vec!["b"]);
    }

    #[test]
    fn duplicate_and_foreign_records_rejected() {
        let mut list = RecordList::new(Provider::Azure, Vec::new());
        list.insert(cli_record("a")).unwrap();
        assert_eq!(list.insert(cli_record("a")).unwrap_err().code(), "duplicate_name");

        let mut foreign = cli_record("z");
        foreign.provider = Provider::Gcp;
        assert_eq!(list.insert(foreign).unwrap_err().code(), "credential_error");
    }

    #[test]
    fn remove_active_without_active_is_none() {
        let mut list = RecordList::new(Provider::Azure, Vec::new());
        list.insert(cli_record("a")).unwrap();
        assert!(list.remove_active().is_none());
        assert_eq!(list.records().len(), 1);
    }

    #[test]
    fn update_payload_keeps_variant() {
        let mut list = RecordList::new(Provider::Azure, Vec::new());
        list.insert(cli_record("a")).unwrap();
        let err = list
            .update_payload(
                "a",
                CredentialPayload::BearerPair(BearerPair::new("t")),
                None,
            )
            .unwrap_err();
        assert_eq!(err.code(), "credential_error");
    }
}
