use crate::error::{AccessError, Result};
use crate::models::CredentialRecord;
use crate::session::{LiveSession, SessionAdapter};
use crate::storage::CredentialStore;

/// Turn a stored record into a session the caller can use right now.
///
/// 1. materialize the payload (malformed payloads fail here);
/// 2. if the session is expired and the variant can refresh, refresh once,
///    write any new payload back, and check expiry again;
/// 3. check validity.
///
/// Nothing is retried beyond the single refresh, and the only side effect is
/// the payload rewrite after a successful refresh.
pub async fn ensure_usable(
    store: &dyn CredentialStore,
    adapter: &dyn SessionAdapter,
    record: &CredentialRecord,
) -> Result<LiveSession> {
    let mut session = adapter.materialize(record).await?;

    if adapter.is_expired(&session) {
        if !adapter.supports_refresh() {
            return Err(AccessError::ExpiredCredential {
                name: record.name.clone(),
            });
        }

        tracing::debug!(provider = %record.provider, name = %record.name, "Session expired; refreshing");
        let refreshed = adapter.refresh(session).await?;
        if let Some(payload) = refreshed.payload {
            store
                .update_payload(record.provider, &record.name, payload, refreshed.expiry)
                .await?;
            tracing::info!(provider = %record.provider, name = %record.name, "Stored refreshed credential");
        }
        session = refreshed.session;

        if adapter.is_expired(&session) {
            return Err(AccessError::ExpiredCredential {
                name: record.name.clone(),
            });
        }
    }

    if !adapter.is_valid(&session).await? {
        return Err(AccessError::invalid(
            &record.name,
            format!("{} rejected the {} session", record.provider, record.variant()),
        ));
    }
    Ok(session)
}
