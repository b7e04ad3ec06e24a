use tokio::task::JoinHandle;

use crate::error::{AccessError, Result};
use crate::models::RecordSummary;
use crate::session::device_code::DeviceAuthorization;

const FLOW: &str = "device code sign-in";

/// A device-code sign-in running in the background.
///
/// The polling task keeps running if the handle is dropped; call
/// [`cancel`](Self::cancel) to stop it.
pub struct DeviceCodeLogin {
    authorization: DeviceAuthorization,
    task: JoinHandle<Result<RecordSummary>>,
}

impl DeviceCodeLogin {
    pub(crate) fn new(
        authorization: DeviceAuthorization,
        task: JoinHandle<Result<RecordSummary>>,
    ) -> Self {
        Self {
            authorization,
            task,
        }
    }

    pub fn authorization(&self) -> &DeviceAuthorization {
        &self.authorization
    }

    pub fn instructions(&self) -> String {
        self.authorization.instructions()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn cancel(&self) {
        tracing::info!(user_code = %self.authorization.user_code, "Cancelling device code sign-in");
        self.task.abort();
    }

    /// Wait for the stored record, or the reason the flow ended without one.
    ///
    /// Call at most once to completion; a cancelled `wait` future may be
    /// retried.
    pub async fn wait(&mut self) -> Result<RecordSummary> {
        match (&mut self.task).await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(AccessError::Cancelled {
                flow: FLOW.to_string(),
            }),
            Err(e) => Err(AccessError::credential(format!("{FLOW} task failed: {e}"))),
        }
    }
}
