use std::future::Future;

use serde_json::{json, Value};

use crate::access::AccessManager;
use crate::models::{CliTool, Provider};
use crate::session::device_code::DeviceAuthorization;
use crate::session::CliLogin;

use super::{established_output, failure, respond};

pub async fn cli_login(
    manager: &AccessManager,
    provider: Provider,
    name: &str,
    tool: CliTool,
    login: &CliLogin,
    activate: bool,
) -> Value {
    respond(
        manager
            .cli_login(provider, name, tool, login, activate)
            .await
            .map(established_output),
    )
}

/// Redeem the active bearer credential's refresh token for another client.
pub async fn exchange_refresh_token(
    manager: &AccessManager,
    provider: Provider,
    client_id: &str,
    scope: &str,
    name: &str,
    activate: bool,
) -> Value {
    respond(
        manager
            .exchange(provider, client_id, scope, name, activate)
            .await
            .map(established_output),
    )
}

/// Run a device-code sign-in to completion.
///
/// `notify` receives the user code as soon as it is issued. The flow is
/// cancelled when `cancel` resolves first (the binary passes Ctrl-C).
pub async fn device_code_login<C>(
    manager: &AccessManager,
    provider: Provider,
    name: &str,
    tenant: Option<&str>,
    activate: bool,
    notify: impl FnOnce(&DeviceAuthorization),
    cancel: C,
) -> Value
where
    C: Future<Output = ()>,
{
    let mut login = match manager
        .start_device_code(provider, name, tenant, activate)
        .await
    {
        Ok(login) => login,
        Err(e) => return failure(&e),
    };
    notify(login.authorization());

    let finished = tokio::select! {
        result = login.wait() => Some(result),
        () = cancel => None,
    };
    let result = match finished {
        Some(result) => result,
        None => {
            login.cancel();
            login.wait().await
        }
    };

    let user_code = login.authorization().user_code.clone();
    respond(result.map(|credential| {
        json!({
            "credential": credential,
            "user_code": user_code,
        })
    }))
}
