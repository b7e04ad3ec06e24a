//! Commands behind the `accesskeep` binary.
//!
//! Every command returns a JSON envelope and never an error:
//! `{"success": true, ...}` or
//! `{"success": false, "error": {"code": .., "message": ..}}`.
//! Commands that stored something but could not confirm it add `"warning"`.

mod config;
mod credentials;
mod login;
mod session;

use serde_json::{json, Value};

use crate::access::Established;
use crate::error::{AccessError, Result};

pub use config::config_output;
pub use credentials::{
    activate_credential, add_credential, add_key_file, deactivate_credentials,
    delete_active_credential, delete_credential, list_credentials,
};
pub use login::{cli_login, device_code_login, exchange_refresh_token};
pub use session::{current_access, decode_token};

/// `{"success": true}` merged with the fields of `fields`.
fn success(fields: Value) -> Value {
    let mut out = json!({ "success": true });
    if let (Value::Object(out_map), Value::Object(extra)) = (&mut out, fields) {
        out_map.extend(extra);
    }
    out
}

pub fn failure(err: &AccessError) -> Value {
    json!({
        "success": false,
        "error": err.to_json(),
    })
}

fn respond(result: Result<Value>) -> Value {
    match result {
        Ok(fields) => success(fields),
        Err(e) => {
            tracing::debug!(code = e.code(), error = %e, "Command failed");
            failure(&e)
        }
    }
}

fn established_output(established: Established) -> Value {
    let mut out = json!({ "credential": established.record });
    if let Some(identity) = established.identity {
        out["identity"] = json!(identity);
    }
    if let Some(warning) = established.warning {
        out["warning"] = json!(warning);
    }
    out
}
