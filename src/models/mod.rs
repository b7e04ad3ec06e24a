mod payload;
mod provider;
mod record;
pub mod secret;

pub use payload::{
    BearerPair, CliDelegated, CliTool, CredentialPayload, KeyFile, StaticKey, Variant,
};
pub use provider::Provider;
pub use record::{validate_name, CredentialRecord, RecordSummary};
