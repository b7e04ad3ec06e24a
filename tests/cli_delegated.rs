#![cfg(unix)]

mod support;

use accesskeep::config::Config;
use accesskeep::models::{CliDelegated, CliTool, CredentialPayload, CredentialRecord, Provider};
use accesskeep::session::{CliLogin, LiveSession};
use accesskeep::storage::CredentialStore;
use anyhow::Result;
use secrecy::SecretString;
use support::{fake_tool, Harness};
use tempfile::TempDir;

const AZ_LOGIN_OUTPUT: &str = r#"[
  {"cloudName": "AzureCloud", "id": "sub-prod", "name": "Prod", "tenantId": "tenant-1",
   "isDefault": true, "state": "Enabled",
   "user": {"name": "app-1", "type": "servicePrincipal"}}
]"#;

fn config_with_az(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.cli.az_path = Some(fake_tool(dir.path(), "az"));
    config
}

#[tokio::test]
async fn service_principal_login_records_account() -> Result<()> {
    let dir = TempDir::new()?;
    let harness = Harness::new(dir.path(), config_with_az(&dir));
    harness.runner.push_success(AZ_LOGIN_OUTPUT);

    let login = CliLogin::ServicePrincipal {
        client_id: "app-1".to_string(),
        secret: SecretString::from("s3cret".to_string()),
        tenant: "tenant-1".to_string(),
    };
    let established = harness
        .manager
        .cli_login(Provider::Azure, "az-sp", CliTool::Az, &login, true)
        .await?;

    assert!(established.record.active);
    assert!(established.warning.is_none());
    let identity = established.identity.expect("identity");
    assert_eq!(identity.account.as_deref(), Some("sub-prod"));

    let calls = harness.runner.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].args.contains(&"--service-principal".to_string()));
    assert!(!calls[0].redacted().contains("s3cret"));

    match harness.store.get_active(Provider::Azure).await?.payload {
        CredentialPayload::CliDelegated(cli) => {
            assert_eq!(cli.tool, CliTool::Az);
            assert_eq!(cli.account.as_deref(), Some("sub-prod"));
            assert_eq!(cli.tenant.as_deref(), Some("tenant-1"));
        }
        other => panic!("unexpected payload {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn unparseable_login_output_degrades_to_warning() -> Result<()> {
    let dir = TempDir::new()?;
    let harness = Harness::new(dir.path(), config_with_az(&dir));
    harness
        .runner
        .push_success("Logged in, but the CLI printed a banner instead of JSON")
        .push_success("WARNING: something unexpected");

    let established = harness
        .manager
        .cli_login(Provider::Azure, "az-odd", CliTool::Az, &CliLogin::Interactive, false)
        .await?;

    assert!(established.warning.is_some());
    let identity = established.identity.expect("identity");
    assert!(identity.raw_output.is_some());
    assert_eq!(harness.manager.list(Provider::Azure).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn failed_login_stores_nothing() -> Result<()> {
    let dir = TempDir::new()?;
    let harness = Harness::new(dir.path(), config_with_az(&dir));
    harness
        .runner
        .push_failure(1, "ERROR: AADSTS7000215: Invalid client secret provided.");

    let login = CliLogin::ServicePrincipal {
        client_id: "app-1".to_string(),
        secret: SecretString::from("wrong".to_string()),
        tenant: "tenant-1".to_string(),
    };
    let err = harness
        .manager
        .cli_login(Provider::Azure, "az-sp", CliTool::Az, &login, true)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "credential_error");
    assert!(err.to_string().contains("AADSTS7000215"));
    assert!(harness.manager.list(Provider::Azure).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn current_access_asks_the_tool_who_is_logged_in() -> Result<()> {
    let dir = TempDir::new()?;
    let harness = Harness::new(dir.path(), config_with_az(&dir));
    let mut record = CredentialRecord::new(
        Provider::Azure,
        "az",
        CredentialPayload::CliDelegated(CliDelegated {
            tool: CliTool::Az,
            account: None,
            tenant: None,
        }),
    );
    record.active = true;
    harness.store.add(record).await?;

    harness.runner.push_success(AZ_LOGIN_OUTPUT);
    let session = harness.manager.get_current_access(Provider::Azure).await?;
    match &session {
        LiveSession::CliDelegated(cli) => {
            assert!(cli.logged_in());
            assert_eq!(cli.identity.principal.as_deref(), Some("app-1"));
        }
        other => panic!("unexpected session {other:?}"),
    }
    assert_eq!(
        harness.runner.calls()[0].args,
        vec!["account", "list", "--output", "json"]
    );

    // Logged out: the tool answers with an empty list.
    harness.runner.push_success("[]");
    let err = harness
        .manager
        .get_current_access(Provider::Azure)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalid_credential");
    Ok(())
}

#[tokio::test]
async fn unsupported_login_method_is_rejected_before_running() -> Result<()> {
    let dir = TempDir::new()?;
    let mut config = Config::default();
    config.cli.gcloud_path = Some(fake_tool(dir.path(), "gcloud"));
    let harness = Harness::new(dir.path(), config);

    let login = CliLogin::UsernamePassword {
        username: "ops@example.com".to_string(),
        password: SecretString::from("pw".to_string()),
        tenant: None,
    };
    let err = harness
        .manager
        .cli_login(Provider::Gcp, "g", CliTool::Gcloud, &login, true)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "credential_error");
    assert!(harness.runner.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn establishing_a_taken_name_does_not_run_the_tool() -> Result<()> {
    let dir = TempDir::new()?;
    let harness = Harness::new(dir.path(), config_with_az(&dir));
    let payload = || {
        CredentialPayload::CliDelegated(CliDelegated {
            tool: CliTool::Az,
            account: None,
            tenant: None,
        })
    };
    harness
        .store
        .add(CredentialRecord::new(Provider::Azure, "az", payload()))
        .await?;

    let err = harness
        .manager
        .establish(Provider::Azure, "az", payload(), true)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "duplicate_name");
    assert!(harness.runner.calls().is_empty());
    Ok(())
}
