mod support;

use accesskeep::app;
use accesskeep::config::Config;
use accesskeep::models::{BearerPair, CredentialPayload, Provider};
use anyhow::Result;
use support::{access_token, Harness, NOW};
use tempfile::TempDir;

fn bearer(exp: i64) -> CredentialPayload {
    CredentialPayload::BearerPair(BearerPair::new(access_token(exp, "ops@contoso.example")))
}

#[tokio::test]
async fn activate_and_list_through_commands() -> Result<()> {
    let dir = TempDir::new()?;
    let harness = Harness::new(dir.path(), Config::default());
    let manager = &harness.manager;

    let a = app::add_credential(manager, Provider::Azure, "a", bearer(NOW + 3600), true).await;
    assert_eq!(a["success"], true, "{a}");
    assert_eq!(a["credential"]["active"], true);
    assert_eq!(a["identity"]["principal"], "ops@contoso.example");
    let b = app::add_credential(manager, Provider::Azure, "b", bearer(NOW + 3600), false).await;
    assert_eq!(b["success"], true, "{b}");

    let out = app::activate_credential(manager, Provider::Azure, "b").await;
    assert_eq!(out["credential"]["name"], "b");

    let listed = app::list_credentials(manager, Some(Provider::Azure)).await;
    let flags: Vec<(String, bool)> = listed["credentials"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| {
            (
                c["name"].as_str().unwrap().to_string(),
                c["active"].as_bool().unwrap(),
            )
        })
        .collect();
    assert_eq!(flags, vec![("a".to_string(), false), ("b".to_string(), true)]);

    // Listings never carry token material.
    assert!(!listed.to_string().contains("eyJ"));
    Ok(())
}

#[tokio::test]
async fn current_reports_session_without_secrets() -> Result<()> {
    let dir = TempDir::new()?;
    let harness = Harness::new(dir.path(), Config::default());
    let manager = &harness.manager;
    app::add_credential(manager, Provider::Directory, "graph", bearer(NOW + 3600), true).await;

    let out = app::current_access(manager, Provider::Directory).await;
    assert_eq!(out["success"], true, "{out}");
    assert_eq!(out["credential"]["name"], "graph");
    assert_eq!(out["session"]["variant"], "bearer-pair");
    assert_eq!(out["session"]["claims"]["tenant"], "tenant-1");
    assert!(!out.to_string().contains("eyJ"));
    Ok(())
}

#[tokio::test]
async fn failures_are_envelopes_not_errors() -> Result<()> {
    let dir = TempDir::new()?;
    let harness = Harness::new(dir.path(), Config::default());
    let manager = &harness.manager;

    let out = app::current_access(manager, Provider::Aws).await;
    assert_eq!(out["success"], false);
    assert_eq!(out["error"]["code"], "not_found");

    let out = app::activate_credential(manager, Provider::Aws, "ghost").await;
    assert_eq!(out["error"]["code"], "not_found");

    let out = app::add_key_file(
        manager,
        Provider::Gcp,
        "sa",
        &dir.path().join("missing.json"),
        Vec::new(),
        true,
    )
    .await;
    assert_eq!(out["error"]["code"], "credential_error");

    let out = app::delete_active_credential(manager, Provider::Aws).await;
    assert_eq!(out["success"], true);
    assert!(out["deleted"].is_null());
    Ok(())
}

#[tokio::test]
async fn expired_bearer_without_refresh_token_warns_on_add() -> Result<()> {
    let dir = TempDir::new()?;
    let harness = Harness::new(dir.path(), Config::default());

    let out = app::add_credential(
        &harness.manager,
        Provider::Azure,
        "stale",
        bearer(NOW - 60),
        true,
    )
    .await;
    assert_eq!(out["success"], true, "{out}");
    assert!(out["warning"].as_str().is_some());
    Ok(())
}
