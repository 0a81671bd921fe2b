use assert_cmd::prelude::*;
use predicates::prelude::*;
use serde_json::{Value, json};
use std::process::Command;
use std::sync::Arc;
use tempfile::{TempDir, tempdir};

use safestash::backend::{KvBackend, SqliteBackend};
use safestash::cache::TtlCache;
use safestash::clock::ManualClock;
use safestash::keystore::SoftwareKeyStore;
use safestash::vault::CredentialVault;

/// Command pointed at an isolated data dir and a config file that does not exist
fn safestash(temp: &TempDir) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("safestash"));
    cmd.arg("--data-dir")
        .arg(temp.path().join("data"))
        .arg("--config")
        .arg(temp.path().join("config.yaml"))
        .env_remove("SAFESTASH_FORMAT")
        .env_remove("SAFESTASH_DEBUG")
        .env_remove("RUST_LOG");
    cmd
}

fn json_stdout(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout should be JSON")
}

fn open_backend(temp: &TempDir) -> Arc<dyn KvBackend> {
    Arc::new(SqliteBackend::open_at(&temp.path().join("data")).unwrap())
}

/// One expired and one live entry in `namespace`
async fn seed_cache(backend: Arc<dyn KvBackend>, namespace: &str) {
    let stale = TtlCache::builder(namespace, backend.clone())
        .clock(Arc::new(ManualClock::new(0)))
        .without_sweeper()
        .build()
        .unwrap();
    stale.set("old-plan", &json!(["yesterday"])).await;

    let live = TtlCache::builder(namespace, backend)
        .without_sweeper()
        .build()
        .unwrap();
    live.set("plan", &json!(["today"])).await;
}

async fn seed_vault(temp: &TempDir, backend: Arc<dyn KvBackend>) {
    let keystore =
        Arc::new(SoftwareKeyStore::open_at(&temp.path().join("data").join("keys.json")).unwrap());
    let vault = CredentialVault::new("credentials", backend, keystore)
        .await
        .unwrap();
    vault.write("session", "tok-very-secret").await.unwrap();
}

#[test]
fn version_prints_package_version() {
    let temp = tempdir().unwrap();
    safestash(&temp)
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn cache_path_uses_data_dir_override() {
    let temp = tempdir().unwrap();
    let data_dir = temp.path().join("data");

    safestash(&temp)
        .args(["cache", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains(data_dir.to_string_lossy().to_string()));
}

#[test]
fn cache_status_on_empty_store() {
    let temp = tempdir().unwrap();

    let assert = safestash(&temp)
        .args(["cache", "status", "--format", "json"])
        .assert()
        .success();

    let json = json_stdout(assert.get_output());
    assert_eq!(json["data"]["total_items"], 0);
    assert!(
        json["data"]["path"]
            .as_str()
            .unwrap()
            .ends_with("store.db")
    );
}

#[tokio::test]
async fn cache_sweep_removes_only_expired_entries() {
    let temp = tempdir().unwrap();
    seed_cache(open_backend(&temp), "thi-api").await;

    let assert = safestash(&temp)
        .args(["cache", "sweep", "--namespace", "thi-api", "--format", "json"])
        .assert()
        .success();
    let json = json_stdout(assert.get_output());
    assert_eq!(json["data"]["inspected"], 2);
    assert_eq!(json["data"]["removed"], 1);
    assert_eq!(json["data"]["failed"], 0);

    let assert = safestash(&temp)
        .args(["cache", "status", "-n", "thi-api", "--format", "json"])
        .assert()
        .success();
    let json = json_stdout(assert.get_output());
    assert_eq!(json["data"]["valid_entries"], 1);
    assert_eq!(json["data"]["expired_entries"], 0);
}

#[tokio::test]
async fn cache_clear_leaves_other_namespaces() {
    let temp = tempdir().unwrap();
    seed_cache(open_backend(&temp), "thi-api").await;
    seed_cache(open_backend(&temp), "asset-api").await;

    safestash(&temp)
        .args(["cache", "clear", "--namespace", "thi-api"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cleared 2 cache entries"));

    let backend = open_backend(&temp);
    assert!(backend.keys_with_prefix("thi-api-").await.unwrap().is_empty());
    assert_eq!(backend.keys_with_prefix("asset-api-").await.unwrap().len(), 2);
}

#[test]
fn cache_clear_requires_namespace() {
    let temp = tempdir().unwrap();

    safestash(&temp)
        .args(["cache", "clear"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--namespace"));
}

#[tokio::test]
async fn vault_check_and_forget() {
    let temp = tempdir().unwrap();
    seed_vault(&temp, open_backend(&temp)).await;

    safestash(&temp)
        .args(["vault", "check", "session"])
        .assert()
        .success()
        .stdout(predicate::str::contains("session: present"))
        .stdout(predicate::str::contains("tok-very-secret").not());

    safestash(&temp)
        .args(["vault", "check", "login"])
        .assert()
        .success()
        .stdout(predicate::str::contains("login: absent"));

    safestash(&temp)
        .args(["vault", "forget", "session"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Forgot session"));

    let assert = safestash(&temp)
        .args(["vault", "check", "session", "--format", "json"])
        .assert()
        .success();
    assert_eq!(json_stdout(assert.get_output())["data"]["present"], false);
}

#[test]
fn malformed_config_is_reported() {
    let temp = tempdir().unwrap();
    std::fs::write(temp.path().join("config.yaml"), "cache: [not, closed").unwrap();

    safestash(&temp)
        .args(["cache", "path"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse configuration"));
}

#[test]
fn invalid_vault_namespace_in_config_is_rejected() {
    let temp = tempdir().unwrap();
    let config_path = temp.path().join("config.yaml");
    std::fs::write(&config_path, "vault:\n  namespace: \"creds-\"\n").unwrap();

    safestash(&temp)
        .args(["vault", "check", "session"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("vault.namespace"));

    assert!(!temp.path().join("data").join("keys.json").exists());
}
