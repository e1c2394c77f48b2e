//! Rollback scenarios: snapshots taken by real deployments, restored
//! against the in-memory runtime.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use tenant_core::{CredentialSource, TenantSelection};
use tenantgrid_health::HealthVerifier;
use tenantgrid_rollout::{RollbackError, RollbackManager, Sequencer, SequencerSettings};
use tenantgrid_runtime::fakes::{FakeRenderer, FakeRuntime, RuntimeCall};
use tenantgrid_runtime::StopMode;
use tenantgrid_state::{ConfigStore, SnapshotArchive, SnapshotReason, Verdict};

struct Harness {
    dir: TempDir,
    runtime: Arc<FakeRuntime>,
    renderer: Arc<FakeRenderer>,
    store: ConfigStore,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new());
        runtime.define_units(["traefik", "authelia", "homepage", "nextcloud", "vikunja"]);
        let renderer = Arc::new(
            FakeRenderer::new().with_file("docker-compose.yml", "# {tenant} on {domain}\n"),
        );
        let store = ConfigStore::new(dir.path().join("config"), ".env");
        Self {
            dir,
            runtime,
            renderer,
            store,
        }
    }

    fn archive(&self) -> SnapshotArchive {
        SnapshotArchive::new(self.dir.path().join("snapshots"))
    }

    fn sequencer(&self) -> Sequencer {
        let settings = SequencerSettings {
            core: vec!["traefik".into(), "authelia".into()],
            landing: vec!["homepage".into()],
            networks: Vec::new(),
            credential_sources: vec![CredentialSource::Inline {
                label: "secrets".into(),
                content: "PROXY_ADMIN_SECRET=x\nPOSTGRES_PASSWORD=y\n".into(),
            }],
            critical_keys: vec!["PROXY_ADMIN_SECRET".into()],
            auto_snapshot: true,
            timeout: None,
        };
        let verifier = HealthVerifier::new(
            self.runtime.clone(),
            Duration::from_secs(5),
            Duration::from_secs(60),
        );
        Sequencer::new(
            self.runtime.clone(),
            self.renderer.clone(),
            self.store.clone(),
            self.archive(),
            verifier,
            settings,
        )
    }

    fn manager(&self) -> RollbackManager {
        RollbackManager::new(
            self.runtime.clone(),
            self.store.clone(),
            self.archive(),
            Duration::from_secs(10),
        )
    }

    /// Deploy v1 (nextcloud), then v2 (vikunja on another domain).
    async fn deploy_twice(&self) -> String {
        let seq = self.sequencer();
        let v1 = seq.deploy(&v1()).await.unwrap();
        assert_eq!(v1.verdict, Some(Verdict::Succeeded));
        let v2 = seq.deploy(&v2()).await.unwrap();
        assert_eq!(v2.verdict, Some(Verdict::Succeeded));
        v2.pre_deploy_snapshot.expect("v2 snapshots v1")
    }
}

fn v1() -> TenantSelection {
    TenantSelection::from_toml_str(
        "tenant_id = \"acme\"\ndomain = \"v1.example\"\n[services.nextcloud]\nenabled = true\n",
    )
    .unwrap()
}

fn v2() -> TenantSelection {
    TenantSelection::from_toml_str(
        "tenant_id = \"acme\"\ndomain = \"v2.example\"\n[services.vikunja]\nenabled = true\n",
    )
    .unwrap()
}

fn strings(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[tokio::test(start_paused = true)]
async fn rollback_without_snapshots_touches_nothing() {
    let h = Harness::new();
    h.runtime.set_running(["traefik"]);
    let err = h.manager().rollback(None).await.unwrap_err();

    assert!(matches!(err, RollbackError::NoSnapshots));
    assert!(!err.is_degraded());
    assert!(h.runtime.calls().is_empty());
    assert_eq!(h.runtime.running(), strings(&["traefik"]));
}

#[tokio::test(start_paused = true)]
async fn unknown_snapshot_id_is_reported() {
    let h = Harness::new();
    h.deploy_twice().await;
    let err = h.manager().rollback(Some("20200101T000000Z")).await.unwrap_err();
    assert!(matches!(err, RollbackError::SnapshotNotFound(id) if id == "20200101T000000Z"));
    assert!(!h
        .runtime
        .calls()
        .iter()
        .any(|c| matches!(c, RuntimeCall::Stop { .. })));
}

#[tokio::test(start_paused = true)]
async fn rollback_restores_previous_deployment() {
    let h = Harness::new();
    let v1_snapshot = h.deploy_twice().await;
    let v2_config = h.store.read_effective().unwrap();
    let calls_before = h.runtime.calls().len();

    let report = h.manager().rollback(None).await.unwrap();

    assert_eq!(report.target.id, v1_snapshot);
    assert_eq!(report.target.reason, SnapshotReason::PreDeploy);
    assert!(!report.forced);
    assert_eq!(
        report.stopped,
        strings(&["authelia", "homepage", "nextcloud", "traefik", "vikunja"])
    );
    assert_eq!(
        report.restarted,
        strings(&["traefik", "authelia", "homepage", "nextcloud"])
    );
    assert!(report.post_check.passed);

    let restored = h.store.read_effective().unwrap();
    assert_eq!(
        restored.files["docker-compose.yml"],
        "# acme on v1.example\n"
    );
    assert!(restored.files[".env"].contains("NEXTCLOUD_ENABLED=\"true\""));

    // Forensic copy of what v2 left behind.
    let forensic = report.forensic_snapshot.unwrap();
    let kept = h.archive().get(&forensic).unwrap().unwrap();
    assert_eq!(kept.reason, SnapshotReason::PreRollback);
    assert_eq!(kept.config, v2_config);
    assert_eq!(kept.tenant_id.as_deref(), Some("acme"));

    // Groups restarted in order after the stop.
    let calls = h.runtime.calls()[calls_before..].to_vec();
    let starts: Vec<Vec<String>> = calls
        .iter()
        .filter_map(|c| match c {
            RuntimeCall::StartGroup(units) => Some(units.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(
        starts,
        vec![
            strings(&["traefik", "authelia"]),
            strings(&["homepage"]),
            strings(&["nextcloud"]),
        ]
    );
    assert!(matches!(
        calls.iter().find(|c| matches!(c, RuntimeCall::Stop { .. })),
        Some(RuntimeCall::Stop {
            mode: StopMode::Graceful { .. },
            ..
        })
    ));
}

#[tokio::test(start_paused = true)]
async fn explicit_snapshot_id_is_honored() {
    let h = Harness::new();
    h.deploy_twice().await;
    let manual = h.manager().snapshot(SnapshotReason::Manual).unwrap();
    assert_eq!(manual.tenant_id.as_deref(), Some("acme"));

    let report = h.manager().rollback(Some(&manual.id)).await.unwrap();
    assert_eq!(report.target.id, manual.id);
    assert_eq!(
        h.store.read_effective().unwrap().files["docker-compose.yml"],
        "# acme on v2.example\n"
    );
}

#[tokio::test(start_paused = true)]
async fn implicit_target_belongs_to_deployed_tenant() {
    let h = Harness::new();
    let acme = h.deploy_twice().await;

    // Another tenant sharing the archive has a newer snapshot.
    let mut foreign = tenantgrid_state::EffectiveConfig::default();
    foreign
        .files
        .insert("docker-compose.yml".into(), "# globex\n".into());
    h.archive()
        .create_at(
            chrono::Utc::now() + chrono::Duration::hours(1),
            Some("globex"),
            SnapshotReason::Manual,
            &foreign,
        )
        .unwrap();

    let report = h.manager().rollback(None).await.unwrap();
    assert_eq!(report.target.id, acme);
    assert_eq!(
        h.store.read_effective().unwrap().files["docker-compose.yml"],
        "# acme on v1.example\n"
    );
}

#[tokio::test(start_paused = true)]
async fn failed_graceful_stop_is_forced() {
    let h = Harness::new();
    h.deploy_twice().await;
    h.runtime.set_graceful_stop_fails(true);

    let report = h.manager().rollback(None).await.unwrap();
    assert!(report.forced);
    assert!(report.post_check.passed);
    assert!(h
        .runtime
        .calls()
        .iter()
        .any(|c| matches!(c, RuntimeCall::Stop { mode: StopMode::Force, .. })));
}

#[tokio::test(start_paused = true)]
async fn stop_failure_leaves_configuration_degraded() {
    let h = Harness::new();
    h.deploy_twice().await;
    let v2_config = h.store.read_effective().unwrap();
    h.runtime.set_stop_fails(true);

    let err = h.manager().rollback(None).await.unwrap_err();
    assert!(matches!(err, RollbackError::Stop(_)));
    assert!(err.is_degraded());
    assert_eq!(h.store.read_effective().unwrap(), v2_config);
    // The lock is released even on failure.
    assert!(h.store.lock().is_ok());
}

#[tokio::test(start_paused = true)]
async fn restart_failure_is_degraded() {
    let h = Harness::new();
    h.deploy_twice().await;
    h.runtime.fail_start("traefik");

    let err = h.manager().rollback(None).await.unwrap_err();
    assert!(matches!(err, RollbackError::Restart(_)));
    assert!(err.is_degraded());
    assert!(h.runtime.running().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_post_check_is_reported() {
    let h = Harness::new();
    h.deploy_twice().await;

    // A snapshot without a manifest restarts whatever the runtime defines,
    // which here is nothing.
    let bare = {
        let lock = h.store.lock().unwrap();
        let mut config = h.store.read_effective().unwrap();
        config.files.remove("tenantgrid-manifest.json");
        h.store.replace(&lock, &config).unwrap();
        drop(lock);
        h.manager().snapshot(SnapshotReason::Manual).unwrap()
    };
    h.runtime.define_units(Vec::<String>::new());

    let report = h.manager().rollback(Some(&bare.id)).await.unwrap();
    assert!(report.restarted.is_empty());
    assert!(!report.post_check.passed);
    assert!(report.post_check.running.is_empty());
    assert!(report.post_check.error.is_none());
}

#[tokio::test(start_paused = true)]
async fn repeated_rollback_skips_forensic_snapshots() {
    let h = Harness::new();
    let v1_snapshot = h.deploy_twice().await;
    let first = h.manager().rollback(None).await.unwrap();
    assert!(first.forensic_snapshot.is_some());

    let second = h.manager().rollback(None).await.unwrap();
    assert_eq!(second.target.id, v1_snapshot);
    assert_ne!(Some(second.target.id.clone()), first.forensic_snapshot);
}

#[tokio::test(start_paused = true)]
async fn manual_snapshot_of_empty_configuration_fails() {
    let h = Harness::new();
    let err = h.manager().snapshot(SnapshotReason::Manual).unwrap_err();
    assert!(matches!(err, RollbackError::NothingToSnapshot));
    assert!(h.archive().list().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn rollback_refuses_a_held_lock() {
    let h = Harness::new();
    h.deploy_twice().await;
    let _held = h.store.lock().unwrap();
    let err = h.manager().rollback(None).await.unwrap_err();
    assert!(matches!(err, RollbackError::State(_)));
    assert!(!err.is_degraded());
}
