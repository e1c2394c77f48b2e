//! In-memory fakes for [`ContainerRuntime`] and [`TemplateRenderer`].
//!
//! Both are configured through `&self` setters so a test can keep an
//! `Arc` to the fake, hand a clone to the code under test and adjust or
//! inspect it afterwards.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use tenant_core::{NetworkSpec, TenantSelection};

use crate::error::{RuntimeError, RuntimeResult};
use crate::types::{NetworkCreate, NetworkInfo, ReportedHealth, StopMode, UnitHealth, UnitStatus};
use crate::{ContainerRuntime, TemplateRenderer};

/// A call observed by [`FakeRuntime`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Ping,
    DefinedUnits,
    DefinedUnitsIn(String),
    InspectNetwork(String),
    CreateNetwork(String),
    StartGroup(Vec<String>),
    UnitHealth(String),
    RunningUnits,
    Stop { units: Vec<String>, mode: StopMode },
}

/// One scripted answer to a health query.
#[derive(Debug, Clone)]
pub enum HealthStep {
    Report(UnitHealth),
    QueryError(String),
}

impl HealthStep {
    pub fn healthy() -> Self {
        Self::Report(UnitHealth::running(ReportedHealth::Healthy))
    }

    pub fn unhealthy() -> Self {
        Self::Report(UnitHealth::running(ReportedHealth::Unhealthy))
    }

    pub fn starting() -> Self {
        Self::Report(UnitHealth::running(ReportedHealth::Starting))
    }

    pub fn no_check() -> Self {
        Self::Report(UnitHealth::running(ReportedHealth::NoHealthCheck))
    }

    pub fn exited() -> Self {
        Self::Report(UnitHealth {
            health: ReportedHealth::NoHealthCheck,
            running: false,
        })
    }
}

#[derive(Default)]
struct RuntimeState {
    unavailable: bool,
    defined: Vec<String>,
    networks: BTreeMap<String, NetworkInfo>,
    fail_network: BTreeSet<String>,
    racing_network: BTreeSet<String>,
    fail_start: BTreeSet<String>,
    listing_fails: bool,
    health: HashMap<String, VecDeque<HealthStep>>,
    running: BTreeSet<String>,
    graceful_stop_fails: bool,
    stop_fails: bool,
    calls: Vec<RuntimeCall>,
}

/// Scriptable container runtime.
///
/// Health queries consume the unit's script front to back; the last step
/// repeats forever. A unit without a script reports healthy while
/// running and absent otherwise.
#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<RuntimeState>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RuntimeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    pub fn define_units<I, S>(&self, units: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock().defined = units.into_iter().map(Into::into).collect();
    }

    pub fn add_network(&self, name: &str, driver: &str, attachable: bool) {
        self.lock().networks.insert(
            name.to_string(),
            NetworkInfo {
                name: name.to_string(),
                driver: driver.to_string(),
                attachable,
            },
        );
    }

    pub fn networks(&self) -> Vec<NetworkInfo> {
        self.lock().networks.values().cloned().collect()
    }

    /// Creating `name` fails with a command error.
    pub fn fail_network(&self, name: &str) {
        self.lock().fail_network.insert(name.to_string());
    }

    /// Creating `name` reports that another creator won the race.
    pub fn race_network(&self, name: &str) {
        self.lock().racing_network.insert(name.to_string());
    }

    /// Starting any group that contains `unit` fails.
    pub fn fail_start(&self, unit: &str) {
        self.lock().fail_start.insert(unit.to_string());
    }

    pub fn script_health(&self, unit: &str, steps: impl IntoIterator<Item = HealthStep>) {
        self.lock()
            .health
            .insert(unit.to_string(), steps.into_iter().collect());
    }

    pub fn set_running<I, S>(&self, units: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock().running = units.into_iter().map(Into::into).collect();
    }

    pub fn running(&self) -> Vec<String> {
        self.lock().running.iter().cloned().collect()
    }

    /// Listing the units of a rendered configuration fails, as when the
    /// compose file does not parse.
    pub fn set_listing_fails(&self, fails: bool) {
        self.lock().listing_fails = fails;
    }

    pub fn set_graceful_stop_fails(&self, fails: bool) {
        self.lock().graceful_stop_fails = fails;
    }

    /// Every stop fails, forced or not.
    pub fn set_stop_fails(&self, fails: bool) {
        self.lock().stop_fails = fails;
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.lock().calls.clone()
    }

    /// Groups passed to `start_group`, in call order.
    pub fn started_groups(&self) -> Vec<Vec<String>> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                RuntimeCall::StartGroup(units) => Some(units.clone()),
                _ => None,
            })
            .collect()
    }

    fn failed(command: &str, stderr: &str) -> RuntimeError {
        RuntimeError::CommandFailed {
            command: command.to_string(),
            status: "status 1".to_string(),
            stderr: stderr.to_string(),
        }
    }

    fn check_available(state: &RuntimeState) -> RuntimeResult<()> {
        if state.unavailable {
            Err(RuntimeError::Unavailable("fake runtime".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ping(&self) -> RuntimeResult<()> {
        let mut state = self.lock();
        state.calls.push(RuntimeCall::Ping);
        Self::check_available(&state)
    }

    async fn defined_units(&self) -> RuntimeResult<Vec<String>> {
        let mut state = self.lock();
        state.calls.push(RuntimeCall::DefinedUnits);
        Self::check_available(&state)?;
        Ok(state.defined.clone())
    }

    async fn defined_units_in(&self, dir: &Path) -> RuntimeResult<Vec<String>> {
        let mut state = self.lock();
        state
            .calls
            .push(RuntimeCall::DefinedUnitsIn(dir.display().to_string()));
        Self::check_available(&state)?;
        if state.listing_fails {
            return Err(Self::failed(
                "docker compose config --services",
                "yaml: line 3: mapping values are not allowed in this context",
            ));
        }
        Ok(state.defined.clone())
    }

    async fn inspect_network(&self, name: &str) -> RuntimeResult<Option<NetworkInfo>> {
        let mut state = self.lock();
        state.calls.push(RuntimeCall::InspectNetwork(name.to_string()));
        Self::check_available(&state)?;
        Ok(state.networks.get(name).cloned())
    }

    async fn create_network(&self, spec: &NetworkSpec) -> RuntimeResult<NetworkCreate> {
        let mut state = self.lock();
        state.calls.push(RuntimeCall::CreateNetwork(spec.name.clone()));
        Self::check_available(&state)?;
        if state.fail_network.contains(&spec.name) {
            return Err(Self::failed("network create", "permission denied"));
        }
        let info = NetworkInfo {
            name: spec.name.clone(),
            driver: spec.driver.clone(),
            attachable: spec.attachable,
        };
        let raced = state.racing_network.contains(&spec.name);
        state.networks.insert(spec.name.clone(), info);
        Ok(if raced {
            NetworkCreate::AlreadyExists
        } else {
            NetworkCreate::Created
        })
    }

    async fn start_group(&self, units: &[String]) -> RuntimeResult<Vec<UnitStatus>> {
        let mut state = self.lock();
        state.calls.push(RuntimeCall::StartGroup(units.to_vec()));
        Self::check_available(&state)?;
        if let Some(bad) = units.iter().find(|u| state.fail_start.contains(*u)) {
            return Err(Self::failed("compose up", &format!("{bad}: image not found")));
        }
        state.running.extend(units.iter().cloned());
        Ok(units
            .iter()
            .map(|u| UnitStatus {
                unit: u.clone(),
                state: "running".to_string(),
            })
            .collect())
    }

    async fn unit_health(&self, unit: &str) -> RuntimeResult<UnitHealth> {
        let mut state = self.lock();
        state.calls.push(RuntimeCall::UnitHealth(unit.to_string()));
        Self::check_available(&state)?;
        let running = state.running.contains(unit);
        let step = match state.health.get_mut(unit) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        match step {
            Some(HealthStep::Report(h)) => Ok(h),
            Some(HealthStep::QueryError(msg)) => Err(Self::failed("compose ps", &msg)),
            None if running => Ok(UnitHealth::running(ReportedHealth::Healthy)),
            None => Ok(UnitHealth::absent()),
        }
    }

    async fn running_units(&self) -> RuntimeResult<Vec<String>> {
        let mut state = self.lock();
        state.calls.push(RuntimeCall::RunningUnits);
        Self::check_available(&state)?;
        Ok(state.running.iter().cloned().collect())
    }

    async fn stop(&self, units: &[String], mode: StopMode) -> RuntimeResult<()> {
        let mut state = self.lock();
        state.calls.push(RuntimeCall::Stop {
            units: units.to_vec(),
            mode,
        });
        Self::check_available(&state)?;
        let fails = state.stop_fails
            || (state.graceful_stop_fails && matches!(mode, StopMode::Graceful { .. }));
        if fails {
            return Err(Self::failed("compose stop", "timed out waiting for units"));
        }
        for unit in units {
            state.running.remove(unit);
        }
        Ok(())
    }
}

#[derive(Default)]
struct RendererState {
    unavailable: bool,
    files: BTreeMap<String, String>,
    fail: Option<String>,
    rendered: Vec<String>,
}

/// Renderer that writes a fixed file set. `{domain}` and `{tenant}` in
/// file contents are replaced from the selection.
#[derive(Default)]
pub struct FakeRenderer {
    state: Mutex<RendererState>,
}

impl FakeRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, name: &str, content: &str) -> Self {
        self.lock().files.insert(name.to_string(), content.to_string());
        self
    }

    fn lock(&self) -> MutexGuard<'_, RendererState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Subsequent renders write their files and then fail with `message`.
    pub fn fail_with(&self, message: &str) {
        self.lock().fail = Some(message.to_string());
    }

    pub fn clear_failure(&self) {
        self.lock().fail = None;
    }

    /// Tenant ids rendered so far.
    pub fn rendered(&self) -> Vec<String> {
        self.lock().rendered.clone()
    }
}

#[async_trait]
impl TemplateRenderer for FakeRenderer {
    async fn check(&self) -> RuntimeResult<()> {
        if self.lock().unavailable {
            Err(RuntimeError::Unavailable("fake renderer".to_string()))
        } else {
            Ok(())
        }
    }

    async fn render(&self, selection: &TenantSelection, out_dir: &Path) -> RuntimeResult<()> {
        let (files, fail) = {
            let mut state = self.lock();
            state.rendered.push(selection.tenant_id.clone());
            (state.files.clone(), state.fail.clone())
        };
        for (name, content) in files {
            let content = content
                .replace("{domain}", &selection.domain)
                .replace("{tenant}", &selection.tenant_id);
            let path = out_dir.join(&name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| RuntimeError::Render(e.to_string()))?;
            }
            std::fs::write(&path, content).map_err(|e| RuntimeError::Render(e.to_string()))?;
        }
        match fail {
            Some(message) => Err(RuntimeError::Render(message)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_script_last_step_repeats() {
        let rt = FakeRuntime::new();
        rt.script_health(
            "db",
            [HealthStep::starting(), HealthStep::QueryError("boom".into()), HealthStep::healthy()],
        );
        assert_eq!(rt.unit_health("db").await.unwrap().health, ReportedHealth::Starting);
        assert!(rt.unit_health("db").await.is_err());
        for _ in 0..3 {
            assert_eq!(rt.unit_health("db").await.unwrap().health, ReportedHealth::Healthy);
        }
    }

    #[tokio::test]
    async fn unscripted_unit_follows_running_set() {
        let rt = FakeRuntime::new();
        assert!(!rt.unit_health("web").await.unwrap().running);
        rt.start_group(&["web".into()]).await.unwrap();
        assert_eq!(
            rt.unit_health("web").await.unwrap(),
            UnitHealth::running(ReportedHealth::Healthy)
        );
        rt.stop(&["web".into()], StopMode::Force).await.unwrap();
        assert!(rt.running().is_empty());
    }

    #[tokio::test]
    async fn graceful_stop_failure_leaves_units_running() {
        let rt = FakeRuntime::new();
        rt.set_running(["a", "b"]);
        rt.set_graceful_stop_fails(true);
        let graceful = StopMode::Graceful {
            timeout: std::time::Duration::from_secs(1),
        };
        assert!(rt.stop(&["a".into()], graceful).await.is_err());
        assert_eq!(rt.running(), vec!["a", "b"]);
        rt.stop(&["a".into(), "b".into()], StopMode::Force).await.unwrap();
        assert!(rt.running().is_empty());
    }

    #[tokio::test]
    async fn renderer_substitutes_and_can_fail() {
        let dir = tempfile::tempdir().unwrap();
        let r = FakeRenderer::new().with_file("conf/site.conf", "server_name {domain};");
        let sel = TenantSelection::from_toml_str("tenant_id = \"acme\"\ndomain = \"acme.test\"\n")
            .unwrap();
        r.render(&sel, dir.path()).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("conf/site.conf")).unwrap(),
            "server_name acme.test;"
        );

        r.fail_with("template error");
        assert!(matches!(
            r.render(&sel, dir.path()).await,
            Err(RuntimeError::Render(m)) if m == "template error"
        ));
        assert_eq!(r.rendered(), vec!["acme", "acme"]);
    }
}
