//! Template renderer backed by an external program.
//!
//! The selection is handed over as a JSON file; `{input}` and `{output}`
//! in the configured arguments are replaced with that file and the output
//! directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use tenant_core::{ConfigError, OrchestratorConfig, TenantSelection};

use crate::command::{program_exists, run_checked};
use crate::error::{RuntimeError, RuntimeResult};
use crate::TemplateRenderer;

#[derive(Debug, Clone)]
pub struct CommandRenderer {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandRenderer {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    pub fn from_config(config: &OrchestratorConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            &config.renderer.program,
            config.renderer.args.clone(),
            config.command_timeout()?,
        ))
    }

    fn command(&self, input: &Path, output: &Path) -> Command {
        let input = input.to_string_lossy();
        let output = output.to_string_lossy();
        let mut cmd = Command::new(&self.program);
        cmd.args(
            self.args
                .iter()
                .map(|a| a.replace("{input}", &input).replace("{output}", &output)),
        );
        cmd
    }
}

/// Input file next to the output dir, outside the tree being rendered.
fn input_path(out_dir: &Path) -> PathBuf {
    let name = out_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "render".to_string());
    out_dir.with_file_name(format!(".{name}.selection.json"))
}

#[async_trait]
impl TemplateRenderer for CommandRenderer {
    async fn check(&self) -> RuntimeResult<()> {
        if program_exists(&self.program).await {
            Ok(())
        } else {
            Err(RuntimeError::Unavailable(self.program.clone()))
        }
    }

    async fn render(&self, selection: &TenantSelection, out_dir: &Path) -> RuntimeResult<()> {
        let input = input_path(out_dir);
        let json = serde_json::to_vec_pretty(selection)
            .map_err(|e| RuntimeError::Render(format!("serialize selection: {e}")))?;
        tokio::fs::write(&input, json)
            .await
            .map_err(|e| RuntimeError::Render(format!("{}: {e}", input.display())))?;

        let cmd = self.command(&input, out_dir);
        debug!(tenant = %selection.tenant_id, out = %out_dir.display(), "rendering templates");
        let result = run_checked(cmd, self.timeout).await;

        if let Err(e) = tokio::fs::remove_file(&input).await {
            warn!(path = %input.display(), error = %e, "failed to remove renderer input");
        }

        match result {
            Ok(_) => {
                info!(tenant = %selection.tenant_id, "templates rendered");
                Ok(())
            }
            Err(RuntimeError::CommandFailed { stderr, status, .. }) => Err(RuntimeError::Render(
                format!("{} exited with {status}: {stderr}", self.program),
            )),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn selection() -> TenantSelection {
        TenantSelection {
            tenant_id: "acme".into(),
            domain: "acme.example".into(),
            services: IndexMap::new(),
        }
    }

    #[test]
    fn placeholders_are_substituted() {
        let r = CommandRenderer::new(
            "render",
            vec!["--data={input}".into(), "{output}".into()],
            Duration::from_secs(5),
        );
        let cmd = r.command(Path::new("/tmp/in.json"), Path::new("/tmp/out"));
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args, vec!["--data=/tmp/in.json", "/tmp/out"]);
    }

    #[test]
    fn input_sits_beside_output() {
        let p = input_path(Path::new("/srv/config.staging"));
        assert_eq!(p, PathBuf::from("/srv/.config.staging.selection.json"));
    }

    #[tokio::test]
    async fn missing_program_fails_check() {
        let r = CommandRenderer::new("tenantgrid-no-such-renderer", vec![], Duration::from_secs(5));
        assert!(matches!(r.check().await, Err(RuntimeError::Unavailable(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn renders_through_shell_and_cleans_input() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        std::fs::create_dir(&out).unwrap();
        let r = CommandRenderer::new(
            "sh",
            vec!["-c".into(), "cp {input} {output}/selection.json".into()],
            Duration::from_secs(5),
        );
        r.render(&selection(), &out).await.unwrap();

        let copied = std::fs::read_to_string(out.join("selection.json")).unwrap();
        assert!(copied.contains("\"acme.example\""));
        assert!(!input_path(&out).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_renderer_is_render_error() {
        let dir = tempfile::tempdir().unwrap();
        let r = CommandRenderer::new(
            "sh",
            vec!["-c".into(), "echo 'bad template' >&2; exit 1".into()],
            Duration::from_secs(5),
        );
        let err = r.render(&selection(), dir.path()).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Render(m) if m.contains("bad template")));
    }
}
