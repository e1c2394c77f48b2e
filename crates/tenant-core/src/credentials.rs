//! Credential loading.
//!
//! Sources are `KEY=value` dotenv documents merged in order, later sources
//! winning on collision. Nothing here is fatal: unreadable sources are
//! skipped and missing critical keys are reported, never silently patched.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Where a batch of credentials comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum CredentialSource {
    File(PathBuf),
    /// In-memory dotenv content, labelled for reporting.
    Inline { label: String, content: String },
}

impl CredentialSource {
    pub fn label(&self) -> String {
        match self {
            CredentialSource::File(path) => path.display().to_string(),
            CredentialSource::Inline { label, .. } => label.clone(),
        }
    }

    fn read_pairs(&self) -> Result<Vec<(String, String)>, dotenvy::Error> {
        match self {
            CredentialSource::File(path) => dotenvy::from_path_iter(path)?.collect(),
            CredentialSource::Inline { content, .. } => {
                dotenvy::from_read_iter(content.as_bytes()).collect()
            }
        }
    }
}

/// Effective secret material. `Debug` prints keys only.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CredentialSet(BTreeMap<String, String>);

impl CredentialSet {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.keys()).finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CredentialWarning {
    SourceSkipped { source: String, reason: String },
    MissingCritical { key: String },
}

impl fmt::Display for CredentialWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialWarning::SourceSkipped { source, reason } => {
                write!(f, "credential source {source} skipped: {reason}")
            }
            CredentialWarning::MissingCritical { key } => write!(
                f,
                "critical credential {key} is missing; services will run with insecure placeholders"
            ),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CredentialReport {
    pub credentials: CredentialSet,
    pub warnings: Vec<CredentialWarning>,
}

impl CredentialReport {
    pub fn missing_critical(&self) -> impl Iterator<Item = &str> {
        self.warnings.iter().filter_map(|w| match w {
            CredentialWarning::MissingCritical { key } => Some(key.as_str()),
            _ => None,
        })
    }
}

/// Merge `sources` in order and check `critical` keys afterwards.
pub fn load(sources: &[CredentialSource], critical: &[String]) -> CredentialReport {
    let mut report = CredentialReport::default();

    for source in sources {
        let label = source.label();
        match source.read_pairs() {
            Ok(pairs) => {
                debug!(source = %label, keys = pairs.len(), "credential source loaded");
                for (key, value) in pairs {
                    report.credentials.insert(key, value);
                }
            }
            Err(e) => {
                warn!(source = %label, error = %e, "credential source skipped");
                report.warnings.push(CredentialWarning::SourceSkipped {
                    source: label,
                    reason: e.to_string(),
                });
            }
        }
    }

    for key in critical {
        let present = report
            .credentials
            .get(key)
            .is_some_and(|v| !v.trim().is_empty());
        if !present {
            warn!(%key, "critical credential missing");
            report
                .warnings
                .push(CredentialWarning::MissingCritical { key: key.clone() });
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inline(label: &str, content: &str) -> CredentialSource {
        CredentialSource::Inline {
            label: label.to_string(),
            content: content.to_string(),
        }
    }

    fn critical() -> Vec<String> {
        vec!["PROXY_ADMIN_SECRET".to_string(), "POSTGRES_PASSWORD".to_string()]
    }

    #[test]
    fn later_sources_override_earlier() {
        let report = load(
            &[
                inline("base", "POSTGRES_PASSWORD=old\nSMTP_HOST=mail\n"),
                inline("tenant", "POSTGRES_PASSWORD=new\nPROXY_ADMIN_SECRET=s3cret\n"),
            ],
            &critical(),
        );
        assert_eq!(report.credentials.get("POSTGRES_PASSWORD"), Some("new"));
        assert_eq!(report.credentials.get("SMTP_HOST"), Some("mail"));
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn missing_file_is_skipped_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("present.env");
        std::fs::write(&present, "PROXY_ADMIN_SECRET=a\nPOSTGRES_PASSWORD=b\n").unwrap();

        let report = load(
            &[
                CredentialSource::File(dir.path().join("absent.env")),
                CredentialSource::File(present),
            ],
            &critical(),
        );
        assert_eq!(report.credentials.len(), 2);
        assert_eq!(report.warnings.len(), 1);
        assert!(matches!(
            &report.warnings[0],
            CredentialWarning::SourceSkipped { source, .. } if source.ends_with("absent.env")
        ));
    }

    #[test]
    fn missing_and_empty_critical_keys_are_reported() {
        let report = load(&[inline("base", "POSTGRES_PASSWORD=\n")], &critical());
        let missing: Vec<&str> = report.missing_critical().collect();
        assert_eq!(missing, vec!["PROXY_ADMIN_SECRET", "POSTGRES_PASSWORD"]);
    }

    #[test]
    fn no_sources_yields_empty_set_and_critical_warnings() {
        let report = load(&[], &critical());
        assert!(report.credentials.is_empty());
        assert_eq!(report.warnings.len(), 2);
    }

    #[test]
    fn debug_output_hides_values() {
        let mut set = CredentialSet::default();
        set.insert("POSTGRES_PASSWORD", "hunter2");
        let printed = format!("{set:?}");
        assert!(printed.contains("POSTGRES_PASSWORD"));
        assert!(!printed.contains("hunter2"));
    }
}
