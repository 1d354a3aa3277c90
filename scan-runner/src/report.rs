//! Report generation
//!
//! Report components render the scan result into a named format. A
//! component writes to a temp outfile which is read back into memory and
//! deleted on every exit path; rendering itself stays external to the
//! coordination layer.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use gs_core::error::Error;
use gs_core::issue::Issue;
use gs_core::options::ScanOptions;
use gs_core::stats::ScanStats;
use gs_core::Result;

use crate::session::ScanSession;

/// The merged scan result handed to report components.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub version: String,
    pub revision: String,
    pub target: String,
    pub sitemap: Vec<String>,
    pub issues: Vec<Issue>,
    pub stats: ScanStats,
    pub options: ScanOptions,
}

/// One report component, looked up by name.
pub trait Reporter: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the component can write to an outfile. Components without
    /// outfile support cannot back `report_as`.
    fn supports_outfile(&self) -> bool;

    fn write(&self, report: &ScanReport, outfile: &Path) -> Result<()>;
}

/// JSON report component; always available since the wire format is JSON
/// already.
pub struct JsonReporter;

impl Reporter for JsonReporter {
    fn name(&self) -> &str {
        "json"
    }

    fn supports_outfile(&self) -> bool {
        true
    }

    fn write(&self, report: &ScanReport, outfile: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(report)?;
        std::fs::write(outfile, content)?;
        Ok(())
    }
}

/// Registered report components.
pub struct ReporterSet {
    reporters: Vec<Arc<dyn Reporter>>,
}

impl ReporterSet {
    pub fn new() -> Self {
        Self {
            reporters: vec![Arc::new(JsonReporter)],
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporters.push(reporter);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Reporter>> {
        self.reporters
            .iter()
            .find(|r| r.name() == name)
            .map(Arc::clone)
    }

    pub fn names(&self) -> Vec<String> {
        self.reporters.iter().map(|r| r.name().to_string()).collect()
    }
}

impl Default for ReporterSet {
    fn default() -> Self {
        Self::new()
    }
}

fn outfile_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("arachn_report_as.{}", name))
}

impl ScanSession {
    /// Assemble the merged scan result.
    pub async fn report(&self) -> ScanReport {
        let sitemap = {
            let override_map = self.override_sitemap.read().await;
            if override_map.is_empty() {
                self.local_sitemap.read().await.iter().cloned().collect()
            } else {
                override_map.iter().cloned().collect()
            }
        };
        ScanReport {
            version: self.version().to_string(),
            revision: self.revision().to_string(),
            target: self.options.read().await.url.clone(),
            sitemap,
            issues: self.sink.issues().await,
            stats: self.stats.read().await.clone(),
            options: self.options.read().await.clone(),
        }
    }

    /// The report as a JSON string.
    pub async fn serialized_report(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.report().await)?)
    }

    /// Render the report with the named component and return the file
    /// contents. The outfile is deleted on success and failure alike;
    /// deletion failures are suppressed.
    pub async fn report_as(&self, name: &str) -> Result<String> {
        let reporter = self
            .collaborators
            .reporters
            .get(name)
            .ok_or_else(|| Error::ComponentNotFound(format!("report component '{}'", name)))?;
        if !reporter.supports_outfile() {
            return Err(Error::UnsupportedFormat(format!(
                "report component '{}' has no outfile support",
                name
            )));
        }

        let report = self.report().await;
        let outfile = outfile_path(name);
        debug!("Rendering report '{}' to {:?}", name, outfile);

        let result = reporter
            .write(&report, &outfile)
            .and_then(|()| std::fs::read_to_string(&outfile).map_err(Error::from));
        let _ = std::fs::remove_file(&outfile);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reporter_set_resolves_by_name() {
        let set = ReporterSet::new();
        assert!(set.get("json").is_some());
        assert!(set.get("xml").is_none());
        assert_eq!(set.names(), ["json"]);
    }

    #[test]
    fn json_reporter_round_trips_through_outfile() {
        let dir = tempfile::tempdir().unwrap();
        let outfile = dir.path().join("report.json");
        let report = ScanReport {
            version: "0.1.0".to_string(),
            revision: "0.1.0".to_string(),
            target: "http://target".to_string(),
            sitemap: vec!["http://target/".to_string()],
            issues: Vec::new(),
            stats: ScanStats::default(),
            options: ScanOptions::default(),
        };

        JsonReporter.write(&report, &outfile).unwrap();
        let content = std::fs::read_to_string(&outfile).unwrap();
        let parsed: ScanReport = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed.target, "http://target");
    }
}
