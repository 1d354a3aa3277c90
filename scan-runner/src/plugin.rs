//! Plugin bookkeeping
//!
//! Plugin execution itself is external; the grid layer tracks which plugins
//! are loaded, stores their results, and merges results collected from
//! slaves during grid clean-up.

use std::collections::HashMap;

use serde_json::Value;

/// Loaded plugin set and its accumulated results.
#[derive(Debug, Default, Clone)]
pub struct PluginSet {
    loaded: Vec<String>,
    results: HashMap<String, Value>,
}

impl PluginSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the configured plugins as loaded. Duplicates collapse.
    pub fn load<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            let name = name.into();
            if !self.loaded.contains(&name) {
                self.loaded.push(name);
            }
        }
    }

    pub fn list(&self) -> &[String] {
        &self.loaded
    }

    pub fn record_result(&mut self, plugin: impl Into<String>, result: Value) {
        self.results.insert(plugin.into(), result);
    }

    pub fn results(&self) -> &HashMap<String, Value> {
        &self.results
    }

    /// Merge results collected from a slave. The local result is kept when
    /// both sides report for the same plugin.
    pub fn merge_results(&mut self, remote: HashMap<String, Value>) {
        for (plugin, result) in remote {
            self.results.entry(plugin).or_insert(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn load_collapses_duplicates() {
        let mut plugins = PluginSet::new();
        plugins.load(["autologin", "healthmap", "autologin"]);
        assert_eq!(plugins.list(), ["autologin", "healthmap"]);
    }

    #[test]
    fn merge_keeps_local_results_on_conflict() {
        let mut plugins = PluginSet::new();
        plugins.record_result("healthmap", json!({"alive": 10}));

        let mut remote = HashMap::new();
        remote.insert("healthmap".to_string(), json!({"alive": 3}));
        remote.insert("autologin".to_string(), json!({"ok": true}));
        plugins.merge_results(remote);

        assert_eq!(plugins.results()["healthmap"], json!({"alive": 10}));
        assert_eq!(plugins.results()["autologin"], json!({"ok": true}));
    }
}
