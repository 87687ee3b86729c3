//! Instrumentation rule bundles
//!
//! The rule registry and definition language live outside this crate; the
//! core consumes matched bundles, rewrites their file-scoped paths to a
//! local form after convergence, and persists them for the toolexec stage.
//! Ordered maps keep every serialization deterministic: two runs with
//! identical inputs and matcher behavior persist identical bytes.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, WeaveError};
use crate::manifest::Manifest;
use crate::module_locator::GoModule;

/// A single instrumentation rule. `path` names the hook package whose
/// code must be compilable at the final build; `file` names a raw source
/// file injected by file-scoped rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

/// Rules for one target package, indexed by file and function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleBundle {
    pub import_path: String,
    #[serde(default)]
    pub file_rules: BTreeMap<String, BTreeMap<String, Vec<Rule>>>,
}

impl RuleBundle {
    /// Unique hook package paths across all rules, in stable order.
    pub fn hook_paths(&self) -> BTreeSet<&str> {
        self.file_rules
            .values()
            .flat_map(|funcs| funcs.values())
            .flatten()
            .filter_map(|rule| rule.path.as_deref())
            .filter(|p| !p.is_empty())
            .collect()
    }
}

/// Matches the rule corpus against the current dependency graph. Pure
/// with respect to the on-disk state it observes and deterministic under
/// identical inputs.
pub trait RuleMatcher {
    fn match_rules(&self, module: &GoModule, manifest: &Manifest) -> Result<Vec<RuleBundle>>;
}

/// Corpus file name inside the local package cache.
pub const RULE_CORPUS_FILE: &str = "rules.json";

/// Default matcher: a JSON corpus shipped with the probe package cache,
/// filtered to bundles whose target package is part of the build — the
/// main package, the main module itself, or a required dependency.
pub struct CorpusMatcher {
    corpus_path: std::path::PathBuf,
}

impl CorpusMatcher {
    pub fn new(pkg_cache: &Path) -> Self {
        Self {
            corpus_path: pkg_cache.join(RULE_CORPUS_FILE),
        }
    }
}

impl RuleMatcher for CorpusMatcher {
    fn match_rules(&self, module: &GoModule, manifest: &Manifest) -> Result<Vec<RuleBundle>> {
        if !self.corpus_path.is_file() {
            debug!("no rule corpus at {}", self.corpus_path.display());
            return Ok(Vec::new());
        }
        let corpus = load_bundles(&self.corpus_path)?;
        let mut matched: Vec<RuleBundle> = corpus
            .into_iter()
            .filter(|bundle| {
                bundle.import_path == "main"
                    || bundle.import_path == module.name
                    || manifest.has_require(&bundle.import_path)
            })
            .collect();
        matched.sort_by(|a, b| a.import_path.cmp(&b.import_path));
        Ok(matched)
    }
}

/// Rewrite file-scoped rule paths to their absolute local-cache form so
/// the toolexec stage can find them without network access.
pub fn rectify(bundles: &mut [RuleBundle], local_cache: &Path) {
    for bundle in bundles.iter_mut() {
        for funcs in bundle.file_rules.values_mut() {
            for rules in funcs.values_mut() {
                for rule in rules.iter_mut() {
                    if let Some(file) = &rule.file {
                        if !Path::new(file).is_absolute() {
                            rule.file =
                                Some(local_cache.join(file).to_string_lossy().into_owned());
                        }
                    }
                }
            }
        }
    }
}

/// Persist the converged bundle list for the toolexec stage.
pub fn store_bundles(path: &Path, bundles: &[RuleBundle]) -> Result<()> {
    let json = serde_json::to_string_pretty(bundles)?;
    fs::write(path, json).map_err(|e| WeaveError::file_io("write", path, e))
}

/// Load a bundle list (the corpus, or a previously persisted set).
pub fn load_bundles(path: &Path) -> Result<Vec<RuleBundle>> {
    let text = fs::read_to_string(path).map_err(|e| WeaveError::file_io("read", path, e))?;
    Ok(serde_json::from_str(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    pub fn bundle(import_path: &str, hooks: &[&str]) -> RuleBundle {
        let mut funcs = BTreeMap::new();
        funcs.insert(
            "Handle".to_string(),
            hooks
                .iter()
                .enumerate()
                .map(|(i, h)| Rule {
                    name: format!("rule{i}"),
                    path: Some(h.to_string()),
                    file: None,
                })
                .collect(),
        );
        let mut file_rules = BTreeMap::new();
        file_rules.insert("handler.go".to_string(), funcs);
        RuleBundle {
            import_path: import_path.to_string(),
            file_rules,
        }
    }

    #[test]
    fn hook_paths_are_unique_and_sorted() {
        let b = bundle("example.com/dep", &["h/b", "h/a", "h/b"]);
        let hooks: Vec<&str> = b.hook_paths().into_iter().collect();
        assert_eq!(hooks, vec!["h/a", "h/b"]);
    }

    #[test]
    fn store_and_load_round_trip_is_stable() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bundles.json");
        let bundles = vec![bundle("a", &["h/a"]), bundle("b", &["h/b"])];
        store_bundles(&path, &bundles).unwrap();
        let first = fs::read(&path).unwrap();
        assert_eq!(load_bundles(&path).unwrap(), bundles);
        store_bundles(&path, &bundles).unwrap();
        assert_eq!(fs::read(&path).unwrap(), first);
    }

    #[test]
    fn rectify_rewrites_relative_file_rules() {
        let mut bundles = vec![RuleBundle {
            import_path: "example.com/dep".into(),
            file_rules: BTreeMap::from([(
                "db.go".to_string(),
                BTreeMap::from([(
                    "Query".to_string(),
                    vec![Rule {
                        name: "inject".into(),
                        path: None,
                        file: Some("rules/db/inject.go".into()),
                    }],
                )]),
            )]),
        }];
        rectify(&mut bundles, Path::new("/cache"));
        let rule = &bundles[0].file_rules["db.go"]["Query"][0];
        assert_eq!(rule.file.as_deref(), Some("/cache/rules/db/inject.go"));

        // Already-absolute paths are left alone.
        let before = bundles.clone();
        rectify(&mut bundles, Path::new("/elsewhere"));
        assert_eq!(bundles, before);
    }

    #[test]
    fn missing_corpus_matches_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let matcher = CorpusMatcher::new(tmp.path());
        let module = test_module(tmp.path());
        let manifest = test_manifest(tmp.path());
        assert!(matcher.match_rules(&module, &manifest).unwrap().is_empty());
    }

    #[test]
    fn corpus_is_filtered_by_dependency_graph() {
        let tmp = tempfile::tempdir().unwrap();
        let corpus = vec![
            bundle("example.com/app", &["h/app"]),
            bundle("example.com/required", &["h/req"]),
            bundle("example.com/unrelated", &["h/un"]),
            bundle("main", &["h/main"]),
        ];
        store_bundles(&tmp.path().join(RULE_CORPUS_FILE), &corpus).unwrap();

        let matcher = CorpusMatcher::new(tmp.path());
        let module = test_module(tmp.path());
        let manifest = test_manifest(tmp.path());
        let matched = matcher.match_rules(&module, &manifest).unwrap();
        let names: Vec<&str> = matched.iter().map(|b| b.import_path.as_str()).collect();
        assert_eq!(
            names,
            vec!["example.com/app", "example.com/required", "main"]
        );
    }

    fn test_module(dir: &Path) -> GoModule {
        GoModule {
            name: "example.com/app".into(),
            manifest_path: dir.join("go.mod"),
            root_dir: dir.to_path_buf(),
            main_pkg_dir: dir.to_path_buf(),
            bootstrap_path: dir.join("otel_importer.go"),
            vendored: false,
        }
    }

    fn test_manifest(dir: &Path) -> Manifest {
        let path = dir.join("go.mod");
        fs::write(
            &path,
            "module example.com/app\n\nrequire example.com/required v1.2.3\n",
        )
        .unwrap();
        Manifest::parse(&path).unwrap()
    }
}
