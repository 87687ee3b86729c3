//! End-to-end preprocess scenarios against the scripted fake driver:
//! trivial builds, matched rules, vendored modules, failure restoration,
//! and debug-mode artifact preservation.

use std::fs;

use goweave::bootstrap::PROBE_ROOT;
use goweave::rules::load_bundles;
use predicates::prelude::*;

mod utils;
use utils::{goweave, DriverOptions, FakeBuild};

#[test]
fn trivial_build_without_rules() {
    let fb = FakeBuild::new(DriverOptions::default());
    goweave(&fb).arg(&fb.driver).arg("build").assert().success();

    // The bootstrap existed during preprocess and is gone at exit.
    assert!(fb.bootstrap_marker.exists());
    assert!(!fb.bootstrap_path().exists());

    // While the loop ran, the manifest carried the probe root; at exit it
    // is byte-identical to the original.
    let seen = fs::read_to_string(&fb.manifest_snapshot).unwrap();
    assert!(seen.starts_with(utils::GO_MOD_TEXT));
    assert!(seen.contains(&format!(
        "require {PROBE_ROOT} v0.0.0-00010101000000-000000000000"
    )));
    assert!(seen.contains(&format!("replace {PROBE_ROOT} => ")));
    assert_eq!(fb.go_mod(), utils::GO_MOD_TEXT);

    // Bootstrap content: fixed imports only, no bindings.
    let importer = fs::read_to_string(&fb.bootstrap_snapshot).unwrap();
    assert!(importer.starts_with("package main\n"));
    assert!(importer.contains(&format!("import _ {PROBE_ROOT:?}")));
    assert!(importer.contains("import _otel_debug \"runtime/debug\""));
    assert!(!importer.contains("go:linkname"));

    // Empty converged rule set is still persisted for the next stage.
    let bundles = load_bundles(&fb.state_dir().join("rule_bundles.json")).unwrap();
    assert!(bundles.is_empty());

    // Dry run log was captured and scanned.
    let dry = fs::read_to_string(fb.state_dir().join("dry_run.log")).unwrap();
    assert!(dry.contains("compile -o"));

    let calls = fb.driver_calls();
    assert!(calls.contains("list -json ."));
    assert_eq!(calls.matches("mod tidy").count(), 3);
    assert!(!calls.contains("mod vendor"));
    assert!(calls.contains("build -a -x -n"));
    assert!(calls.contains("-toolexec="));
    assert!(calls.contains("-work -a"));
    // The final build ran against the isolated cache.
    assert!(calls.contains(".goweave/gocache"));
}

#[test]
fn matched_rule_binds_symbols_and_replaces_hook_package() {
    let fb = FakeBuild::new(DriverOptions::default());
    let hook = format!("{PROBE_ROOT}/rules/demo");
    fb.write_corpus(&format!(
        r#"[{{"import_path":"example.com/dep","file_rules":{{"db.go":{{"Query":[{{"name":"dep-hook","path":"{hook}"}}]}}}}}}]"#
    ));

    goweave(&fb).arg(&fb.driver).arg("build").assert().success();

    let importer = fs::read_to_string(&fb.bootstrap_snapshot).unwrap();
    assert!(importer.contains(&format!("import _ {hook:?}")));
    assert!(importer.contains("//go:linkname getstack_0 example.com/dep.OtelGetStackImpl"));
    assert!(importer.contains("//go:linkname printstack_0 example.com/dep.OtelPrintStackImpl"));
    assert!(importer.contains("var getstack_0 = _otel_debug.Stack"));

    let seen = fs::read_to_string(&fb.manifest_snapshot).unwrap();
    assert!(seen.contains(&format!(
        "require {hook} v0.0.0-00010101000000-000000000000"
    )));
    assert!(seen.contains(&format!("replace {hook} => ")));
    assert!(seen.contains("rules/demo"));

    let bundles = load_bundles(&fb.state_dir().join("rule_bundles.json")).unwrap();
    assert_eq!(bundles.len(), 1);
    assert_eq!(bundles[0].import_path, "example.com/dep");

    // Additive only while live, restored at exit.
    assert_eq!(fb.go_mod(), utils::GO_MOD_TEXT);
}

#[test]
fn rule_targeting_main_omits_linkname_directives() {
    let fb = FakeBuild::new(DriverOptions::default());
    fb.write_corpus(
        r#"[{"import_path":"main","file_rules":{"main.go":{"main":[{"name":"main-hook","path":"github.com/goweave/probe/rules/entry"}]}}}]"#,
    );

    goweave(&fb).arg(&fb.driver).arg("build").assert().success();

    let importer = fs::read_to_string(&fb.bootstrap_snapshot).unwrap();
    assert!(importer.contains("import _ \"github.com/goweave/probe/rules/entry\""));
    assert!(!importer.contains("go:linkname"));
    assert!(importer.contains("var getstack_0 = _otel_debug.Stack"));
}

#[test]
fn vendored_module_refreshes_vendor_tree() {
    let fb = FakeBuild::new(DriverOptions::default());
    fs::create_dir_all(fb.mod_dir.join("vendor")).unwrap();

    goweave(&fb).arg(&fb.driver).arg("build").assert().success();

    let calls = fb.driver_calls();
    assert_eq!(calls.matches("mod vendor").count(), 3);
}

#[test]
fn mod_flag_overrides_vendor_directory() {
    let fb = FakeBuild::new(DriverOptions::default());
    fs::create_dir_all(fb.mod_dir.join("vendor")).unwrap();

    goweave(&fb)
        .arg(&fb.driver)
        .args(["build", "-mod=mod"])
        .assert()
        .success();
    assert!(!fb.driver_calls().contains("mod vendor"));
}

#[test]
fn vendor_failure_aborts_and_restores() {
    let fb = FakeBuild::new(DriverOptions {
        fail_vendor: true,
        ..DriverOptions::default()
    });
    fs::create_dir_all(fb.mod_dir.join("vendor")).unwrap();

    goweave(&fb)
        .arg(&fb.driver)
        .arg("build")
        .assert()
        .code(6)
        .stderr(predicate::str::contains("unresolved dependency"));

    // Warden guarantee: failing runs leave the tree byte-identical.
    assert_eq!(fb.go_mod(), utils::GO_MOD_TEXT);
    assert!(!fb.bootstrap_path().exists());
    // The failure happened before the final build.
    assert!(!fb.driver_calls().contains("-toolexec="));
}

#[test]
fn persisted_rules_are_deterministic_across_runs() {
    let fb = FakeBuild::new(DriverOptions::default());
    fb.write_corpus(&format!(
        r#"[{{"import_path":"example.com/dep","file_rules":{{"db.go":{{"Query":[{{"name":"dep-hook","path":"{PROBE_ROOT}/rules/demo"}}]}}}}}},{{"import_path":"main","file_rules":{{"main.go":{{"main":[{{"name":"m","path":"{PROBE_ROOT}/rules/entry"}}]}}}}}}]"#
    ));

    goweave(&fb).arg(&fb.driver).arg("build").assert().success();
    let first = fs::read(fb.state_dir().join("rule_bundles.json")).unwrap();

    goweave(&fb).arg(&fb.driver).arg("build").assert().success();
    let second = fs::read(fb.state_dir().join("rule_bundles.json")).unwrap();

    assert_eq!(first, second);
}

#[test]
fn debug_mode_keeps_artifacts_and_snapshots() {
    let fb = FakeBuild::new(DriverOptions::default());
    goweave(&fb)
        .arg(&fb.driver)
        .arg("build")
        .env("GOWEAVE_DEBUG", "1")
        .assert()
        .success();

    // No restoration: the manifest keeps its additive edits and the
    // bootstrap survives for inspection.
    assert!(fb.bootstrap_path().exists());
    assert!(fb.go_mod().contains(PROBE_ROOT));
    let changed = fb.state_dir().join("changed");
    assert!(changed.join("go.mod").is_file());
    assert!(changed.join("otel_importer.go").is_file());

    // Debug builds disable optimizations in the final build.
    assert!(fb.driver_calls().contains("-gcflags=all=-N -l"));
}
