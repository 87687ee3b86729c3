//! Bootstrap source synthesis
//!
//! The bootstrap file is a synthetic `main`-package source unit whose only
//! job is to drag probe and rule-hook packages into the build. It is
//! regenerated from scratch on every emit and never parsed back. Stdlib
//! imports are aliased under reserved names so user-declared identifiers
//! like `log` cannot collide; the blank `unsafe` import enables the
//! linkname mechanism used for cross-package symbol binding.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::{Result, WeaveError};
use crate::manifest::{DependencyEdit, Replacement};
use crate::module_locator::GoModule;
use crate::rules::RuleBundle;

/// Name of the synthesized source file inside the main package directory.
pub const BOOTSTRAP_FILE: &str = "otel_importer.go";

/// Import path of the probe runtime root. Hook packages live beneath it.
pub const PROBE_ROOT: &str = "github.com/goweave/probe";

/// Placeholder version for hook packages served from the local cache.
pub const HOOK_VERSION: &str = "v0.0.0-00010101000000-000000000000";

/// Packages that must be present in every instrumented build, in emission
/// order: linkname support, aliased stdlib for the stack bindings, the
/// probe root, and the tracing SDK roots.
const FIXED_IMPORTS: &[(&str, &str)] = &[
    ("_", "unsafe"),
    ("_otel_debug", "runtime/debug"),
    ("_otel_log", "log"),
    ("_", PROBE_ROOT),
    ("_", "go.opentelemetry.io/otel"),
    ("_", "go.opentelemetry.io/otel/sdk/trace"),
    ("_", "go.opentelemetry.io/otel/baggage"),
];

/// Render the bootstrap source for the current rule set.
pub fn render(bundles: &[RuleBundle]) -> String {
    let mut src = String::from("package main\n");
    for (alias, path) in FIXED_IMPORTS {
        let _ = writeln!(src, "import {} {:?}", alias, path);
    }

    for path in hook_paths(bundles) {
        let _ = writeln!(src, "import _ {:?}", path);
    }

    for (n, bundle) in bundles.iter().enumerate() {
        // Bundles targeting main skip the directives: the symbols are
        // already defined in-module and a second binding would redefine
        // them at link time.
        if bundle.import_path != "main" {
            let _ = writeln!(
                src,
                "//go:linkname getstack_{} {}.OtelGetStackImpl",
                n, bundle.import_path
            );
        }
        let _ = writeln!(src, "var getstack_{} = _otel_debug.Stack", n);
        if bundle.import_path != "main" {
            let _ = writeln!(
                src,
                "//go:linkname printstack_{} {}.OtelPrintStackImpl",
                n, bundle.import_path
            );
        }
        let _ = writeln!(
            src,
            "var printstack_{} = func(bt []byte) {{ _otel_log.Printf(string(bt)) }}",
            n
        );
    }
    src
}

/// Write the bootstrap file and return the dependency edits for the hook
/// packages it imports: a placeholder requirement plus a replace directive
/// into the local cache, since hook packages are not published.
pub fn emit(
    module: &GoModule,
    bundles: &[RuleBundle],
    local_cache: &Path,
) -> Result<Vec<DependencyEdit>> {
    let src = render(bundles);
    fs::write(&module.bootstrap_path, src)
        .map_err(|e| WeaveError::file_io("write", &module.bootstrap_path, e))?;
    debug!(
        "wrote {} ({} bundles)",
        module.bootstrap_path.display(),
        bundles.len()
    );

    let edits = hook_paths(bundles)
        .into_iter()
        .map(|path| {
            let relative = match path.strip_prefix(PROBE_ROOT) {
                Some(rest) if rest.starts_with('/') => &rest[1..],
                _ => path,
            };
            DependencyEdit {
                import_path: path.to_string(),
                version: HOOK_VERSION.to_string(),
                replace: Some(Replacement {
                    path: local_cache.join(relative).to_string_lossy().into_owned(),
                    version: String::new(),
                }),
            }
        })
        .collect();
    Ok(edits)
}

fn hook_paths(bundles: &[RuleBundle]) -> BTreeSet<&str> {
    bundles.iter().flat_map(RuleBundle::hook_paths).collect()
}
