//! Preprocess pipeline
//!
//! Instrumentation rules may introduce dependencies the original source
//! does not carry; this stage prepares them before any rewriting happens.
//! The driver is strictly sequential: locate the module, run the dry
//! build, rectify the manifest, converge the rule set, persist it, then
//! hand off to the toolexec build. Cleanup runs on every exit path.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info};

use crate::backup::Warden;
use crate::bootstrap::{self, HOOK_VERSION, PROBE_ROOT};
use crate::cli::BuildInvocation;
use crate::config::{Config, StateDir};
use crate::dry_run;
use crate::error::{Result, WeaveError};
use crate::manifest::{DependencyEdit, Manifest, Replacement};
use crate::module_locator::{self, GoModule};
use crate::process::Cmd;
use crate::rules::{self, CorpusMatcher, RuleBundle, RuleMatcher};
use crate::signals::{self, CleanupTask};
use crate::timing::PhaseTimer;
use crate::toolexec;

/// Number of bootstrap emits in the convergence loop. Phase 0 seeds the
/// probe roots, the two matches discover first- and second-order rules,
/// and the final emit fixes the bootstrap to the converged set. This is a
/// design contract of the rule corpus, not a discovered fixpoint: deeper
/// cascades are unsupported.
const CONVERGENCE_EMITS: usize = 3;

pub struct Preprocessor {
    invocation: BuildInvocation,
    module: GoModule,
    config: Config,
    state: StateDir,
    warden: Warden,
    local_cache: PathBuf,
}

impl Preprocessor {
    /// Resolve the module, the local package cache, and install the
    /// signal listener. Nothing is mutated yet when this returns.
    pub fn init(mut invocation: BuildInvocation, config: Config) -> Result<Self> {
        let cwd = env::current_dir()
            .map_err(|e| WeaveError::file_io("resolve", Path::new("."), e))?;
        let state = StateDir::open(&cwd)?;
        let module = module_locator::locate(&mut invocation)?;
        let local_cache = config.pkg_cache_dir(&state)?;
        let warden = Warden::new(&state);
        signals::install(CleanupTask {
            warden: warden.clone(),
            bootstrap: module.bootstrap_path.clone(),
            debug: config.debug,
        })?;
        info!(
            "located module {} (manifest {}, vendored: {})",
            module.name,
            module.manifest_path.display(),
            module.vendored
        );
        Ok(Self {
            invocation,
            module,
            config,
            state,
            warden,
            local_cache,
        })
    }

    pub fn local_cache(&self) -> &Path {
        &self.local_cache
    }

    pub fn module(&self) -> &GoModule {
        &self.module
    }

    /// Run both stages, guaranteeing cleanup on success and failure.
    pub fn run(self, matcher: &dyn RuleMatcher) -> Result<()> {
        let result = self.pipeline(matcher);
        self.post_process();
        result
    }

    fn pipeline(&self, matcher: &dyn RuleMatcher) -> Result<()> {
        {
            let timer = PhaseTimer::start("preprocess");
            let commands = dry_run::run(&self.invocation, &self.state)?;
            debug!("{} compile commands recorded", commands.len());

            self.rectify_manifest()?;
            let mut bundles = self.converge(matcher)?;

            // From this point on the rules are fixed.
            rules::rectify(&mut bundles, &self.local_cache);
            rules::store_bundles(&self.state.rule_bundles(), &bundles)?;
            timer.finish();
        }
        {
            let timer = PhaseTimer::start("instrument");
            toolexec::run_instrumented_build(&self.invocation, &self.config, &self.state)?;
            timer.finish();
        }
        info!("build completed successfully");
        Ok(())
    }

    /// The probe root is imported by generated code but not published;
    /// point the resolver at the local cache before the first refresh.
    fn rectify_manifest(&self) -> Result<()> {
        self.warden.backup(&self.module.manifest_path)?;
        let mut manifest = Manifest::parse(&self.module.manifest_path)?;
        manifest.add_dependencies(&[DependencyEdit {
            import_path: PROBE_ROOT.into(),
            version: HOOK_VERSION.into(),
            replace: Some(Replacement {
                path: self.local_cache.to_string_lossy().into_owned(),
                version: String::new(),
            }),
        }]);
        manifest.save()
    }

    /// Three emits, two matches. The first emit seeds the probe roots so
    /// the graph resolves; each match may perturb the graph through new
    /// hook imports, so the following emit and refresh re-stabilize it.
    fn converge(&self, matcher: &dyn RuleMatcher) -> Result<Vec<RuleBundle>> {
        let mut bundles: Vec<RuleBundle> = Vec::new();
        for phase in 0..CONVERGENCE_EMITS {
            self.emit_bootstrap(&bundles)?;
            self.refresh_deps()?;
            if phase == CONVERGENCE_EMITS - 1 {
                break;
            }
            let manifest = Manifest::parse(&self.module.manifest_path)?;
            bundles = matcher.match_rules(&self.module, &manifest)?;
            debug!("phase {}: matched {} rule bundles", phase, bundles.len());
        }
        Ok(bundles)
    }

    /// Rewrite the bootstrap for the current rule set and merge the hook
    /// package edits into the manifest.
    fn emit_bootstrap(&self, bundles: &[RuleBundle]) -> Result<()> {
        let edits = bootstrap::emit(&self.module, bundles, &self.local_cache)?;
        if edits.is_empty() {
            return Ok(());
        }
        self.warden.backup(&self.module.manifest_path)?;
        let mut manifest = Manifest::parse(&self.module.manifest_path)?;
        manifest.add_dependencies(&edits);
        manifest.save()
    }

    /// Tidy after every emit; vendored builds must also repopulate the
    /// vendor tree, from which all new dependencies must be satisfiable.
    fn refresh_deps(&self) -> Result<()> {
        self.run_mod("tidy")?;
        if self.module.vendored {
            self.run_mod("vendor")?;
        }
        Ok(())
    }

    fn run_mod(&self, subcommand: &str) -> Result<()> {
        let out = Cmd::new(&self.invocation.driver)
            .args(["mod", subcommand])
            .dir(&self.module.root_dir)
            .run_captured()?;
        debug!("go mod {}: {}", subcommand, out.trim());
        Ok(())
    }

    /// Runs on every exit: remove the bootstrap and restore all backups,
    /// or keep everything (plus snapshots) when debugging.
    fn post_process(&self) {
        if self.config.debug {
            self.warden.snapshot_changed(&[&self.module.bootstrap_path]);
            return;
        }
        let _ = fs::remove_file(&self.module.bootstrap_path);
        if let Err(err) = self.warden.restore_all() {
            error!("restore failed: {err}");
        }
    }
}

/// Entry point for an instrumented build invocation.
pub fn run(invocation: BuildInvocation, config: Config) -> Result<()> {
    let preprocessor = Preprocessor::init(invocation, config)?;
    let matcher = CorpusMatcher::new(preprocessor.local_cache());
    preprocessor.run(&matcher)
}
