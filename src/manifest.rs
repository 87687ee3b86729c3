//! Dependency manifest (go.mod) parsing and additive edits
//!
//! The mutator never rewrites existing entries: edits are an idempotent
//! merge that appends missing `require` and `replace` directives to the
//! original text, so a successful run leaves the manifest byte-identical
//! or additively extended, and applying the same edits twice produces the
//! same bytes as applying them once.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, WeaveError};

/// Manifest file name.
pub const GO_MOD: &str = "go.mod";

/// A requirement or replacement directive to merge into the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEdit {
    pub import_path: String,
    pub version: String,
    pub replace: Option<Replacement>,
}

/// Target of a replace directive. `version` is empty for filesystem paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    pub path: String,
    pub version: String,
}

#[derive(Debug, Clone)]
struct Require {
    path: String,
    #[allow(dead_code)]
    version: String,
}

/// A parsed manifest plus its original text.
#[derive(Debug, Clone)]
pub struct Manifest {
    path: PathBuf,
    text: String,
    module_path: String,
    requires: Vec<Require>,
    replaced: Vec<String>,
    dirty: bool,
}

impl Manifest {
    /// Parse the manifest at `path`.
    pub fn parse(path: &Path) -> Result<Self> {
        let text =
            fs::read_to_string(path).map_err(|e| WeaveError::file_io("read", path, e))?;
        let mut module_path = String::new();
        let mut requires = Vec::new();
        let mut replaced = Vec::new();

        // Block directives look like `require (` ... `)`.
        let mut block: Option<&str> = None;
        for (lineno, raw) in text.lines().enumerate() {
            let line = strip_comment(raw).trim();
            if line.is_empty() {
                continue;
            }
            let mut tokens: Vec<&str> = line.split_whitespace().collect();

            if block.is_some() && tokens[0] == ")" {
                block = None;
                continue;
            }
            let directive = match block {
                Some(d) => d,
                None => {
                    let d = tokens.remove(0);
                    if tokens.first() == Some(&"(") {
                        block = Some(match d {
                            "require" => "require",
                            "replace" => "replace",
                            "exclude" => "exclude",
                            "retract" => "retract",
                            _ => {
                                return Err(parse_err(path, lineno, "unexpected block"));
                            }
                        });
                        continue;
                    }
                    d
                }
            };

            match directive {
                "module" => {
                    if tokens.len() != 1 {
                        return Err(parse_err(path, lineno, "malformed module directive"));
                    }
                    module_path = unquote(tokens[0]).to_string();
                }
                "require" => {
                    if tokens.len() < 2 {
                        return Err(parse_err(path, lineno, "malformed require directive"));
                    }
                    requires.push(Require {
                        path: unquote(tokens[0]).to_string(),
                        version: tokens[1].to_string(),
                    });
                }
                "replace" => {
                    // `old [ver] => new [ver]`; only the old path matters here.
                    if tokens.is_empty() || !line.contains("=>") {
                        return Err(parse_err(path, lineno, "malformed replace directive"));
                    }
                    replaced.push(unquote(tokens[0]).to_string());
                }
                // go/toolchain/exclude/retract carry nothing we track.
                _ => {}
            }
        }

        if module_path.is_empty() {
            return Err(WeaveError::Parse(format!(
                "{}: missing module directive",
                path.display()
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
            text,
            module_path,
            requires,
            replaced,
            dirty: false,
        })
    }

    pub fn module_path(&self) -> &str {
        &self.module_path
    }

    pub fn has_require(&self, import_path: &str) -> bool {
        self.requires.iter().any(|r| r.path == import_path)
    }

    pub fn has_replace(&self, import_path: &str) -> bool {
        self.replaced.iter().any(|p| p == import_path)
    }

    /// Idempotent merge of dependency edits. Returns true when the
    /// manifest text changed.
    pub fn add_dependencies(&mut self, edits: &[DependencyEdit]) -> bool {
        let mut changed = false;
        for edit in edits {
            if !self.has_require(&edit.import_path) {
                self.append_line(&format!("require {} {}", edit.import_path, edit.version));
                self.requires.push(Require {
                    path: edit.import_path.clone(),
                    version: edit.version.clone(),
                });
                debug!("require {} {}", edit.import_path, edit.version);
                changed = true;
            }
            if let Some(replacement) = &edit.replace {
                if !self.has_replace(&edit.import_path) {
                    let target = if replacement.version.is_empty() {
                        replacement.path.clone()
                    } else {
                        format!("{} {}", replacement.path, replacement.version)
                    };
                    self.append_line(&format!("replace {} => {}", edit.import_path, target));
                    self.replaced.push(edit.import_path.clone());
                    debug!("replace {} => {}", edit.import_path, target);
                    changed = true;
                }
            }
        }
        changed
    }

    fn append_line(&mut self, line: &str) {
        if !self.text.is_empty() && !self.text.ends_with('\n') {
            self.text.push('\n');
        }
        self.text.push_str(line);
        self.text.push('\n');
        self.dirty = true;
    }

    /// Write the manifest back, only if an edit changed it.
    pub fn save(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        fs::write(&self.path, &self.text)
            .map_err(|e| WeaveError::file_io("write", &self.path, e))?;
        self.dirty = false;
        Ok(())
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find("//") {
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn unquote(token: &str) -> &str {
    token.trim_matches('"')
}

fn parse_err(path: &Path, lineno: usize, msg: &str) -> WeaveError {
    WeaveError::Parse(format!("{}:{}: {}", path.display(), lineno + 1, msg))
}

/// Find the manifest in `dir` or any parent directory.
pub fn find_upward(dir: &Path) -> Result<PathBuf> {
    let mut cur = Some(dir);
    while let Some(d) = cur {
        let candidate = d.join(GO_MOD);
        if candidate.is_file() {
            return Ok(candidate);
        }
        cur = d.parent();
    }
    Err(WeaveError::Preprocess(format!(
        "cannot find {} from {}",
        GO_MOD,
        dir.display()
    )))
}
