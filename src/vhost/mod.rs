pub mod auth;
pub mod scanner;
pub mod ssl;

use crate::nginx::NginxError;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum VhostError {
    #[error("nginx vhost not found: {0}")]
    NotFound(PathBuf),

    #[error("Malformed vhost config: {0}")]
    Malformed(String),

    #[error("Nginx rejected the vhost config{}: {output}", restored_note(.restored))]
    ValidationFailed { output: String, restored: bool },

    #[error("Failed to reload nginx: {0}")]
    ReloadFailed(String),

    #[error("Failed to access {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

fn restored_note(restored: &bool) -> &'static str {
    if *restored {
        ", previous version restored"
    } else {
        ""
    }
}

/// The slice of nginx a vhost rewrite needs: a config test and a reload.
pub trait NginxService {
    /// Runs `nginx -t`. The error carries the tool's output verbatim.
    fn test_config(&self) -> Result<(), NginxError>;
    fn reload(&self) -> Result<(), NginxError>;
}

/// Output of a single edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edited {
    pub lines: Vec<String>,
    pub changed: bool,
}

/// A transformation of vhost lines that can be chained with others.
pub trait VhostEdit {
    fn name(&self) -> &'static str;

    /// Applies the edit. Errors mean the input lacks what the edit needs.
    fn apply(&self, lines: Vec<String>) -> Result<Edited, VhostError>;
}

/// Enables (with an htpasswd path) or disables basic auth.
pub struct AuthDirectives<'a> {
    htpasswd: Option<&'a str>,
}

impl<'a> AuthDirectives<'a> {
    pub fn enable(htpasswd: &'a str) -> Self {
        Self {
            htpasswd: Some(htpasswd),
        }
    }

    pub fn disable() -> Self {
        Self { htpasswd: None }
    }
}

impl VhostEdit for AuthDirectives<'_> {
    fn name(&self) -> &'static str {
        "auth"
    }

    fn apply(&self, lines: Vec<String>) -> Result<Edited, VhostError> {
        match self.htpasswd {
            Some(htpasswd) => {
                let edit = auth::apply(lines, true, htpasswd);
                if !edit.inserted {
                    return Err(VhostError::Malformed(
                        "no `server_name ...;` directive inside a server block".to_string(),
                    ));
                }
                Ok(Edited {
                    lines: edit.lines,
                    changed: true,
                })
            }
            None => {
                let edit = auth::apply(lines, false, "");
                Ok(Edited {
                    lines: edit.lines,
                    changed: edit.existed,
                })
            }
        }
    }
}

pub struct StripSsl;

impl VhostEdit for StripSsl {
    fn name(&self) -> &'static str {
        "strip-ssl"
    }

    fn apply(&self, lines: Vec<String>) -> Result<Edited, VhostError> {
        let before = lines.len();
        let lines = ssl::strip(lines);
        let changed = lines.len() != before;
        Ok(Edited { lines, changed })
    }
}

pub struct FixSslDocroot<'a> {
    pub webroot: &'a str,
}

impl VhostEdit for FixSslDocroot<'_> {
    fn name(&self) -> &'static str {
        "ssl-docroot"
    }

    fn apply(&self, lines: Vec<String>) -> Result<Edited, VhostError> {
        let (lines, changed) = ssl::fix_docroot(lines, self.webroot);
        Ok(Edited { lines, changed })
    }
}

pub struct EnhanceSsl;

impl VhostEdit for EnhanceSsl {
    fn name(&self) -> &'static str {
        "ssl-enhance"
    }

    fn apply(&self, lines: Vec<String>) -> Result<Edited, VhostError> {
        let (lines, changed) = ssl::enhance(lines);
        Ok(Edited { lines, changed })
    }
}

/// Result of running a sequence of edits over a vhost file.
#[derive(Debug)]
pub struct Mutation {
    previous: String,
    /// Whether the file on disk was rewritten.
    pub written: bool,
    pub applied: Vec<(&'static str, bool)>,
}

impl Mutation {
    pub fn changed(&self, edit: &str) -> bool {
        self.applied
            .iter()
            .any(|(name, changed)| *name == edit && *changed)
    }
}

/// The `<domain>.conf` file under sites-available.
#[derive(Debug, Clone)]
pub struct VhostFile {
    path: PathBuf,
}

impl VhostFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn for_domain(sites_available: &Path, domain: &str) -> Self {
        Self::new(sites_available.join(format!("{}.conf", domain)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn read(&self) -> Result<String, VhostError> {
        if !self.exists() {
            return Err(VhostError::NotFound(self.path.clone()));
        }
        fs::read_to_string(&self.path).map_err(|source| self.io_error(source))
    }

    pub fn read_lines(&self) -> Result<Vec<String>, VhostError> {
        Ok(self.read()?.lines().map(str::to_string).collect())
    }

    /// Reads the file fresh, runs `edits` in order and writes the result back
    /// when it differs from what was read.
    pub fn mutate(&self, edits: &[&dyn VhostEdit]) -> Result<Mutation, VhostError> {
        let previous = self.read()?;
        let original: Vec<String> = previous.lines().map(str::to_string).collect();

        let mut lines = original.clone();
        let mut applied = Vec::with_capacity(edits.len());
        for edit in edits {
            let edited = edit.apply(lines)?;
            debug!(edit = edit.name(), changed = edited.changed, "applied vhost edit");
            applied.push((edit.name(), edited.changed));
            lines = edited.lines;
        }

        let written = lines != original;
        if written {
            let mut content = lines.join("\n");
            content.push('\n');
            self.replace(&content)?;
            debug!(path = %self.path.display(), "vhost rewritten");
        }

        Ok(Mutation {
            previous,
            written,
            applied,
        })
    }

    /// Mutates the file, then tests and reloads nginx.
    ///
    /// A failed config test restores the previous text before returning, so
    /// neither the file nor the running nginx keep the rejected version.
    pub fn commit(
        &self,
        nginx: &dyn NginxService,
        edits: &[&dyn VhostEdit],
    ) -> Result<Mutation, VhostError> {
        let mutation = self.mutate(edits)?;

        if let Err(e) = nginx.test_config() {
            if mutation.written {
                self.replace(&mutation.previous)?;
                info!(path = %self.path.display(), "rejected vhost rolled back");
            }
            return Err(VhostError::ValidationFailed {
                output: e.to_string(),
                restored: mutation.written,
            });
        }

        nginx
            .reload()
            .map_err(|e| VhostError::ReloadFailed(e.to_string()))?;

        let changed: Vec<&str> = mutation
            .applied
            .iter()
            .filter(|(_, changed)| *changed)
            .map(|(name, _)| *name)
            .collect();
        info!(
            path = %self.path.display(),
            written = mutation.written,
            edits = ?changed,
            "vhost committed"
        );

        Ok(mutation)
    }

    /// Atomically replaces the file contents: a temp file in the same
    /// directory is renamed over the target, or discarded on any failure.
    pub fn replace(&self, content: &str) -> Result<(), VhostError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut temp = NamedTempFile::new_in(dir).map_err(|e| self.io_error(e))?;
        temp.write_all(content.as_bytes())
            .map_err(|e| self.io_error(e))?;
        if let Ok(metadata) = fs::metadata(&self.path) {
            temp.as_file()
                .set_permissions(metadata.permissions())
                .map_err(|e| self.io_error(e))?;
        }
        temp.persist(&self.path)
            .map_err(|e| self.io_error(e.error))?;

        Ok(())
    }

    fn io_error(&self, source: io::Error) -> VhostError {
        VhostError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
