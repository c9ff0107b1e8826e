use super::ssl::apply_ssl_edits;
use crate::certbot::Certbot;
use crate::config::Config;
use crate::exec::Runner;
use crate::nginx::NginxManager;
use crate::output;
use crate::vhost::scanner::{self, ServerBlock};
use crate::vhost::{auth, AuthDirectives, NginxService, VhostFile};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub fn create(config: &Config, runner: &Runner, domain: &str) -> Result<()> {
    output::section(format!("Nginx vhost for {}", domain));

    let docroot = config.default_docroot(domain);
    if !docroot.is_dir() {
        output::log(format!("Creating document root {}", docroot.display()));
        fs::create_dir_all(&docroot)
            .with_context(|| format!("failed to create {}", docroot.display()))?;
    }

    let vhost = regenerate(config, runner, domain, &docroot, &config.php_version)?;

    let certbot = Certbot::new(runner, &config.letsencrypt_live);
    if certbot.has_certificate(domain) {
        output::log("Existing SSL certificate found, reinstalling...");
        certbot.install_to_nginx(domain)?;
        apply_ssl_edits(config, &NginxManager::new(runner, config), domain)?;
    }

    output::ok(format!("Vhost ready: {}", vhost.path().display()));
    Ok(())
}

/// Rewrites the vhost from the template, then puts basic auth back when the
/// site still has a password file. nginx is tested and reloaded either way.
pub(super) fn regenerate(
    config: &Config,
    runner: &Runner,
    domain: &str,
    docroot: &Path,
    php_version: &str,
) -> Result<VhostFile> {
    let nginx = NginxManager::new(runner, config);
    nginx.ensure_snippets(php_version)?;
    let vhost = nginx.create_vhost(domain, docroot, php_version)?;
    info!(domain, docroot = %docroot.display(), php_version, "vhost regenerated from template");

    restore_auth(config, &nginx, &vhost, domain)?;
    Ok(vhost)
}

fn restore_auth(
    config: &Config,
    nginx: &dyn NginxService,
    vhost: &VhostFile,
    domain: &str,
) -> Result<()> {
    let htpasswd = config.htpasswd_path(domain);
    if !htpasswd.is_file() {
        nginx.test_config()?;
        nginx.reload()?;
        return Ok(());
    }

    let htpasswd = htpasswd.to_string_lossy();
    vhost
        .commit(nginx, &[&AuthDirectives::enable(&htpasswd)])
        .context("failed to re-apply basic authentication")?;
    output::fix("Basic authentication re-applied to the vhost");
    Ok(())
}

/// The document root the site serves from its vhost lines, or the default
/// site layout when no block declares one.
pub(super) fn site_docroot(config: &Config, domain: &str, lines: &[String]) -> PathBuf {
    scanner::site_document_root(lines)
        .map(PathBuf::from)
        .unwrap_or_else(|| config.default_docroot(domain))
}

pub fn show(config: &Config, domain: &str) -> Result<()> {
    output::section(format!("Nginx vhost for {}", domain));

    let vhost = config.vhost(domain);
    let lines = vhost.read_lines()?;
    println!("File: {}", vhost.path().display());

    let blocks = scanner::server_blocks(&lines);
    if blocks.is_empty() {
        output::warn("No server blocks found");
    }
    for (n, block) in blocks.iter().enumerate() {
        println!("{}", describe_block(n + 1, block));
    }

    println!();
    if auth::has_auth(&lines) {
        output::ok("Basic authentication: enabled");
    } else {
        output::skip("Basic authentication: disabled");
    }

    if scanner::ssl_spans(&lines).is_empty() {
        output::skip("HTTPS: not configured");
    } else {
        output::ok("HTTPS: configured");
    }

    Ok(())
}

fn describe_block(n: usize, block: &ServerBlock) -> String {
    let mut ports = block.ports.clone();
    ports.sort_unstable();
    ports.dedup();
    let ports = ports
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "  server #{} (lines {}-{}): listen {}; root {}",
        n,
        block.start + 1,
        block.end + 1,
        if ports.is_empty() { "-" } else { ports.as_str() },
        block.root.as_deref().unwrap_or("-"),
    )
}
