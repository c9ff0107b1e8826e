use super::confirm;
use super::ssl::apply_ssl_edits;
use super::vhost::{regenerate, site_docroot};
use crate::certbot::Certbot;
use crate::config::{is_php_version, Config};
use crate::exec::Runner;
use crate::nginx::NginxManager;
use crate::output;
use crate::php::{fpm_service, Php};
use crate::vhost::scanner;
use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use tracing::info;

/// What a version switch starts from, read off the current vhost.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SiteState {
    current: Option<String>,
    docroot: PathBuf,
}

impl SiteState {
    fn read(config: &Config, domain: &str, lines: &[String]) -> Self {
        Self {
            current: scanner::php_version(lines),
            docroot: site_docroot(config, domain, lines),
        }
    }
}

/// Moves a site to another PHP-FPM version: packages, pool, vhost, then the
/// HTTPS side when a certificate exists. The old pool goes last so the site
/// keeps serving if anything before it fails.
pub fn update(
    config: &Config,
    runner: &Runner,
    domain: &str,
    version: &str,
    assume_yes: bool,
) -> Result<()> {
    output::section(format!("PHP Version Update for {}", domain));

    let version = version.trim();
    if !is_php_version(version) {
        bail!("invalid PHP version '{}' (expected MAJOR.MINOR, e.g. 8.4)", version);
    }

    let lines = config
        .vhost(domain)
        .read_lines()
        .with_context(|| format!("site not configured: {}", domain))?;
    let state = SiteState::read(config, domain, &lines);

    output::log(format!(
        "Current PHP version: {}",
        state.current.as_deref().unwrap_or("unknown")
    ));
    output::log(format!("New PHP version: {}", version));
    output::log(format!("Webroot: {}", state.docroot.display()));

    if state.current.as_deref() == Some(version) {
        output::skip(format!("{} is already using PHP {}", domain, version));
        return Ok(());
    }

    let prompt = format!(
        "Switch {} from PHP {} to PHP {}?",
        domain,
        state.current.as_deref().unwrap_or("unknown"),
        version
    );
    if !confirm(&prompt, assume_yes)? {
        output::skip("PHP update cancelled");
        return Ok(());
    }

    output::section(format!("Installing PHP {}", version));
    let php = Php::new(runner, &config.php_dir, &config.php_run_dir);
    php.install(version)?;

    output::section("Creating PHP-FPM Pool");
    php.create_pool(domain, version, &state.docroot)?;

    output::section("Updating Nginx Configuration");
    regenerate(config, runner, domain, &state.docroot, version)?;
    info!(domain, version, "vhost switched to new php-fpm");

    let certbot = Certbot::new(runner, &config.letsencrypt_live);
    if certbot.has_certificate(domain) {
        output::section("Restoring SSL Configuration");
        match certbot.install_to_nginx(domain) {
            Ok(()) => apply_ssl_edits(config, &NginxManager::new(runner, config), domain)?,
            Err(e) => {
                output::warn(format!("Failed to reconfigure SSL: {}", e));
                output::warn(format!(
                    "You may need to run manually: certbot install --nginx -d {} --cert-name {} --redirect",
                    domain, domain
                ));
            }
        }
    }

    if let Some(old) = state.current.as_deref() {
        output::section("Cleaning Up Old PHP Pool");
        match php.remove_pool(domain, old) {
            Ok(true) => output::ok(format!("Old PHP {} pool removed", old)),
            Ok(false) => output::skip(format!("No PHP {} pool for {}", old, domain)),
            Err(e) => output::warn(format!("Failed to remove old pool: {}", e)),
        }
    }

    output::ok("PHP update complete");
    println!();
    println!("Domain: {}", domain);
    println!(
        "Old PHP version: {}",
        state.current.as_deref().unwrap_or("unknown")
    );
    println!("New PHP version: {}", version);
    println!(
        "PHP-FPM logs: /var/log/php{}-fpm-{}-error.log ({})",
        version,
        domain,
        fpm_service(version)
    );

    Ok(())
}
