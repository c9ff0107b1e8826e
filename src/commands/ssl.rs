use super::value_or_prompt;
use super::vhost::{regenerate, site_docroot};
use crate::certbot::Certbot;
use crate::config::Config;
use crate::exec::Runner;
use crate::nginx::NginxManager;
use crate::output;
use crate::vhost::{scanner, ssl, EnhanceSsl, FixSslDocroot, NginxService, StripSsl};
use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use tracing::info;

pub enum SslAction<'a> {
    Enable { email: Option<&'a str> },
    Disable,
    Renew,
    Check,
}

pub fn run(config: &Config, runner: &Runner, domain: &str, action: SslAction) -> Result<()> {
    output::section(format!("SSL Management for {}", domain));

    let certbot = Certbot::new(runner, &config.letsencrypt_live);
    certbot.install()?;

    match action {
        SslAction::Enable { email } => enable(config, runner, &certbot, domain, email),
        SslAction::Disable => disable(config, runner, &certbot, domain),
        SslAction::Renew => renew(config, runner, &certbot, domain),
        SslAction::Check => check(&certbot, domain),
    }
}

fn enable(
    config: &Config,
    runner: &Runner,
    certbot: &Certbot,
    domain: &str,
    email: Option<&str>,
) -> Result<()> {
    output::section("Enabling SSL");

    let vhost = config.vhost(domain);
    if !vhost.exists() {
        bail!("nginx vhost not found: {}", vhost.path().display());
    }

    if certbot.has_certificate(domain) {
        output::warn(format!("SSL certificate already exists for {}", domain));
        output::log("Reconfiguring nginx with existing certificate...");
    } else {
        let email = value_or_prompt(
            email.or(config.le_email.as_deref()),
            "Email address for Let's Encrypt notifications",
        )?;
        certbot.obtain_certificate(domain, &email)?;
    }

    certbot.install_to_nginx(domain)?;
    info!(domain, "certificate installed into nginx");

    let nginx = NginxManager::new(runner, config);
    apply_ssl_edits(config, &nginx, domain)?;

    if let Err(e) = certbot.setup_auto_renewal() {
        output::warn(format!("Failed to setup auto-renewal: {}", e));
    }

    output::ok(format!("SSL enabled for {}", domain));
    println!();
    println!("Your site is now available at https://{}", domain);

    Ok(())
}

fn disable(config: &Config, runner: &Runner, certbot: &Certbot, domain: &str) -> Result<()> {
    output::section("Disabling SSL");

    if !certbot.has_certificate(domain) {
        output::warn(format!("No SSL certificate found for {}", domain));
        return Ok(());
    }

    output::log("Removing SSL configuration from nginx...");
    let vhost = config.vhost(domain);
    let lines = vhost.read_lines()?;

    if strip_loses_site(&lines) {
        // certbot moved the site into the 443 block; stripping it would leave
        // only the redirect stub
        output::fix("Site is served from the HTTPS block, regenerating the HTTP vhost");
        let docroot = site_docroot(config, domain, &lines);
        let php_version =
            scanner::php_version(&lines).unwrap_or_else(|| config.php_version.clone());
        info!(domain, docroot = %docroot.display(), %php_version, "regenerating vhost without SSL");
        regenerate(config, runner, domain, &docroot, &php_version)?;
    } else {
        let nginx = NginxManager::new(runner, config);
        let mutation = vhost.commit(&nginx, &[&StripSsl])?;
        if !mutation.written {
            output::skip("No SSL server block found in nginx configuration");
        }
    }

    output::ok(format!("SSL disabled for {}", domain));
    output::warn(format!(
        "Certificate files remain in {}",
        config.letsencrypt_live.join(domain).display()
    ));
    println!("To re-enable SSL, run: svp ssl enable {}", domain);
    println!();
    println!("Your site is now available at http://{}", domain);

    Ok(())
}

fn renew(config: &Config, runner: &Runner, certbot: &Certbot, domain: &str) -> Result<()> {
    output::section("Renewing SSL Certificate");

    certbot.renew(domain)?;
    info!(domain, "certificate renewed");

    let nginx = NginxManager::new(runner, config);
    nginx.test_config()?;
    nginx.reload()?;

    output::ok(format!("SSL certificate renewed for {}", domain));
    check(certbot, domain)
}

fn check(certbot: &Certbot, domain: &str) -> Result<()> {
    output::section("SSL Certificate Status");

    if !certbot.has_certificate(domain) {
        output::warn(format!("No SSL certificate found for {}", domain));
        println!();
        println!(
            "To enable SSL, run: svp ssl enable {} --email your@email.com",
            domain
        );
        return Ok(());
    }

    output::ok(format!("SSL certificate found for {}", domain));

    output::log("Certificate details:");
    match certbot.certificate_details(domain) {
        Ok(info) => {
            let fields = [
                ("Expiry", info.expiry),
                ("Subject", info.subject),
                ("Issuer", info.issuer),
            ];
            for (label, value) in fields {
                if let Some(value) = value {
                    println!("  {}: {}", label, value);
                }
            }
        }
        Err(e) => output::warn(e),
    }

    output::log("Certbot certificate information:");
    match certbot.summary(domain) {
        Ok(summary) => println!("{}", summary.trim_end()),
        Err(e) => output::warn(e),
    }

    Ok(())
}

/// Points the HTTPS block at the site's document root and adds stapling and
/// HSTS, then tests and reloads nginx. A rejected edit is only a warning:
/// the certbot-written config still goes live.
pub(super) fn apply_ssl_edits(
    config: &Config,
    nginx: &dyn NginxService,
    domain: &str,
) -> Result<()> {
    let webroot = docroot_for(config, domain)?;
    let webroot = webroot.to_string_lossy();
    let fix = FixSslDocroot { webroot: &webroot };
    let vhost = config.vhost(domain);

    match vhost.commit(nginx, &[&fix, &EnhanceSsl]) {
        Ok(mutation) => {
            if mutation.changed("ssl-docroot") {
                output::fix(format!("SSL document root set to {}", webroot));
            }
            if mutation.changed("ssl-enhance") {
                output::ok("SSL configuration enhanced (OCSP stapling, HSTS)");
            } else if ssl::is_enhanced(&vhost.read_lines()?) {
                output::verify("SSL configuration already enhanced");
            } else {
                output::skip("No ssl_certificate_key directive to enhance");
            }
        }
        Err(e) => {
            output::warn(format!("Failed to adjust SSL config: {}", e));
            nginx.test_config()?;
            nginx.reload()?;
        }
    }

    Ok(())
}

/// Document root the HTTPS block should serve.
fn docroot_for(config: &Config, domain: &str) -> Result<PathBuf> {
    let lines = config
        .vhost(domain)
        .read_lines()
        .context("failed to read vhost config")?;

    Ok(site_docroot(config, domain, &lines))
}

/// Whether removing the port-443 blocks would leave no plain-HTTP block
/// serving the site, as with certbot's `--redirect` layout.
fn strip_loses_site(lines: &[String]) -> bool {
    !scanner::ssl_spans(lines).is_empty()
        && scanner::http_document_root(&ssl::strip(lines.to_vec())).is_none()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vhost::scanner::tests::{to_lines, CERTBOT_MERGED, HTTP_AND_HTTPS};
    use crate::vhost::tests::FakeNginx;
    use std::fs;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> Config {
        let root = dir.path().to_path_buf();
        Config::from_lookup(|key| match key {
            "SVP_SITES_AVAILABLE" => Some(root.display().to_string()),
            "SVP_WEBROOT" => Some("/srv/www".to_string()),
            _ => None,
        })
        .unwrap()
    }

    #[test]
    fn test_docroot_from_http_block() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        fs::write(
            config.vhost("example.com").path(),
            "server {\n    listen 80;\n    root /srv/custom/public;\n}\n",
        )
        .unwrap();

        assert_eq!(
            docroot_for(&config, "example.com").unwrap(),
            PathBuf::from("/srv/custom/public")
        );
    }

    #[test]
    fn test_docroot_from_merged_https_block() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        fs::write(
            config.vhost("example.com").path(),
            "server {\n    listen 443 ssl;\n    root /srv/https-only;\n}\n",
        )
        .unwrap();

        assert_eq!(
            docroot_for(&config, "example.com").unwrap(),
            PathBuf::from("/srv/https-only")
        );
    }

    #[test]
    fn test_docroot_falls_back_to_site_layout() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        fs::write(
            config.vhost("example.com").path(),
            "server {\n    listen 443 ssl;\n    server_name example.com;\n}\n",
        )
        .unwrap();

        assert_eq!(
            docroot_for(&config, "example.com").unwrap(),
            PathBuf::from("/srv/www/example.com/web")
        );
    }

    #[test]
    fn test_strip_loses_site_on_certbot_layout() {
        let merged = to_lines(CERTBOT_MERGED);
        assert!(strip_loses_site(&merged));

        // stripping alone keeps only the redirect stub
        let stripped = ssl::strip(merged);
        assert!(stripped.iter().any(|line| line.contains("return 404;")));
        assert!(!stripped.iter().any(|line| line.contains("root ")));
    }

    #[test]
    fn test_strip_keeps_separate_http_block() {
        assert!(!strip_loses_site(&to_lines(HTTP_AND_HTTPS)));
        let plain = to_lines("server {\n    listen 80;\n    server_name example.com;\n}");
        assert!(!strip_loses_site(&plain));
    }

    #[test]
    fn test_apply_ssl_edits_on_enhanced_vhost_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let (enhanced, _) = ssl::enhance(to_lines(CERTBOT_MERGED));
        let text = format!("{}\n", enhanced.join("\n"));
        fs::write(config.vhost("example.com").path(), &text).unwrap();
        let nginx = FakeNginx::new(true);

        apply_ssl_edits(&config, &nginx, "example.com").unwrap();

        assert_eq!(fs::read_to_string(config.vhost("example.com").path()).unwrap(), text);
        assert_eq!(nginx.reloads.get(), 1);
    }

    #[test]
    fn test_apply_ssl_edits_enhances_certbot_layout() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        fs::write(config.vhost("example.com").path(), CERTBOT_MERGED).unwrap();
        let nginx = FakeNginx::new(true);

        apply_ssl_edits(&config, &nginx, "example.com").unwrap();

        let lines = config.vhost("example.com").read_lines().unwrap();
        assert!(ssl::is_enhanced(&lines));
        assert_eq!(
            scanner::site_document_root(&lines).as_deref(),
            Some("/var/www/example.com/web")
        );
    }

    #[test]
    fn test_docroot_requires_vhost() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        assert!(docroot_for(&config, "missing.com").is_err());
    }
}
