use super::{secret_or_prompt, value_or_prompt};
use crate::config::Config;
use crate::exec::Runner;
use crate::nginx::NginxManager;
use crate::output;
use crate::system::Packages;
use crate::vhost::{auth, AuthDirectives};
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;
use tracing::info;

pub enum AuthAction<'a> {
    Enable {
        username: Option<&'a str>,
        password: Option<&'a str>,
    },
    Disable,
    Check,
}

pub fn run(config: &Config, runner: &Runner, domain: &str, action: AuthAction) -> Result<()> {
    output::section(format!("Basic Authentication Management for {}", domain));

    Packages::new(runner)
        .ensure_installed(&["apache2-utils"])
        .context("failed to install apache2-utils (provides htpasswd)")?;

    match action {
        AuthAction::Enable { username, password } => {
            enable(config, runner, domain, username, password)
        }
        AuthAction::Disable => disable(config, runner, domain),
        AuthAction::Check => check(config, domain),
    }
}

fn enable(
    config: &Config,
    runner: &Runner,
    domain: &str,
    username: Option<&str>,
    password: Option<&str>,
) -> Result<()> {
    output::section("Enabling Basic Authentication");

    let site_dir = config.site_dir(domain);
    if !site_dir.is_dir() {
        bail!("site directory not found: {}", site_dir.display());
    }
    let vhost = config.vhost(domain);
    let had_auth = auth::has_auth(&vhost.read_lines()?);

    let username = value_or_prompt(username, "Username")?;
    let password = secret_or_prompt(password, "Password")?;

    let htpasswd = config.htpasswd_path(domain);
    let htpasswd_str = htpasswd.to_string_lossy();

    output::log("Creating/updating .htpasswd file...");
    // -c keeps a single user in the file, -B hashes with bcrypt
    runner
        .run(
            "htpasswd",
            &["-cbB", &*htpasswd_str, username.as_str(), password.as_str()],
        )
        .context("failed to create .htpasswd file")?;
    info!(domain, htpasswd = %htpasswd.display(), user = %username, "password file written");
    output::ok(".htpasswd file created/updated");

    output::log("Updating nginx configuration...");
    let nginx = NginxManager::new(runner, config);
    vhost.commit(&nginx, &[&AuthDirectives::enable(&htpasswd_str)])?;
    info!(domain, replaced = had_auth, "basic auth enabled");

    if had_auth {
        output::ok("Nginx configuration updated (auth directives replaced)");
    } else {
        output::ok("Nginx configuration updated (auth directives added)");
    }

    output::ok(format!("Basic authentication enabled for {}", domain));
    println!();
    println!("Username: {}", username);
    println!("Password file: {}", htpasswd.display());
    println!();
    println!("Your site now requires authentication: https://{}", domain);

    Ok(())
}

fn disable(config: &Config, runner: &Runner, domain: &str) -> Result<()> {
    output::section("Disabling Basic Authentication");

    let htpasswd = config.htpasswd_path(domain);
    if !htpasswd.exists() {
        output::warn(format!("Basic authentication not enabled for {}", domain));
        return Ok(());
    }

    output::log("Removing .htpasswd file...");
    match fs::remove_file(&htpasswd) {
        Ok(()) => output::ok(".htpasswd file removed"),
        Err(e) => output::warn(format!("Failed to remove .htpasswd file: {}", e)),
    }

    output::log("Updating nginx configuration...");
    let nginx = NginxManager::new(runner, config);
    let mutation = config
        .vhost(domain)
        .commit(&nginx, &[&AuthDirectives::disable()])?;

    info!(domain, removed = mutation.written, "basic auth disabled");
    if mutation.written {
        output::ok("Nginx configuration updated (auth directives removed)");
    } else {
        output::skip("No auth directives found in nginx configuration");
    }

    output::ok(format!("Basic authentication disabled for {}", domain));
    println!();
    println!(
        "Your site is now accessible without authentication: https://{}",
        domain
    );

    Ok(())
}

fn check(config: &Config, domain: &str) -> Result<()> {
    output::section("Basic Authentication Status");

    let htpasswd = config.htpasswd_path(domain);
    if !htpasswd.exists() {
        output::warn(format!("Basic authentication not enabled for {}", domain));
        println!();
        println!("To enable authentication, run: svp auth enable {}", domain);
        return Ok(());
    }

    output::ok(format!("Basic authentication is enabled for {}", domain));
    println!();
    println!("Password file: {}", htpasswd.display());
    if let Some(user) = htpasswd_user(&htpasswd) {
        println!("Username: {}", user);
    }

    let vhost = config.vhost(domain);
    if vhost.exists() {
        if auth::has_auth(&vhost.read_lines()?) {
            println!("Nginx configuration: Configured");
        } else {
            output::warn("Nginx configuration missing auth_basic directives");
        }
    }

    println!();
    println!(
        "To update credentials, run: svp auth enable {} --username USER --password PASS",
        domain
    );
    println!("To disable authentication, run: svp auth disable {}", domain);

    Ok(())
}

/// First user name in an htpasswd file.
fn htpasswd_user(path: &Path) -> Option<String> {
    let content = fs::read_to_string(path).ok()?;
    let line = content.lines().find(|line| !line.trim().is_empty())?;
    let user = line.split(':').next()?.trim();
    (!user.is_empty()).then(|| user.to_string())
}
