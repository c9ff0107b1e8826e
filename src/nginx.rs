use crate::config::Config;
use crate::exec::Runner;
use crate::output;
use crate::system::Services;
use crate::vhost::{NginxService, VhostFile};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum NginxError {
    #[error("Nginx configuration test failed:\n{0}")]
    ConfigTestFailed(String),

    #[error("Reload error: {0}")]
    ReloadError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Site creation error: {0}")]
    SiteCreationError(String),
}

pub struct NginxManager<'a> {
    runner: &'a Runner,
    sites_available: PathBuf,
    sites_enabled: PathBuf,
    snippets_dir: PathBuf,
}

impl<'a> NginxManager<'a> {
    pub fn new(runner: &'a Runner, config: &Config) -> Self {
        Self {
            runner,
            sites_available: config.sites_available.clone(),
            sites_enabled: config.sites_enabled.clone(),
            snippets_dir: config.snippets_dir.clone(),
        }
    }

    /// Writes the PHP-FPM and security-header snippets the vhost includes.
    /// Existing snippets are left as they are.
    pub fn ensure_snippets(&self, php_version: &str) -> Result<(), NginxError> {
        fs::create_dir_all(&self.snippets_dir).map_err(|e| {
            NginxError::ConfigurationError(format!(
                "Failed to create {}: {}",
                self.snippets_dir.display(),
                e
            ))
        })?;

        let snippets = [
            (
                format!("php{}-fpm.conf", php_version),
                php_fpm_snippet(php_version),
            ),
            (
                "security-headers.conf".to_string(),
                SECURITY_HEADERS_SNIPPET.to_string(),
            ),
        ];

        for (name, content) in snippets {
            let path = self.snippets_dir.join(&name);
            if path.exists() {
                output::verify(format!("Snippet {} already exists", name));
                continue;
            }
            output::log(format!("Creating snippet: {}", path.display()));
            fs::write(&path, content).map_err(|e| {
                NginxError::ConfigurationError(format!(
                    "Failed to write {}: {}",
                    path.display(),
                    e
                ))
            })?;
        }

        Ok(())
    }

    /// Writes `<domain>.conf` from the template and links it into
    /// sites-enabled.
    pub fn create_vhost(
        &self,
        domain: &str,
        webroot: &Path,
        php_version: &str,
    ) -> Result<VhostFile, NginxError> {
        if domain.trim().is_empty() {
            return Err(NginxError::SiteCreationError(
                "Domain cannot be empty".to_string(),
            ));
        }

        let vhost = VhostFile::for_domain(&self.sites_available, domain);
        if vhost.exists() {
            output::log(format!("Updating Nginx vhost for {}", domain));
        } else {
            output::log(format!("Creating Nginx vhost for {}", domain));
        }

        let content = render_vhost(domain, &webroot.display().to_string(), php_version);
        vhost
            .replace(&content)
            .map_err(|e| NginxError::SiteCreationError(e.to_string()))?;

        let link = self.sites_enabled.join(format!("{}.conf", domain));
        if fs::symlink_metadata(&link).is_err() {
            output::log(format!("Enabling site {}", domain));
            std::os::unix::fs::symlink(vhost.path(), &link).map_err(|e| {
                NginxError::SiteCreationError(format!(
                    "Failed to link {}: {}",
                    link.display(),
                    e
                ))
            })?;
        }

        Ok(vhost)
    }
}

impl NginxService for NginxManager<'_> {
    fn test_config(&self) -> Result<(), NginxError> {
        output::log("Testing Nginx configuration...");

        let result = self
            .runner
            .output("nginx", &["-t"])
            .map_err(|e| NginxError::ConfigTestFailed(e.to_string()))?;
        debug!(output = %result.combined(), "nginx -t");

        if !result.success() {
            output::error("Nginx configuration test failed:");
            output::error(result.combined());
            return Err(NginxError::ConfigTestFailed(result.combined()));
        }

        output::ok("Nginx configuration is valid");
        Ok(())
    }

    fn reload(&self) -> Result<(), NginxError> {
        output::log("Reloading Nginx...");

        Services::new(self.runner)
            .reload("nginx")
            .map_err(|e| NginxError::ReloadError(e.to_string()))?;

        output::ok("Nginx reloaded successfully");
        Ok(())
    }
}

const SECURITY_HEADERS_SNIPPET: &str = r#"# Security headers
add_header X-Frame-Options "SAMEORIGIN" always;
add_header X-Content-Type-Options "nosniff" always;
add_header X-XSS-Protection "1; mode=block" always;
"#;

fn php_fpm_snippet(php_version: &str) -> String {
    format!(
        r#"# PHP-FPM configuration for version {php_version}
location ~ \.php$ {{
    include snippets/fastcgi-php.conf;
    fastcgi_pass unix:/run/php/php{php_version}-fpm-$pool.sock;
    fastcgi_param SCRIPT_FILENAME $document_root$fastcgi_script_name;
    include fastcgi_params;
}}

# Deny access to .htaccess files
location ~ /\.ht {{
    deny all;
}}
"#
    )
}

/// The plain-HTTP vhost a site starts with. certbot later adds the HTTPS side.
pub fn render_vhost(domain: &str, webroot: &str, php_version: &str) -> String {
    format!(
        r#"# Nginx configuration for {domain}
server {{
    listen 80;
    listen [::]:80;
    server_name {domain};

    root {webroot};
    index index.php index.html index.htm;

    # Set pool variable for PHP-FPM
    set $pool "{domain}";

    # Logging
    access_log /var/log/nginx/{domain}-access.log;
    error_log /var/log/nginx/{domain}-error.log;

    # Security headers
    include snippets/security-headers.conf;

    # Main location block
    location / {{
        try_files $uri $uri/ /index.php?$query_string;
    }}

    # PHP processing
    include snippets/php{php_version}-fpm.conf;

    # Deny access to hidden files
    location ~ /\. {{
        deny all;
        access_log off;
        log_not_found off;
    }}
}}
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vhost::{auth, scanner};
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> Config {
        let root = dir.path().to_path_buf();
        Config::from_lookup(|key| match key {
            "SVP_SITES_AVAILABLE" => Some(root.join("available").display().to_string()),
            "SVP_SITES_ENABLED" => Some(root.join("enabled").display().to_string()),
            "SVP_NGINX_SNIPPETS" => Some(root.join("snippets").display().to_string()),
            _ => None,
        })
        .unwrap()
    }

    #[test]
    fn test_render_vhost_shape() {
        let text = render_vhost("example.com", "/var/www/example.com/web", "8.4");
        let lines: Vec<&str> = text.lines().collect();
        let blocks = scanner::server_blocks(&lines);

        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].listens_on(80));
        assert_eq!(blocks[0].end, lines.len() - 1);
        assert_eq!(
            scanner::http_document_root(&lines).as_deref(),
            Some("/var/www/example.com/web")
        );
        assert!(text.contains("include snippets/php8.4-fpm.conf;"));
        assert!(text.contains("set $pool \"example.com\";"));
    }

    #[test]
    fn test_rendered_vhost_accepts_auth() {
        let text = render_vhost("example.com", "/var/www/example.com/web", "8.4");
        let lines: Vec<String> = text.lines().map(str::to_string).collect();
        let edit = auth::apply(lines, true, "/var/www/example.com/.htpasswd");
        assert!(edit.inserted);
        assert_eq!(edit.lines[6], "    # Basic Authentication");
    }

    #[test]
    fn test_php_fpm_snippet() {
        let snippet = php_fpm_snippet("8.3");
        assert!(snippet.contains("fastcgi_pass unix:/run/php/php8.3-fpm-$pool.sock;"));
        assert!(snippet.contains("location ~ \\.php$ {"));
    }

    #[test]
    fn test_create_vhost_writes_and_links() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        fs::create_dir_all(&config.sites_available).unwrap();
        fs::create_dir_all(&config.sites_enabled).unwrap();
        let runner = Runner::new();
        let nginx = NginxManager::new(&runner, &config);

        let vhost = nginx
            .create_vhost("example.com", Path::new("/var/www/example.com/web"), "8.4")
            .unwrap();

        let content = fs::read_to_string(vhost.path()).unwrap();
        assert!(content.contains("server_name example.com;"));
        let link = config.sites_enabled.join("example.com.conf");
        assert_eq!(fs::read_link(&link).unwrap(), vhost.path());

        // a second run rewrites the file and keeps the existing link
        nginx
            .create_vhost("example.com", Path::new("/srv/other"), "8.4")
            .unwrap();
        assert!(fs::read_to_string(&link).unwrap().contains("root /srv/other;"));
    }

    #[test]
    fn test_create_vhost_rejects_empty_domain() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let runner = Runner::new();
        let nginx = NginxManager::new(&runner, &config);

        let err = nginx
            .create_vhost(" ", Path::new("/srv"), "8.4")
            .unwrap_err();
        assert!(matches!(err, NginxError::SiteCreationError(_)));
    }

    #[test]
    fn test_ensure_snippets_keeps_existing() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let runner = Runner::new();
        let nginx = NginxManager::new(&runner, &config);

        fs::create_dir_all(&config.snippets_dir).unwrap();
        let custom = config.snippets_dir.join("security-headers.conf");
        fs::write(&custom, "# custom\n").unwrap();

        nginx.ensure_snippets("8.4").unwrap();

        assert_eq!(fs::read_to_string(&custom).unwrap(), "# custom\n");
        assert!(config.snippets_dir.join("php8.4-fpm.conf").exists());
    }
}
