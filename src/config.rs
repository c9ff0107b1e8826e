use crate::vhost::VhostFile;
use std::env;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}. Please fill out the .env file in the application directory.")]
    MissingEnv(String),

    #[error("Invalid environment variable: {0}. Please check the value in your .env file.")]
    InvalidEnv(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub sites_available: PathBuf,
    pub sites_enabled: PathBuf,
    pub snippets_dir: PathBuf,
    pub webroot: PathBuf,
    pub letsencrypt_live: PathBuf,
    pub php_version: String,
    pub php_dir: PathBuf,
    pub php_run_dir: PathBuf,
    pub le_email: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; unset keys take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = |key: &str, default: &str| -> Result<PathBuf, ConfigError> {
            let value = lookup(key).unwrap_or_else(|| default.to_string());
            if value.trim().is_empty() {
                return Err(ConfigError::MissingEnv(format!("{} (value is empty)", key)));
            }
            Ok(PathBuf::from(value.trim()))
        };

        let sites_available = path("SVP_SITES_AVAILABLE", "/etc/nginx/sites-available")?;
        let sites_enabled = path("SVP_SITES_ENABLED", "/etc/nginx/sites-enabled")?;
        let snippets_dir = path("SVP_NGINX_SNIPPETS", "/etc/nginx/snippets")?;
        let webroot = path("SVP_WEBROOT", "/var/www")?;
        let letsencrypt_live = path("SVP_LETSENCRYPT_DIR", "/etc/letsencrypt/live")?;
        let php_dir = path("SVP_PHP_DIR", "/etc/php")?;
        let php_run_dir = path("SVP_PHP_RUN_DIR", "/run/php")?;

        let php_version = lookup("SVP_PHP_VERSION").unwrap_or_else(|| "8.4".to_string());
        if !is_php_version(php_version.trim()) {
            return Err(ConfigError::InvalidEnv(
                "SVP_PHP_VERSION (expected MAJOR.MINOR, e.g. 8.4)".to_string(),
            ));
        }

        let le_email = lookup("SVP_LE_EMAIL")
            .map(|email| email.trim().to_string())
            .filter(|email| !email.is_empty());

        Ok(Self {
            sites_available,
            sites_enabled,
            snippets_dir,
            webroot,
            letsencrypt_live,
            php_version: php_version.trim().to_string(),
            php_dir,
            php_run_dir,
            le_email,
        })
    }

    pub fn site_dir(&self, domain: &str) -> PathBuf {
        self.webroot.join(domain)
    }

    pub fn htpasswd_path(&self, domain: &str) -> PathBuf {
        self.site_dir(domain).join(".htpasswd")
    }

    /// Document root used when the vhost does not declare one.
    pub fn default_docroot(&self, domain: &str) -> PathBuf {
        self.site_dir(domain).join("web")
    }

    pub fn vhost(&self, domain: &str) -> VhostFile {
        VhostFile::for_domain(&self.sites_available, domain)
    }
}

/// `MAJOR.MINOR`, e.g. `8.4`.
pub(crate) fn is_php_version(value: &str) -> bool {
    match value.split_once('.') {
        Some((major, minor)) => {
            !major.is_empty()
                && !minor.is_empty()
                && major.chars().all(|c| c.is_ascii_digit())
                && minor.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}
