use crate::exec::Runner;
use crate::output;
use crate::system::{Packages, Services, SystemError};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

const EXTENSIONS: [&str; 13] = [
    "fpm", "cli", "common", "mbstring", "xml", "gd", "curl", "zip", "intl", "sqlite3",
    "readline", "mysql", "opcache",
];

#[derive(Error, Debug)]
pub enum PhpError {
    #[error("PHP installation error: {0}")]
    InstallationError(#[from] SystemError),

    #[error("Failed to write PHP-FPM pool {path}: {source}")]
    PoolError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("PHP-FPM socket was not created: {0} (check the PHP-FPM logs)")]
    MissingSocket(PathBuf),
}

/// Debian `phpX.Y` packages and per-site PHP-FPM pools.
pub struct Php<'a> {
    runner: &'a Runner,
    php_dir: PathBuf,
    run_dir: PathBuf,
}

impl<'a> Php<'a> {
    pub fn new(runner: &'a Runner, php_dir: &Path, run_dir: &Path) -> Self {
        Self {
            runner,
            php_dir: php_dir.to_path_buf(),
            run_dir: run_dir.to_path_buf(),
        }
    }

    /// Installs the missing packages of `version` and starts its FPM service.
    pub fn install(&self, version: &str) -> Result<(), PhpError> {
        let packages = packages(version);
        let packages: Vec<&str> = packages.iter().map(String::as_str).collect();
        Packages::new(self.runner).ensure_installed(&packages)?;
        Services::new(self.runner).ensure_running(&fpm_service(version))?;
        Ok(())
    }

    pub fn pool_path(&self, version: &str, domain: &str) -> PathBuf {
        self.php_dir
            .join(version)
            .join("fpm/pool.d")
            .join(format!("{}.conf", domain))
    }

    /// Socket the `php{version}-fpm.conf` snippet passes requests to.
    pub fn socket_path(&self, version: &str, domain: &str) -> PathBuf {
        self.run_dir
            .join(format!("php{}-fpm-{}.sock", version, domain))
    }

    /// Writes the site's pool, restarts FPM and checks the socket came up.
    pub fn create_pool(&self, domain: &str, version: &str, webroot: &Path) -> Result<PathBuf, PhpError> {
        let path = self.pool_path(version, domain);
        let socket = self.socket_path(version, domain);

        if path.exists() {
            output::log(format!("Updating PHP {} pool for {}", version, domain));
        } else {
            output::log(format!("Creating PHP {} pool for {}", version, domain));
        }
        let content = render_pool(domain, version, &socket, webroot);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|source| PhpError::PoolError {
                path: path.clone(),
                source,
            })?;
        }
        fs::write(&path, content).map_err(|source| PhpError::PoolError {
            path: path.clone(),
            source,
        })?;

        let service = fpm_service(version);
        output::log(format!("Restarting {} to load pool...", service));
        Services::new(self.runner).restart(&service)?;

        if !socket.exists() {
            return Err(PhpError::MissingSocket(socket));
        }
        info!(pool = %path.display(), socket = %socket.display(), "php-fpm pool ready");
        output::ok(format!("PHP pool configured for {}", domain));
        Ok(path)
    }

    /// Deletes the site's pool for `version` and restarts that FPM so it
    /// drops the pool. Returns false when there was no pool.
    pub fn remove_pool(&self, domain: &str, version: &str) -> Result<bool, PhpError> {
        let path = self.pool_path(version, domain);
        if !path.exists() {
            return Ok(false);
        }

        output::log(format!("Removing old PHP {} pool for {}", version, domain));
        fs::remove_file(&path).map_err(|source| PhpError::PoolError {
            path: path.clone(),
            source,
        })?;
        Services::new(self.runner).restart(&fpm_service(version))?;
        Ok(true)
    }
}

pub fn packages(version: &str) -> Vec<String> {
    EXTENSIONS
        .iter()
        .map(|ext| format!("php{}-{}", version, ext))
        .collect()
}

pub fn fpm_service(version: &str) -> String {
    format!("php{}-fpm", version)
}

/// `open_basedir` covers the project root, the parent of a `/web` document
/// root, so the site can reach `vendor/`.
fn render_pool(domain: &str, version: &str, socket: &Path, webroot: &Path) -> String {
    let project_root = match webroot.file_name() {
        Some(name) if name == "web" => webroot.parent().unwrap_or(webroot),
        _ => webroot,
    };
    let socket = socket.display();
    let project_root = project_root.display();

    format!(
        r#"; PHP-FPM pool for {domain}
[{domain}]
user = www-data
group = www-data
listen = {socket}
listen.owner = www-data
listen.group = www-data
listen.mode = 0660

pm = dynamic
pm.max_children = 10
pm.start_servers = 2
pm.min_spare_servers = 1
pm.max_spare_servers = 3
pm.max_requests = 500

; Environment
env[HOSTNAME] = $HOSTNAME
env[PATH] = /usr/local/bin:/usr/bin:/bin
env[TMP] = /tmp
env[TMPDIR] = /tmp
env[TEMP] = /tmp

; PHP admin values
php_admin_value[error_log] = /var/log/php{version}-fpm-{domain}-error.log
php_admin_flag[log_errors] = on
php_admin_value[memory_limit] = 512M

; Security
php_admin_value[open_basedir] = {project_root}:/tmp:/usr/share/php
php_admin_value[upload_tmp_dir] = /tmp
php_admin_value[session.save_path] = /tmp
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_packages() {
        let packages = packages("8.3");
        assert_eq!(packages.len(), 13);
        assert_eq!(packages[0], "php8.3-fpm");
        assert!(packages.contains(&"php8.3-mysql".to_string()));
        assert!(packages.iter().all(|p| p.starts_with("php8.3-")));
    }

    #[test]
    fn test_pool_and_socket_paths() {
        let runner = Runner::new();
        let php = Php::new(&runner, Path::new("/etc/php"), Path::new("/run/php"));
        assert_eq!(
            php.pool_path("8.4", "example.com"),
            Path::new("/etc/php/8.4/fpm/pool.d/example.com.conf")
        );
        assert_eq!(
            php.socket_path("8.4", "example.com"),
            Path::new("/run/php/php8.4-fpm-example.com.sock")
        );
    }

    #[test]
    fn test_render_pool_opens_project_root() {
        let pool = render_pool(
            "example.com",
            "8.4",
            Path::new("/run/php/php8.4-fpm-example.com.sock"),
            Path::new("/var/www/example.com/web"),
        );
        assert!(pool.contains("[example.com]\n"));
        assert!(pool.contains("listen = /run/php/php8.4-fpm-example.com.sock\n"));
        assert!(pool.contains("open_basedir] = /var/www/example.com:/tmp:/usr/share/php"));
        assert!(pool.contains("/var/log/php8.4-fpm-example.com-error.log"));
    }

    #[test]
    fn test_render_pool_keeps_custom_root() {
        let pool = render_pool(
            "example.com",
            "8.4",
            Path::new("/run/php/x.sock"),
            Path::new("/srv/app/public"),
        );
        assert!(pool.contains("open_basedir] = /srv/app/public:/tmp"));
    }

    #[test]
    fn test_remove_missing_pool() {
        let dir = TempDir::new().unwrap();
        let runner = Runner::new();
        let php = Php::new(&runner, dir.path(), dir.path());
        assert!(!php.remove_pool("example.com", "8.3").unwrap());
    }
}
