use crate::exec::{ExecError, Runner};
use crate::output;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum SystemError {
    #[error("Failed to install {packages}: {source}")]
    InstallationError {
        packages: String,
        source: ExecError,
    },

    #[error("Failed to {action} {service}: {source}")]
    ServiceError {
        action: &'static str,
        service: String,
        source: ExecError,
    },
}

/// Debian package queries and installs.
pub struct Packages<'a> {
    runner: &'a Runner,
}

impl<'a> Packages<'a> {
    pub fn new(runner: &'a Runner) -> Self {
        Self { runner }
    }

    pub fn is_installed(&self, package: &str) -> bool {
        match self.runner.run("dpkg", &["-l", package]) {
            Ok(output) => is_listed_installed(&output, package),
            Err(_) => false,
        }
    }

    pub fn install(&self, packages: &[&str]) -> Result<(), SystemError> {
        let mut args = vec!["install", "-y"];
        args.extend_from_slice(packages);

        self.runner
            .run("apt-get", &args)
            .map_err(|source| SystemError::InstallationError {
                packages: packages.join(" "),
                source,
            })?;
        Ok(())
    }

    /// Installs whichever of `packages` are missing.
    pub fn ensure_installed(&self, packages: &[&str]) -> Result<(), SystemError> {
        let missing: Vec<&str> = packages
            .iter()
            .copied()
            .filter(|package| !self.is_installed(package))
            .collect();

        if missing.is_empty() {
            output::verify(format!("{} already installed", packages.join(", ")));
            return Ok(());
        }

        output::log(format!("Installing {}...", missing.join(", ")));
        self.install(&missing)?;
        output::ok(format!("{} installed", missing.join(", ")));
        Ok(())
    }
}

fn is_listed_installed(dpkg_output: &str, package: &str) -> bool {
    dpkg_output.contains(&format!("ii  {}", package))
}

/// systemd unit control.
pub struct Services<'a> {
    runner: &'a Runner,
}

impl<'a> Services<'a> {
    pub fn new(runner: &'a Runner) -> Self {
        Self { runner }
    }

    pub fn is_enabled(&self, service: &str) -> bool {
        self.runner.run("systemctl", &["is-enabled", service]).is_ok()
    }

    pub fn is_active(&self, service: &str) -> bool {
        self.runner.run("systemctl", &["is-active", service]).is_ok()
    }

    pub fn enable(&self, service: &str) -> Result<(), SystemError> {
        self.systemctl("enable", service)
    }

    pub fn start(&self, service: &str) -> Result<(), SystemError> {
        self.systemctl("start", service)
    }

    pub fn reload(&self, service: &str) -> Result<(), SystemError> {
        self.systemctl("reload", service)
    }

    pub fn restart(&self, service: &str) -> Result<(), SystemError> {
        self.systemctl("restart", service)
    }

    /// Enables and starts the unit unless it already is.
    pub fn ensure_running(&self, service: &str) -> Result<(), SystemError> {
        let enabled = self.is_enabled(service);
        let active = self.is_active(service);

        if !enabled {
            output::fix(format!("Enabling {} service", service));
            self.enable(service)?;
        }
        if !active {
            output::fix(format!("Starting {} service", service));
            self.start(service)?;
        }
        if enabled && active {
            output::ok(format!("{} running", service));
        }
        Ok(())
    }

    fn systemctl(&self, action: &'static str, service: &str) -> Result<(), SystemError> {
        debug!(action, service, "systemctl");
        self.runner
            .run("systemctl", &[action, service])
            .map_err(|source| SystemError::ServiceError {
                action,
                service: service.to_string(),
                source,
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DPKG_OUTPUT: &str = "\
Desired=Unknown/Install/Remove/Purge/Hold
||/ Name           Version      Architecture Description
+++-==============-============-============-=================================
ii  apache2-utils  2.4.62-1     amd64        Apache HTTP Server (utility programs for web servers)
un  certbot        <none>       <none>       (no description available)";

    #[test]
    fn test_is_listed_installed() {
        assert!(is_listed_installed(DPKG_OUTPUT, "apache2-utils"));
        assert!(!is_listed_installed(DPKG_OUTPUT, "certbot"));
        assert!(!is_listed_installed(DPKG_OUTPUT, "nginx"));
    }

    #[test]
    fn test_service_error_message() {
        let err = SystemError::ServiceError {
            action: "reload",
            service: "nginx".to_string(),
            source: ExecError::CommandError {
                command: "systemctl reload nginx".to_string(),
                status: 1,
                stderr: "Job for nginx.service failed".to_string(),
            },
        };
        let message = err.to_string();
        assert!(message.starts_with("Failed to reload nginx"));
        assert!(message.contains("Job for nginx.service failed"));
    }
}
