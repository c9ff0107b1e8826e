use crate::exec::{ExecError, Runner};
use crate::output;
use crate::system::{Packages, Services, SystemError};
use std::path::{Path, PathBuf};
use thiserror::Error;

const CERTBOT_PACKAGES: [&str; 2] = ["certbot", "python3-certbot-nginx"];
const RENEWAL_TIMER: &str = "certbot.timer";
const RENEWAL_TIMER_UNIT: &str = "/lib/systemd/system/certbot.timer";

#[derive(Error, Debug)]
pub enum CertbotError {
    #[error("Certbot installation error: {0}")]
    InstallationError(#[from] SystemError),

    #[error("Failed to obtain certificate for {domain}: {source}")]
    ObtainError { domain: String, source: ExecError },

    #[error("Certificate file not found: {0}")]
    MissingCertificate(PathBuf),

    #[error("Failed to configure nginx SSL for {domain}: {source}")]
    InstallError { domain: String, source: ExecError },

    #[error("Failed to renew certificate for {domain}: {source}")]
    RenewError { domain: String, source: ExecError },

    #[error("Failed to read certificate: {0}")]
    InspectError(ExecError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateInfo {
    pub expiry: Option<String>,
    pub subject: Option<String>,
    pub issuer: Option<String>,
}

/// Let's Encrypt certificates through the certbot CLI.
pub struct Certbot<'a> {
    runner: &'a Runner,
    live_dir: PathBuf,
}

impl<'a> Certbot<'a> {
    pub fn new(runner: &'a Runner, live_dir: &Path) -> Self {
        Self {
            runner,
            live_dir: live_dir.to_path_buf(),
        }
    }

    pub fn install(&self) -> Result<(), CertbotError> {
        Packages::new(self.runner).ensure_installed(&CERTBOT_PACKAGES)?;
        Ok(())
    }

    pub fn certificate_path(&self, domain: &str) -> PathBuf {
        self.live_dir.join(domain).join("fullchain.pem")
    }

    pub fn has_certificate(&self, domain: &str) -> bool {
        self.certificate_path(domain).is_file()
    }

    /// Obtains a certificate without touching nginx, so a failure (rate
    /// limits, DNS not pointing here yet) leaves the HTTP site serving.
    pub fn obtain_certificate(&self, domain: &str, email: &str) -> Result<(), CertbotError> {
        if self.has_certificate(domain) {
            output::verify(format!("SSL certificate already exists for {}", domain));
            return Ok(());
        }

        output::log(format!("Obtaining SSL certificate for {}", domain));
        self.runner
            .run(
                "certbot",
                &[
                    "certonly",
                    "--nginx",
                    "-d",
                    domain,
                    "--non-interactive",
                    "--agree-tos",
                    "--email",
                    email,
                    "--no-eff-email",
                ],
            )
            .map_err(|source| CertbotError::ObtainError {
                domain: domain.to_string(),
                source,
            })?;

        let path = self.certificate_path(domain);
        if !path.is_file() {
            return Err(CertbotError::MissingCertificate(path));
        }

        output::ok(format!("SSL certificate obtained for {}", domain));
        Ok(())
    }

    /// Adds the HTTPS server block for an existing certificate, with an
    /// HTTP to HTTPS redirect.
    pub fn install_to_nginx(&self, domain: &str) -> Result<(), CertbotError> {
        let path = self.certificate_path(domain);
        if !path.is_file() {
            return Err(CertbotError::MissingCertificate(path));
        }

        output::log(format!("Configuring nginx with SSL for {}...", domain));
        self.runner
            .run(
                "certbot",
                &[
                    "install",
                    "--nginx",
                    "-d",
                    domain,
                    "--cert-name",
                    domain,
                    "--non-interactive",
                    "--redirect",
                ],
            )
            .map_err(|source| CertbotError::InstallError {
                domain: domain.to_string(),
                source,
            })?;

        output::ok(format!("Nginx configured with SSL for {}", domain));
        Ok(())
    }

    pub fn renew(&self, domain: &str) -> Result<(), CertbotError> {
        let path = self.certificate_path(domain);
        if !path.is_file() {
            return Err(CertbotError::MissingCertificate(path));
        }

        output::log(format!("Renewing SSL certificate for {}...", domain));
        self.runner
            .run(
                "certbot",
                &["renew", "--cert-name", domain, "--force-renewal", "--nginx"],
            )
            .map_err(|source| CertbotError::RenewError {
                domain: domain.to_string(),
                source,
            })?;
        Ok(())
    }

    pub fn certificate_details(&self, domain: &str) -> Result<CertificateInfo, CertbotError> {
        let path = self.certificate_path(domain);
        let path = path.to_string_lossy();

        let output = self
            .runner
            .run(
                "openssl",
                &["x509", "-in", &*path, "-noout", "-enddate", "-subject", "-issuer"],
            )
            .map_err(CertbotError::InspectError)?;

        Ok(parse_x509_fields(&output))
    }

    /// `certbot certificates` output for the domain's certificate.
    pub fn summary(&self, domain: &str) -> Result<String, CertbotError> {
        self.runner
            .run("certbot", &["certificates", "--cert-name", domain])
            .map_err(CertbotError::InspectError)
    }

    pub fn setup_auto_renewal(&self) -> Result<(), CertbotError> {
        let services = Services::new(self.runner);

        if Path::new(RENEWAL_TIMER_UNIT).exists() {
            services.ensure_running(RENEWAL_TIMER)?;
            output::verify("Certbot auto-renewal configured");
            return Ok(());
        }

        output::log("Setting up auto-renewal...");
        services.enable(RENEWAL_TIMER)?;
        services.start(RENEWAL_TIMER)?;
        output::ok("Certbot auto-renewal configured");
        Ok(())
    }
}

fn parse_x509_fields(output: &str) -> CertificateInfo {
    let mut info = CertificateInfo::default();

    for line in output.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = Some(value.trim().to_string());
        match key.trim() {
            "notAfter" => info.expiry = value,
            "subject" => info.subject = value,
            "issuer" => info.issuer = value,
            _ => {}
        }
    }

    info
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_certificate_path() {
        let runner = Runner::new();
        let certbot = Certbot::new(&runner, Path::new("/etc/letsencrypt/live"));
        assert_eq!(
            certbot.certificate_path("example.com"),
            Path::new("/etc/letsencrypt/live/example.com/fullchain.pem")
        );
    }

    #[test]
    fn test_install_to_nginx_requires_certificate() {
        let dir = tempfile::TempDir::new().unwrap();
        let runner = Runner::new();
        let certbot = Certbot::new(&runner, dir.path());

        assert!(!certbot.has_certificate("example.com"));
        let err = certbot.install_to_nginx("example.com").unwrap_err();
        assert!(matches!(err, CertbotError::MissingCertificate(_)));
        let err = certbot.renew("example.com").unwrap_err();
        assert!(matches!(err, CertbotError::MissingCertificate(_)));
    }

    #[test]
    fn test_parse_x509_fields() {
        let output = "notAfter=Jan 14 10:00:00 2027 GMT\nsubject=CN = example.com\nissuer=C = US, O = Let's Encrypt, CN = R11\n";
        let info = parse_x509_fields(output);

        assert_eq!(info.expiry.as_deref(), Some("Jan 14 10:00:00 2027 GMT"));
        assert_eq!(info.subject.as_deref(), Some("CN = example.com"));
        assert_eq!(
            info.issuer.as_deref(),
            Some("C = US, O = Let's Encrypt, CN = R11")
        );
    }

    #[test]
    fn test_parse_x509_fields_ignores_noise() {
        let info = parse_x509_fields("unable to load certificate\n");
        assert_eq!(info, CertificateInfo::default());
    }
}
