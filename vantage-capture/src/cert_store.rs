use std::path::PathBuf;

use tracing::info;
use vantage_core::VantageError;

const CA_CERT_FILENAME: &str = "vantage-ca.pem";

/// Validates the trust-anchor directory at startup (§6): owner-only
/// permissions, containing the root CA certificate the interceptor
/// presents to clients. Generation of that certificate and its private
/// material is an external, first-run provisioning step — this store
/// only confirms it is present and correctly protected before the
/// interceptor is allowed to start.
pub struct CertificateStore {
    cert_dir: PathBuf,
}

impl CertificateStore {
    pub fn new(cert_dir: impl Into<PathBuf>) -> Self {
        Self {
            cert_dir: cert_dir.into(),
        }
    }

    pub fn ca_cert_path(&self) -> PathBuf {
        self.cert_dir.join(CA_CERT_FILENAME)
    }

    /// Confirm the CA certificate exists and the directory carries
    /// owner-only permissions, fixing the latter if it has drifted.
    /// A missing certificate is a fatal `ConfigurationError` (§7) naming
    /// the remediation: this store never generates key material itself.
    pub async fn validate(&self) -> Result<(), VantageError> {
        let cert_path = self.ca_cert_path();

        if !cert_path.exists() {
            return Err(VantageError::Configuration(format!(
                "CA certificate not found at {}; run first-run certificate provisioning before starting the interceptor",
                cert_path.display()
            )));
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let metadata = std::fs::metadata(&self.cert_dir)
                .map_err(|e| VantageError::Configuration(format!("cannot stat trust-anchor directory: {e}")))?;
            let mode = metadata.permissions().mode() & 0o777;
            if mode != 0o700 {
                std::fs::set_permissions(&self.cert_dir, std::fs::Permissions::from_mode(0o700))
                    .map_err(|e| VantageError::Configuration(format!("cannot restrict trust-anchor directory permissions: {e}")))?;
                info!(dir = %self.cert_dir.display(), "trust-anchor directory permissions corrected to owner-only");
            }
        }

        info!(path = %cert_path.display(), "CA certificate validated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn a_missing_certificate_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CertificateStore::new(dir.path());
        let result = store.validate().await;
        assert!(matches!(result, Err(VantageError::Configuration(_))));
    }

    #[tokio::test]
    async fn an_existing_certificate_validates_and_restricts_permissions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("vantage-ca.pem"), b"placeholder").unwrap();
        let store = CertificateStore::new(dir.path());
        store.validate().await.unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(dir.path()).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o700);
        }
    }
}
