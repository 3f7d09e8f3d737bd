//! Mutual TLS setup for adapter servers and their clients.

use std::fs;
use std::path::Path;

use tonic::transport::{Certificate, ClientTlsConfig, Identity, ServerTlsConfig};

use crate::config::TlsConfig;
use crate::error::{AdapterError, AdapterResult};

fn read_pem(path: &Path, what: &str) -> AdapterResult<Vec<u8>> {
    fs::read(path).map_err(|e| {
        AdapterError::ConfigurationError(format!(
            "cannot load {what} from {}: {e}",
            path.display()
        ))
    })
}

fn load_identity(cfg: &TlsConfig) -> AdapterResult<Identity> {
    let cert = read_pem(&cfg.cert, "certificate")?;
    let key = read_pem(&cfg.key, "private key")?;
    Ok(Identity::from_pem(cert, key))
}

/// Server side: present our certificate and require a client certificate
/// signed by the configured CA.
pub fn server_tls(cfg: &TlsConfig) -> AdapterResult<ServerTlsConfig> {
    let ca = read_pem(&cfg.ca_cert, "client CA certificate")?;
    Ok(ServerTlsConfig::new()
        .identity(load_identity(cfg)?)
        .client_ca_root(Certificate::from_pem(ca))
        .client_auth_optional(false))
}

/// Client side: verify the server against the CA and present our own certificate.
pub fn client_tls(cfg: &TlsConfig) -> AdapterResult<ClientTlsConfig> {
    let ca = read_pem(&cfg.ca_cert, "server CA certificate")?;
    Ok(ClientTlsConfig::new()
        .ca_certificate(Certificate::from_pem(ca))
        .identity(load_identity(cfg)?)
        .domain_name(cfg.domain_name.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_missing_files_are_configuration_errors() {
        let cfg = TlsConfig {
            ca_cert: PathBuf::from("/nonexistent/ca-cert.pem"),
            ..TlsConfig::default()
        };
        let err = server_tls(&cfg).unwrap_err();
        assert!(matches!(err, AdapterError::ConfigurationError(_)));
        assert!(err.to_string().contains("/nonexistent/ca-cert.pem"));
        assert!(client_tls(&cfg).is_err());
    }

    #[test]
    fn test_pem_contents_are_loaded_lazily_by_tonic() {
        // tonic only parses PEM when the listener starts, so any bytes load here
        let dir = tempfile::tempdir().unwrap();
        for name in ["ca-cert.pem", "server-cert.pem", "server-key.pem"] {
            fs::write(dir.path().join(name), b"-----BEGIN CERTIFICATE-----\n").unwrap();
        }
        let cfg = TlsConfig {
            ca_cert: dir.path().join("ca-cert.pem"),
            cert: dir.path().join("server-cert.pem"),
            key: dir.path().join("server-key.pem"),
            ..TlsConfig::default()
        };
        assert!(server_tls(&cfg).is_ok());
        assert!(client_tls(&cfg).is_ok());
    }
}
