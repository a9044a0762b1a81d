//! Server TLS material: loaded from files or generated on first start.
//!
//! Generated material mirrors what mysqld creates with
//! `--auto-generate-certs`: a self-signed CA plus a server and a client
//! certificate signed by it. When a directory is configured the six PEM
//! files are written there and reused on the next start.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose,
};

use mywire_core::Result;

use crate::tls::{self, tls_error};

pub const CA_CERT_FILE: &str = "ca.pem";
pub const CA_KEY_FILE: &str = "ca-key.pem";
pub const SERVER_CERT_FILE: &str = "server-cert.pem";
pub const SERVER_KEY_FILE: &str = "server-key.pem";
pub const CLIENT_CERT_FILE: &str = "client-cert.pem";
pub const CLIENT_KEY_FILE: &str = "client-key.pem";

/// PEM-encoded certificates and keys.
#[derive(Clone)]
pub struct TlsMaterials {
    /// Empty when the server certificate was supplied without a CA
    pub ca_cert_pem: String,
    pub ca_key_pem: Option<String>,
    pub server_cert_pem: String,
    pub server_key_pem: String,
    pub client_cert_pem: Option<String>,
    pub client_key_pem: Option<String>,
}

impl std::fmt::Debug for TlsMaterials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterials")
            .field("has_ca", &!self.ca_cert_pem.is_empty())
            .field("has_client_pair", &self.client_cert_pem.is_some())
            .finish_non_exhaustive()
    }
}

fn rcgen_error(e: rcgen::Error) -> mywire_core::Error {
    tls_error(format!("certificate generation failed: {e}"))
}

impl TlsMaterials {
    /// Generate a CA and a server/client pair valid for `hostnames`.
    pub fn generate(hostnames: &[&str]) -> Result<Self> {
        let ca_key = KeyPair::generate().map_err(rcgen_error)?;
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).map_err(rcgen_error)?;
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "mywire_Auto_Generated_CA_Certificate");
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let ca_cert = ca_params.self_signed(&ca_key).map_err(rcgen_error)?;

        let names: Vec<String> = hostnames.iter().map(|h| (*h).to_string()).collect();

        let server_key = KeyPair::generate().map_err(rcgen_error)?;
        let mut server_params = CertificateParams::new(names.clone()).map_err(rcgen_error)?;
        server_params
            .distinguished_name
            .push(DnType::CommonName, "mywire_Auto_Generated_Server_Certificate");
        server_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        let server_cert = server_params
            .signed_by(&server_key, &ca_cert, &ca_key)
            .map_err(rcgen_error)?;

        let client_key = KeyPair::generate().map_err(rcgen_error)?;
        let mut client_params = CertificateParams::new(names).map_err(rcgen_error)?;
        client_params
            .distinguished_name
            .push(DnType::CommonName, "mywire_Auto_Generated_Client_Certificate");
        client_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        let client_cert = client_params
            .signed_by(&client_key, &ca_cert, &ca_key)
            .map_err(rcgen_error)?;

        tracing::info!("generated self-signed TLS certificates");
        Ok(Self {
            ca_cert_pem: ca_cert.pem(),
            ca_key_pem: Some(ca_key.serialize_pem()),
            server_cert_pem: server_cert.pem(),
            server_key_pem: server_key.serialize_pem(),
            client_cert_pem: Some(client_cert.pem()),
            client_key_pem: Some(client_key.serialize_pem()),
        })
    }

    /// Load a server certificate and key, with an optional CA.
    pub fn from_files(ca: Option<&Path>, cert: &Path, key: &Path) -> Result<Self> {
        Ok(Self {
            ca_cert_pem: ca.map(fs::read_to_string).transpose()?.unwrap_or_default(),
            ca_key_pem: None,
            server_cert_pem: fs::read_to_string(cert)?,
            server_key_pem: fs::read_to_string(key)?,
            client_cert_pem: None,
            client_key_pem: None,
        })
    }

    /// Read previously persisted material; `None` when the server pair is absent.
    pub fn load_dir(dir: &Path) -> Result<Option<Self>> {
        let cert = dir.join(SERVER_CERT_FILE);
        let key = dir.join(SERVER_KEY_FILE);
        if !cert.exists() || !key.exists() {
            return Ok(None);
        }
        let read_opt = |name: &str| -> Result<Option<String>> {
            let path = dir.join(name);
            if path.exists() {
                Ok(Some(fs::read_to_string(path)?))
            } else {
                Ok(None)
            }
        };
        Ok(Some(Self {
            ca_cert_pem: read_opt(CA_CERT_FILE)?.unwrap_or_default(),
            ca_key_pem: read_opt(CA_KEY_FILE)?,
            server_cert_pem: fs::read_to_string(cert)?,
            server_key_pem: fs::read_to_string(key)?,
            client_cert_pem: read_opt(CLIENT_CERT_FILE)?,
            client_key_pem: read_opt(CLIENT_KEY_FILE)?,
        }))
    }

    /// Write every present file into `dir`, creating it if needed.
    pub fn persist(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        let files = [
            (CA_CERT_FILE, Some(&self.ca_cert_pem).filter(|pem| !pem.is_empty())),
            (CA_KEY_FILE, self.ca_key_pem.as_ref()),
            (SERVER_CERT_FILE, Some(&self.server_cert_pem)),
            (SERVER_KEY_FILE, Some(&self.server_key_pem)),
            (CLIENT_CERT_FILE, self.client_cert_pem.as_ref()),
            (CLIENT_KEY_FILE, self.client_key_pem.as_ref()),
        ];
        for (name, contents) in files {
            if let Some(contents) = contents {
                fs::write(dir.join(name), contents)?;
            }
        }
        tracing::debug!(dir = %dir.display(), "persisted TLS material");
        Ok(())
    }

    /// Reuse material from `dir` if present, otherwise generate (and persist).
    pub fn load_or_generate(dir: Option<&Path>) -> Result<Self> {
        if let Some(dir) = dir {
            if let Some(materials) = Self::load_dir(dir)? {
                tracing::debug!(dir = %dir.display(), "loaded persisted TLS material");
                return Ok(materials);
            }
        }
        let materials = Self::generate(&["localhost", "127.0.0.1"])?;
        if let Some(dir) = dir {
            materials.persist(dir)?;
        }
        Ok(materials)
    }

    /// rustls configuration presenting the server certificate and its CA.
    pub fn server_config(&self) -> Result<Arc<rustls::ServerConfig>> {
        let mut chain = self.server_cert_pem.clone();
        if !self.ca_cert_pem.is_empty() {
            if !chain.ends_with('\n') {
                chain.push('\n');
            }
            chain.push_str(&self.ca_cert_pem);
        }
        tls::server_config(&chain, &self.server_key_pem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_material_builds_server_config() {
        let materials = TlsMaterials::generate(&["localhost"]).unwrap();
        assert!(materials.ca_cert_pem.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(materials.client_key_pem.is_some());
        assert!(materials.server_config().is_ok());
    }

    #[test]
    fn test_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        assert!(TlsMaterials::load_dir(dir.path()).unwrap().is_none());

        let first = TlsMaterials::load_or_generate(Some(dir.path())).unwrap();
        for name in [CA_CERT_FILE, SERVER_CERT_FILE, SERVER_KEY_FILE, CLIENT_CERT_FILE] {
            assert!(dir.path().join(name).exists(), "{name} missing");
        }

        let second = TlsMaterials::load_or_generate(Some(dir.path())).unwrap();
        assert_eq!(first.server_cert_pem, second.server_cert_pem);
        assert_eq!(first.ca_cert_pem, second.ca_cert_pem);
    }

    #[test]
    fn test_from_files_without_ca() {
        let dir = tempfile::tempdir().unwrap();
        let generated = TlsMaterials::generate(&["localhost"]).unwrap();
        generated.persist(dir.path()).unwrap();
        let loaded = TlsMaterials::from_files(
            None,
            &dir.path().join(SERVER_CERT_FILE),
            &dir.path().join(SERVER_KEY_FILE),
        )
        .unwrap();
        assert!(loaded.ca_cert_pem.is_empty());
        assert!(loaded.server_config().is_ok());
    }
}
