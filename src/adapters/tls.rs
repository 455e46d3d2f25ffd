//! Static certificate TLS: crypto provider setup and PEM loading.
use std::{fs::File, io::BufReader, path::Path};

use eyre::{Result, WrapErr, eyre};
use rustls::ServerConfig;
use rustls_pemfile::{certs, private_key};

/// Install aws-lc-rs as the process-wide rustls provider. Safe to call many
/// times; only the first call has an effect.
pub fn install_crypto_provider() {
    let provider = rustls::crypto::aws_lc_rs::default_provider();
    if rustls::crypto::CryptoProvider::install_default(provider).is_ok() {
        tracing::debug!("Installed aws-lc-rs as the default crypto provider");
    }
}

/// Build a rustls server configuration from a PEM certificate chain and key.
///
/// The key may be PKCS#8, PKCS#1 or SEC1. ALPN offers h2 and http/1.1;
/// WebSocket clients negotiate the latter.
pub fn load_server_config(cert_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> Result<ServerConfig> {
    install_crypto_provider();

    let cert_path = cert_path.as_ref();
    let key_path = key_path.as_ref();

    let cert_file = &mut BufReader::new(
        File::open(cert_path)
            .wrap_err_with(|| format!("failed to open cert file {}", cert_path.display()))?,
    );
    let key_file = &mut BufReader::new(
        File::open(key_path)
            .wrap_err_with(|| format!("failed to open key file {}", key_path.display()))?,
    );

    let cert_chain = certs(cert_file)
        .collect::<Result<Vec<_>, _>>()
        .wrap_err("failed to parse certificate PEM")?;
    if cert_chain.is_empty() {
        return Err(eyre!("No certificates found in {}", cert_path.display()));
    }

    let key = private_key(key_file)
        .wrap_err("failed to parse private key PEM")?
        .ok_or_else(|| eyre!("No private key found in {}", key_path.display()))?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)
        .wrap_err("invalid certificate/key pair")?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use rcgen::generate_simple_self_signed;
    use tempfile::NamedTempFile;

    use super::*;

    fn pem_files() -> (NamedTempFile, NamedTempFile) {
        let cert = generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let mut cert_file = NamedTempFile::new().unwrap();
        write!(cert_file, "{}", cert.cert.pem()).unwrap();
        let mut key_file = NamedTempFile::new().unwrap();
        write!(key_file, "{}", cert.signing_key.serialize_pem()).unwrap();
        (cert_file, key_file)
    }

    #[test]
    fn test_load_self_signed_pair() {
        let (cert, key) = pem_files();
        let config = load_server_config(cert.path(), key.path()).unwrap();
        assert!(config.alpn_protocols.contains(&b"http/1.1".to_vec()));
    }

    #[test]
    fn test_missing_key_is_an_error() {
        let (cert, _) = pem_files();
        let empty = NamedTempFile::new().unwrap();
        assert!(load_server_config(cert.path(), empty.path()).is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(load_server_config("/nonexistent/cert.pem", "/nonexistent/key.pem").is_err());
    }
}
