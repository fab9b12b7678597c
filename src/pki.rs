//! Certificate utilities
//!
//! CSR generation for device enrollment and subject extraction from
//! forwarded client certificates. Devices generate an EC P-256 key pair and
//! a CSR whose subject common name is the device id, with clientAuth usage.

use rcgen::{CertificateParams, DnType, ExtendedKeyUsagePurpose, KeyPair};
use x509_parser::pem::parse_x509_pem;

use crate::{Error, Result};

/// A generated device key pair and certificate signing request, both
/// PEM-encoded
#[derive(Debug)]
pub struct DeviceCsr {
    pub key_pem: String,
    pub csr_pem: String,
}

/// Generate a fresh key pair and CSR for the given device id.
/// The device id becomes the subject common name and the single SAN.
///
/// # Errors
///
/// Returns error if key or CSR generation fails
pub fn generate_device_csr(device_id: &str) -> Result<DeviceCsr> {
    let key_pair =
        KeyPair::generate().map_err(|e| Error::Certificate(format!("key generation: {e}")))?;

    let mut params = CertificateParams::new(vec![device_id.to_string()])
        .map_err(|e| Error::Certificate(format!("csr params: {e}")))?;
    params
        .distinguished_name
        .push(DnType::CommonName, device_id);
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];

    let csr = params
        .serialize_request(&key_pair)
        .map_err(|e| Error::Certificate(format!("csr serialization: {e}")))?;
    let csr_pem = csr
        .pem()
        .map_err(|e| Error::Certificate(format!("csr encoding: {e}")))?;

    Ok(DeviceCsr {
        key_pem: key_pair.serialize_pem(),
        csr_pem,
    })
}

/// Extract the subject common name from a PEM-encoded certificate
///
/// # Errors
///
/// Returns error if the PEM or certificate does not parse, or the subject
/// carries no common name
pub fn subject_common_name(pem: &[u8]) -> Result<String> {
    let (_, parsed) =
        parse_x509_pem(pem).map_err(|e| Error::Certificate(format!("invalid PEM: {e}")))?;
    let cert = parsed
        .parse_x509()
        .map_err(|e| Error::Certificate(format!("invalid certificate: {e}")))?;

    let cn = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .ok_or_else(|| Error::Certificate("certificate subject has no common name".to_string()))?;

    Ok(cn.to_string())
}

/// Generate a self-signed certificate for a device id. Used by tests and
/// local development; production leaf certificates come from the CA.
///
/// # Errors
///
/// Returns error if generation fails
pub fn self_signed_cert(device_id: &str) -> Result<String> {
    let key_pair =
        KeyPair::generate().map_err(|e| Error::Certificate(format!("key generation: {e}")))?;

    let mut params = CertificateParams::new(vec![device_id.to_string()])
        .map_err(|e| Error::Certificate(format!("cert params: {e}")))?;
    params
        .distinguished_name
        .push(DnType::CommonName, device_id);

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| Error::Certificate(format!("self-sign: {e}")))?;

    Ok(cert.pem())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csr_carries_device_id() {
        let generated = generate_device_csr("device-42").unwrap();

        assert!(generated.csr_pem.contains("BEGIN CERTIFICATE REQUEST"));
        assert!(generated.key_pem.contains("PRIVATE KEY"));
    }

    #[test]
    fn test_common_name_round_trip() {
        let pem = self_signed_cert("device-42").unwrap();
        let cn = subject_common_name(pem.as_bytes()).unwrap();
        assert_eq!(cn, "device-42");
    }

    #[test]
    fn test_garbage_pem_rejected() {
        assert!(subject_common_name(b"not a certificate").is_err());
    }
}
