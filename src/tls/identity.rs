//! Certificate identity extraction.

use rustls::pki_types::CertificateDer;
use x509_parser::prelude::*;

/// Subject common name of a DER certificate.
pub fn common_name(cert: &CertificateDer<'_>) -> Option<String> {
    let (_, parsed) = X509Certificate::from_der(cert.as_ref()).ok()?;
    let attr = parsed.subject().iter_common_name().next()?;
    attr.as_str().ok().map(str::to_owned)
}

/// Host names a server certificate answers for: DNS SANs, then the CN.
/// Names are lowercased and deduplicated.
pub fn subject_names(cert: &CertificateDer<'_>) -> Vec<String> {
    let Ok((_, parsed)) = X509Certificate::from_der(cert.as_ref()) else {
        return Vec::new();
    };

    let mut names = Vec::new();
    if let Ok(Some(san)) = parsed.subject_alternative_name() {
        for name in &san.value.general_names {
            if let GeneralName::DNSName(dns) = name {
                names.push(dns.to_ascii_lowercase());
            }
        }
    }

    if let Some(cn) = parsed
        .subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
    {
        let cn = cn.to_ascii_lowercase();
        if !names.contains(&cn) {
            names.push(cn);
        }
    }

    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::certs::read_certificates;
    use std::path::Path;

    fn fixture(name: &str) -> CertificateDer<'static> {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests/certs")
            .join(name);
        read_certificates(&path).unwrap().remove(0)
    }

    #[test]
    fn test_client_common_name() {
        assert_eq!(
            common_name(&fixture("client_cert.pem")).as_deref(),
            Some("testuser1")
        );
        assert_eq!(
            common_name(&fixture("client_cert2.pem")).as_deref(),
            Some("testuser2")
        );
    }

    #[test]
    fn test_server_names() {
        assert_eq!(subject_names(&fixture("test_cert1.pem")), vec!["localhost"]);
    }

    #[test]
    fn test_garbage_has_no_identity() {
        let garbage = CertificateDer::from(vec![0u8, 1, 2, 3]);
        assert_eq!(common_name(&garbage), None);
        assert!(subject_names(&garbage).is_empty());
    }
}
