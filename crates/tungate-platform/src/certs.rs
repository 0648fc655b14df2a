//! System trust store export
//!
//! Serializes every certificate in the platform trust store to PEM text for
//! the engine. A store that cannot be read yields an empty list plus a
//! logged warning, never a fatal error.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::warn;

use crate::os::TrustStore;

/// PEM text for every system-trusted certificate.
pub fn system_certificates(store: &dyn TrustStore) -> Vec<String> {
    match store.certificates_der() {
        Ok(certs) => certs.iter().map(|der| der_to_pem(der)).collect(),
        Err(err) => {
            warn!("unable to enumerate system certificates: {err}");
            Vec::new()
        }
    }
}

/// Wrap DER bytes in a PEM envelope with a single-line base64 body.
fn der_to_pem(der: &[u8]) -> String {
    format!(
        "-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----",
        STANDARD.encode(der)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::os::TrustStoreError;

    struct FakeStore(Result<Vec<Vec<u8>>, TrustStoreError>);

    impl TrustStore for FakeStore {
        fn certificates_der(&self) -> Result<Vec<Vec<u8>>, TrustStoreError> {
            self.0.clone()
        }
    }

    #[test]
    fn test_pem_envelope() {
        let store = FakeStore(Ok(vec![vec![0x30, 0x03, 0x01, 0x02, 0x03]]));
        let pems = system_certificates(&store);
        assert_eq!(pems.len(), 1);
        assert!(pems[0].starts_with("-----BEGIN CERTIFICATE-----\n"));
        assert!(pems[0].ends_with("\n-----END CERTIFICATE-----"));
        assert_eq!(pems[0].lines().count(), 3);
    }

    #[test]
    fn test_unreadable_store_is_empty_not_error() {
        let store = FakeStore(Err(TrustStoreError("keystore locked".into())));
        assert!(system_certificates(&store).is_empty());
    }

    #[test]
    fn test_empty_store() {
        let store = FakeStore(Ok(Vec::new()));
        assert!(system_certificates(&store).is_empty());
    }
}
