//! Listener TLS material
//!
//! Resolves a listener's certificate reference to a Secret and checks that it
//! holds a usable certificate chain and private key. Only the first
//! certificate reference is used.

use crate::domain::{
    Gateway, GroupKind, Listener, Secret, TlsMode, CA_CERT_KEY, TLS_CERT_KEY,
    TLS_PRIVATE_KEY_KEY, TLS_SECRET_TYPE,
};
use crate::query::{FromObject, GatewayQueries, QueryError};
use x509_parser::pem::Pem;

/// Validated certificate material, copied out of the Secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsBundle {
    pub cert_chain: Vec<u8>,
    pub private_key: Vec<u8>,
    pub ca: Option<Vec<u8>>,
}

/// TLS settings of one HTTPS filter chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SslConfig {
    pub bundle: TlsBundle,
    /// Server names matched by the filter chain; empty matches any SNI
    pub sni_domains: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TlsValidationError {
    #[error("secret type {0} is not {TLS_SECRET_TYPE}")]
    WrongSecretType(String),

    #[error("secret is missing {0}")]
    MissingKey(&'static str),

    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("{TLS_PRIVATE_KEY_KEY} does not contain a PEM private key")]
    InvalidPrivateKey,
}

/// Why a listener could not get TLS material
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SslConfigError {
    #[error("listener has no TLS certificate references")]
    MissingCertificateRef,

    #[error("TLS passthrough is not supported")]
    Passthrough,

    #[error(transparent)]
    Reference(#[from] QueryError),

    #[error(transparent)]
    Validation(#[from] TlsValidationError),
}

impl SslConfigError {
    /// Whether the failure was a missing ReferenceGrant
    pub fn is_ref_not_permitted(&self) -> bool {
        matches!(self, SslConfigError::Reference(QueryError::MissingReferenceGrant))
    }
}

/// Check a Secret for a PEM certificate chain and private key
pub fn validate_tls_secret(secret: &Secret) -> Result<TlsBundle, TlsValidationError> {
    if let Some(type_) = secret.type_.as_deref() {
        if type_ != TLS_SECRET_TYPE {
            return Err(TlsValidationError::WrongSecretType(type_.to_string()));
        }
    }

    let cert_chain =
        secret.get(TLS_CERT_KEY).ok_or(TlsValidationError::MissingKey(TLS_CERT_KEY))?;
    let private_key =
        secret.get(TLS_PRIVATE_KEY_KEY).ok_or(TlsValidationError::MissingKey(TLS_PRIVATE_KEY_KEY))?;

    let mut certificates = 0;
    for pem in Pem::iter_from_buffer(cert_chain) {
        let pem = pem.map_err(|e| TlsValidationError::InvalidCertificate(e.to_string()))?;
        if pem.label != "CERTIFICATE" {
            continue;
        }
        pem.parse_x509().map_err(|e| TlsValidationError::InvalidCertificate(e.to_string()))?;
        certificates += 1;
    }
    if certificates == 0 {
        return Err(TlsValidationError::InvalidCertificate("no PEM certificate found".into()));
    }

    let has_key = Pem::iter_from_buffer(private_key)
        .filter_map(|pem| pem.ok())
        .any(|pem| pem.label.ends_with("PRIVATE KEY"));
    if !has_key {
        return Err(TlsValidationError::InvalidPrivateKey);
    }

    Ok(TlsBundle {
        cert_chain: cert_chain.to_vec(),
        private_key: private_key.to_vec(),
        ca: secret.get(CA_CERT_KEY).map(<[u8]>::to_vec),
    })
}

/// Resolve and validate the TLS configuration of an HTTPS listener
pub fn translate_ssl_config(
    queries: &GatewayQueries<'_>,
    gateway: &Gateway,
    listener: &Listener,
) -> Result<SslConfig, SslConfigError> {
    let tls = listener.tls.as_ref().ok_or(SslConfigError::MissingCertificateRef)?;
    if tls.mode == TlsMode::Passthrough {
        return Err(SslConfigError::Passthrough);
    }
    let cert_ref = tls.certificate_refs.first().ok_or(SslConfigError::MissingCertificateRef)?;

    let from = FromObject::new(GroupKind::gateway(), &gateway.metadata);
    let secret = queries.resolve_secret(&from, cert_ref)?;
    let bundle = validate_tls_secret(secret)?;

    Ok(SslConfig { bundle, sni_domains: listener.hostname.iter().cloned().collect() })
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::domain::{ObjectMeta, Secret, TLS_CERT_KEY, TLS_PRIVATE_KEY_KEY, TLS_SECRET_TYPE};

    /// A `kubernetes.io/tls` Secret holding a fresh self-signed certificate
    pub fn tls_secret(namespace: &str, name: &str) -> Secret {
        let certified = rcgen::generate_simple_self_signed(vec!["example.com".to_string()])
            .expect("generate certificate");
        let mut secret = Secret {
            metadata: ObjectMeta::new(namespace, name),
            type_: Some(TLS_SECRET_TYPE.to_string()),
            ..Default::default()
        };
        secret.data.insert(TLS_CERT_KEY.into(), certified.cert.pem().into_bytes());
        secret
            .data
            .insert(TLS_PRIVATE_KEY_KEY.into(), certified.key_pair.serialize_pem().into_bytes());
        secret
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::tls_secret;
    use super::*;
    use crate::domain::{
        GatewaySpec, GatewayTlsConfig, ObjectMeta, ProtocolType, ReferenceGrant,
        ReferenceGrantFrom, ReferenceGrantSpec, ReferenceGrantTo, SecretObjectReference,
        GATEWAY_GROUP, GATEWAY_KIND,
    };
    use crate::storage::ObjectIndex;

    fn https_listener(cert_ref: SecretObjectReference) -> Listener {
        let mut listener =
            Listener::new("https", 443, ProtocolType::Https).with_hostname("example.com");
        listener.tls = Some(GatewayTlsConfig {
            mode: TlsMode::Terminate,
            certificate_refs: vec![cert_ref],
        });
        listener
    }

    fn gateway() -> Gateway {
        Gateway {
            metadata: ObjectMeta::new("default", "gw"),
            spec: GatewaySpec::default(),
            status: None,
        }
    }

    fn cert_ref(namespace: Option<&str>, name: &str) -> SecretObjectReference {
        SecretObjectReference {
            name: name.into(),
            namespace: namespace.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn valid_secret_produces_bundle() {
        let secret = tls_secret("default", "cert");
        let bundle = validate_tls_secret(&secret).unwrap();
        assert!(bundle.ca.is_none());
        assert!(String::from_utf8_lossy(&bundle.cert_chain).contains("BEGIN CERTIFICATE"));
    }

    #[test]
    fn wrong_type_is_rejected() {
        let mut secret = tls_secret("default", "cert");
        secret.type_ = Some("Opaque".into());
        assert_eq!(
            validate_tls_secret(&secret),
            Err(TlsValidationError::WrongSecretType("Opaque".into()))
        );
    }

    #[test]
    fn garbage_certificate_is_rejected() {
        let mut secret = tls_secret("default", "cert");
        secret.data.insert(TLS_CERT_KEY.into(), b"not a certificate".to_vec());
        assert!(matches!(
            validate_tls_secret(&secret),
            Err(TlsValidationError::InvalidCertificate(_))
        ));

        let mut secret = tls_secret("default", "cert");
        secret.data.remove(TLS_PRIVATE_KEY_KEY);
        assert_eq!(
            validate_tls_secret(&secret),
            Err(TlsValidationError::MissingKey(TLS_PRIVATE_KEY_KEY))
        );
    }

    #[test]
    fn key_must_be_a_pem_private_key() {
        let mut secret = tls_secret("default", "cert");
        let chain = secret.get(TLS_CERT_KEY).unwrap().to_vec();
        secret.data.insert(TLS_PRIVATE_KEY_KEY.into(), chain);
        assert_eq!(validate_tls_secret(&secret), Err(TlsValidationError::InvalidPrivateKey));
    }

    #[test]
    fn ssl_config_uses_listener_hostname_as_sni() {
        let index = ObjectIndex::new().with_secret(tls_secret("default", "cert"));
        let queries = GatewayQueries::new(&index);
        let config =
            translate_ssl_config(&queries, &gateway(), &https_listener(cert_ref(None, "cert")))
                .unwrap();
        assert_eq!(config.sni_domains, vec!["example.com".to_string()]);
    }

    #[test]
    fn cross_namespace_secret_needs_grant() {
        let index = ObjectIndex::new().with_secret(tls_secret("certs", "cert"));
        let queries = GatewayQueries::new(&index);
        let listener = https_listener(cert_ref(Some("certs"), "cert"));
        let err = translate_ssl_config(&queries, &gateway(), &listener).unwrap_err();
        assert!(err.is_ref_not_permitted());

        let grant = ReferenceGrant {
            metadata: ObjectMeta::new("certs", "allow-gateways"),
            spec: ReferenceGrantSpec {
                from: vec![ReferenceGrantFrom {
                    group: GATEWAY_GROUP.into(),
                    kind: GATEWAY_KIND.into(),
                    namespace: "default".into(),
                }],
                to: vec![ReferenceGrantTo { group: String::new(), kind: "Secret".into(), name: None }],
            },
        };
        let index = index.with_reference_grant(grant);
        let queries = GatewayQueries::new(&index);
        assert!(translate_ssl_config(&queries, &gateway(), &listener).is_ok());
    }

    #[test]
    fn passthrough_and_missing_refs_fail() {
        let index = ObjectIndex::new();
        let queries = GatewayQueries::new(&index);

        let mut passthrough = https_listener(cert_ref(None, "cert"));
        passthrough.tls.as_mut().unwrap().mode = TlsMode::Passthrough;
        assert_eq!(
            translate_ssl_config(&queries, &gateway(), &passthrough),
            Err(SslConfigError::Passthrough)
        );

        let bare = Listener::new("https", 443, ProtocolType::Https);
        assert_eq!(
            translate_ssl_config(&queries, &gateway(), &bare),
            Err(SslConfigError::MissingCertificateRef)
        );
    }
}
