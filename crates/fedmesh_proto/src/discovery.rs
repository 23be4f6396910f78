//! JSON body types for the discovery control plane.
//!
//! Assignment negotiation is plain HTTP: `POST /assign` with an
//! [`AssignRequest`] body and `Authorization: Token <token>` returns an
//! [`Assignment`] on success. Compute packages come from `GET /package`,
//! their server-side digest from `GET /package_checksum`.

use serde::{Deserialize, Serialize};

/// Body of `POST /assign`.
#[derive(Debug, Clone, Serialize)]
pub struct AssignRequest {
    pub name: String,
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_combiner: Option<String>,
    pub force_ssl: bool,
    pub verify: bool,
}

/// Combiner assignment returned by the discovery service.
///
/// When `fqdn` is present the channel must use port 443 and TLS.
#[derive(Debug, Clone, Deserialize)]
pub struct Assignment {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub fqdn: Option<String>,
    /// Base64-encoded PEM root certificate for the combiner channel.
    #[serde(default)]
    pub certificate: Option<String>,
    #[serde(default)]
    pub helper_type: Option<String>,
    #[serde(default)]
    pub package: Option<String>,
}

/// Body of `GET /package_checksum`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChecksumResponse {
    pub checksum: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignment_minimal_body() {
        let body = r#"{"host": "combiner.example.com", "port": 12080}"#;
        let assignment: Assignment = serde_json::from_str(body).unwrap();
        assert_eq!(assignment.host, "combiner.example.com");
        assert_eq!(assignment.port, 12080);
        assert!(assignment.fqdn.is_none());
        assert!(assignment.certificate.is_none());
        assert!(assignment.helper_type.is_none());
    }

    #[test]
    fn test_assignment_full_body() {
        let body = r#"{
            "host": "combiner",
            "port": 443,
            "fqdn": "combiner.example.com",
            "certificate": "LS0tLS1CRUdJTg==",
            "helper_type": "binary",
            "package": "remote"
        }"#;
        let assignment: Assignment = serde_json::from_str(body).unwrap();
        assert_eq!(assignment.fqdn.as_deref(), Some("combiner.example.com"));
        assert_eq!(assignment.helper_type.as_deref(), Some("binary"));
    }
}
