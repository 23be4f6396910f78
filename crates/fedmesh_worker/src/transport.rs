//! Transport
//!
//! Owns the gRPC channel to the assigned combiner and the three client
//! stubs that run over it. Channel security is decided once at connect
//! time, first match wins:
//!
//! 1. assignment carries a base64 PEM certificate -> TLS rooted at it
//! 2. `FEDN_GRPC_ROOT_CERT_PATH` points at a PEM file -> TLS rooted at it
//! 3. `config.secure` -> TLS with native roots; with `config.token` also
//!    set, every RPC carries `authorization: Token <token>` metadata
//! 4. otherwise insecure, rewriting a nominal port 443 to 80
//!
//! The narrow capability traits at the bottom are what the pipeline,
//! subscribers and heartbeat monitor actually hold.

use crate::config::{ClientIdentity, WorkerConfig};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use fedmesh_proto::{
    upload_frames, ChunkAssembler, ChunkProgress, ClientAvailableMessage, CombinerClient,
    ConnectorClient, Heartbeat, ModelRequest, ModelServiceClient, ModelUpdate, ModelValidation,
    ProtocolError, StatusMessage, TaskRequest,
};
use thiserror::Error;
use tonic::codegen::http::Uri;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::{Certificate, ClientTlsConfig, Endpoint};
use tonic::Streaming;
use tracing::info;

/// Environment variable naming a PEM root certificate for the combiner
/// channel.
pub const ROOT_CERT_ENV: &str = "FEDN_GRPC_ROOT_CERT_PATH";

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("invalid combiner endpoint: {0}")]
    Endpoint(#[from] tonic::codegen::http::uri::InvalidUri),

    #[error("combiner channel setup failed: {0}")]
    Channel(#[from] tonic::transport::Error),

    #[error("invalid combiner certificate: {0}")]
    Certificate(#[from] base64::DecodeError),

    #[error("failed to read root certificate: {0}")]
    RootCertificate(#[from] std::io::Error),

    #[error("invalid call metadata: {0}")]
    Metadata(#[from] tonic::metadata::errors::InvalidMetadataValue),

    #[error("rpc failed: {0}")]
    Rpc(#[from] tonic::Status),

    #[error(transparent)]
    Transfer(#[from] ProtocolError),
}

/// Live channel to a combiner plus its stub trio. Cloning shares the
/// underlying channel.
#[derive(Clone)]
pub struct CombinerChannel {
    endpoint: String,
    secure: bool,
    auth: Option<MetadataValue<Ascii>>,
    connector: ConnectorClient,
    combiner: CombinerClient,
    models: ModelServiceClient,
}

impl CombinerChannel {
    /// Build the channel for an assignment. The channel connects lazily;
    /// liveness is the heartbeat monitor's concern.
    pub fn connect(
        assignment: &fedmesh_proto::Assignment,
        config: &WorkerConfig,
    ) -> Result<Self, TransportError> {
        // fqdn implies the public ingress: port 443 and TLS
        let (host, mut port) = match assignment.fqdn.as_deref() {
            Some(fqdn) => (fqdn.to_string(), 443),
            None => (assignment.host.clone(), assignment.port),
        };

        let mut auth = None;
        let (endpoint, secure) = if let Some(cert_b64) =
            assignment.certificate.as_deref().filter(|c| !c.is_empty())
        {
            info!("using certificate from assignment for combiner channel");
            let pem = BASE64.decode(cert_b64)?;
            let tls = ClientTlsConfig::new().ca_certificate(Certificate::from_pem(pem));
            let uri: Uri = format!("https://{host}:{port}").parse()?;
            (Endpoint::from(uri).tls_config(tls)?, true)
        } else if let Ok(cert_path) = std::env::var(ROOT_CERT_ENV) {
            info!("using root certificate from {ROOT_CERT_ENV} for combiner channel");
            let pem = std::fs::read(cert_path)?;
            let tls = ClientTlsConfig::new().ca_certificate(Certificate::from_pem(pem));
            let uri: Uri = format!("https://{host}:{port}").parse()?;
            (Endpoint::from(uri).tls_config(tls)?, true)
        } else if config.secure {
            info!("using system CA roots for combiner channel");
            let tls = ClientTlsConfig::new().with_native_roots();
            let uri: Uri = format!("https://{host}:{port}").parse()?;
            if let Some(token) = config.token.as_deref().filter(|t| !t.is_empty()) {
                auth = Some(MetadataValue::try_from(format!("Token {token}"))?);
            }
            (Endpoint::from(uri).tls_config(tls)?, true)
        } else {
            info!("using insecure combiner channel");
            if port == 443 {
                port = 80;
            }
            let uri: Uri = format!("http://{host}:{port}").parse()?;
            (Endpoint::from(uri), false)
        };

        let channel = endpoint.connect_lazy();
        Ok(Self {
            endpoint: format!("{host}:{port}"),
            secure,
            auth,
            connector: ConnectorClient::new(channel.clone()),
            combiner: CombinerClient::new(channel.clone()),
            models: ModelServiceClient::new(channel),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    fn request<T>(&self, message: T) -> tonic::Request<T> {
        let mut request = tonic::Request::new(message);
        if let Some(auth) = &self.auth {
            request.metadata_mut().insert("authorization", auth.clone());
        }
        request
    }

    fn available_message(&self, identity: &ClientIdentity) -> ClientAvailableMessage {
        ClientAvailableMessage {
            sender: Some(identity.as_peer()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    /// Open the model-update request stream, announcing this worker with
    /// `client=<name>` call metadata.
    pub async fn update_request_stream(
        &self,
        identity: &ClientIdentity,
    ) -> Result<Streaming<TaskRequest>, TransportError> {
        let mut request = self.request(self.available_message(identity));
        request
            .metadata_mut()
            .insert("client", MetadataValue::try_from(identity.name.as_str())?);
        let mut client = self.combiner.clone();
        Ok(client.model_update_request_stream(request).await?.into_inner())
    }

    /// Open the model-validation request stream.
    pub async fn validation_request_stream(
        &self,
        identity: &ClientIdentity,
    ) -> Result<Streaming<TaskRequest>, TransportError> {
        let request = self.request(self.available_message(identity));
        let mut client = self.combiner.clone();
        Ok(client
            .model_validation_request_stream(request)
            .await?
            .into_inner())
    }
}

/// Streamed model artifact transfer.
#[async_trait]
pub trait ModelStore: Send + Sync {
    async fn fetch_model(&self, id: &str) -> Result<Vec<u8>, TransportError>;
    async fn push_model(&self, id: &str, bytes: Vec<u8>) -> Result<(), TransportError>;
}

/// Result publishing and status reporting towards the combiner.
#[async_trait]
pub trait CombinerApi: Send + Sync {
    async fn send_model_update(&self, update: ModelUpdate) -> Result<(), TransportError>;
    async fn send_model_validation(
        &self,
        validation: ModelValidation,
    ) -> Result<(), TransportError>;
    async fn send_status(&self, status: StatusMessage) -> Result<(), TransportError>;
}

/// Liveness signalling.
#[async_trait]
pub trait ControlApi: Send + Sync {
    async fn send_heartbeat(&self, heartbeat: Heartbeat) -> Result<(), TransportError>;
}

#[async_trait]
impl ModelStore for CombinerChannel {
    async fn fetch_model(&self, id: &str) -> Result<Vec<u8>, TransportError> {
        let request = self.request(ModelRequest {
            id: id.to_string(),
            ..Default::default()
        });

        let mut client = self.models.clone();
        let mut stream = client.download(request).await?.into_inner();
        let mut assembler = ChunkAssembler::new();
        while let Some(frame) = stream.message().await? {
            match assembler.push(frame.status(), &frame.data, &frame.message)? {
                ChunkProgress::Continue => {}
                ChunkProgress::Done(bytes) => return Ok(bytes),
            }
        }
        Err(ProtocolError::TruncatedStream.into())
    }

    async fn push_model(&self, id: &str, bytes: Vec<u8>) -> Result<(), TransportError> {
        let frames = upload_frames(id, &bytes);
        let request = self.request(tokio_stream::iter(frames));
        let mut client = self.models.clone();
        // the acknowledgement body is opaque; reaching here means success
        client.upload(request).await?;
        Ok(())
    }
}

#[async_trait]
impl CombinerApi for CombinerChannel {
    async fn send_model_update(&self, update: ModelUpdate) -> Result<(), TransportError> {
        let mut client = self.combiner.clone();
        client.send_model_update(self.request(update)).await?;
        Ok(())
    }

    async fn send_model_validation(
        &self,
        validation: ModelValidation,
    ) -> Result<(), TransportError> {
        let mut client = self.combiner.clone();
        client.send_model_validation(self.request(validation)).await?;
        Ok(())
    }

    async fn send_status(&self, status: StatusMessage) -> Result<(), TransportError> {
        let mut client = self.connector.clone();
        client.send_status(self.request(status)).await?;
        Ok(())
    }
}

#[async_trait]
impl ControlApi for CombinerChannel {
    async fn send_heartbeat(&self, heartbeat: Heartbeat) -> Result<(), TransportError> {
        let mut client = self.connector.clone();
        client.send_heartbeat(self.request(heartbeat)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignment(body: &str) -> fedmesh_proto::Assignment {
        serde_json::from_str(body).unwrap()
    }

    fn insecure_config() -> WorkerConfig {
        WorkerConfig {
            name: "worker-1".to_string(),
            client_id: "cid".to_string(),
            discover_host: "discovery".to_string(),
            discover_port: 8092,
            token: None,
            preferred_combiner: None,
            force_ssl: false,
            secure: false,
            verify: false,
            trainer: true,
            validator: true,
            remote_compute_context: true,
            checksum: None,
            heartbeat_interval: 2,
            reconnect_after_missed_heartbeat: 5,
            logfile: None,
        }
    }

    #[test]
    fn test_insecure_channel_rewrites_port_443() {
        let assignment = assignment(r#"{"host": "combiner", "port": 443}"#);
        let channel = CombinerChannel::connect(&assignment, &insecure_config()).unwrap();
        assert_eq!(channel.endpoint(), "combiner:80");
        assert!(!channel.is_secure());
    }

    #[test]
    fn test_fqdn_forces_port_443_and_tls() {
        let assignment = assignment(
            r#"{"host": "combiner", "port": 12080, "fqdn": "combiner.example.com"}"#,
        );
        let mut config = insecure_config();
        config.secure = true;
        let channel = CombinerChannel::connect(&assignment, &config).unwrap();
        assert_eq!(channel.endpoint(), "combiner.example.com:443");
        assert!(channel.is_secure());
    }

    #[test]
    fn test_secure_with_token_attaches_call_credentials() {
        let assignment = assignment(r#"{"host": "combiner", "port": 12080}"#);
        let mut config = insecure_config();
        config.secure = true;
        config.token = Some("secret".to_string());
        let channel = CombinerChannel::connect(&assignment, &config).unwrap();
        assert!(channel.is_secure());
        assert_eq!(
            channel.auth.as_ref().map(|v| v.to_str().unwrap()),
            Some("Token secret")
        );
    }

    #[test]
    fn test_assignment_certificate_wins_over_secure_flag() {
        // self-signed style PEM body; only decoding is exercised here
        let pem = "-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n";
        let encoded = BASE64.encode(pem);
        let assignment = assignment(&format!(
            r#"{{"host": "combiner", "port": 12080, "certificate": "{encoded}"}}"#
        ));
        let channel = CombinerChannel::connect(&assignment, &insecure_config()).unwrap();
        assert!(channel.is_secure());
        // token is only attached on the secure-flag path
        assert!(channel.auth.is_none());
    }

    #[test]
    fn test_invalid_certificate_base64_is_an_error() {
        let assignment =
            assignment(r#"{"host": "combiner", "port": 12080, "certificate": "%%%"}"#);
        let err = CombinerChannel::connect(&assignment, &insecure_config()).unwrap_err();
        assert!(matches!(err, TransportError::Certificate(_)));
    }
}
