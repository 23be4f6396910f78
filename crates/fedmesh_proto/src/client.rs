//! Hand-maintained gRPC client stubs for the `fedmesh` services.
//!
//! These mirror the shape tonic codegen would produce for the three service
//! definitions (Connector, Combiner, ModelService), pinned to
//! `tonic::transport::Channel`. Keeping them by hand avoids a protoc build
//! dependency; the method paths below are the wire contract.

use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::Channel;
use tonic_prost::ProstCodec;

use crate::messages::{
    Ack, ClientAvailableMessage, Heartbeat, ModelRequest, ModelResponse, ModelUpdate,
    ModelValidation, StatusMessage, TaskRequest,
};

/// Heartbeats and status reporting.
#[derive(Debug, Clone)]
pub struct ConnectorClient {
    inner: tonic::client::Grpc<Channel>,
}

impl ConnectorClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: tonic::client::Grpc::new(channel),
        }
    }

    pub async fn send_heartbeat(
        &mut self,
        request: impl tonic::IntoRequest<Heartbeat>,
    ) -> Result<tonic::Response<Ack>, tonic::Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| tonic::Status::unavailable(format!("service not ready: {e}")))?;
        let codec = ProstCodec::default();
        let path = PathAndQuery::from_static("/fedmesh.Connector/SendHeartbeat");
        self.inner.unary(request.into_request(), path, codec).await
    }

    pub async fn send_status(
        &mut self,
        request: impl tonic::IntoRequest<StatusMessage>,
    ) -> Result<tonic::Response<Ack>, tonic::Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| tonic::Status::unavailable(format!("service not ready: {e}")))?;
        let codec = ProstCodec::default();
        let path = PathAndQuery::from_static("/fedmesh.Connector/SendStatus");
        self.inner.unary(request.into_request(), path, codec).await
    }
}

/// Task request streams and result publishing.
#[derive(Debug, Clone)]
pub struct CombinerClient {
    inner: tonic::client::Grpc<Channel>,
}

impl CombinerClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: tonic::client::Grpc::new(channel),
        }
    }

    pub async fn model_update_request_stream(
        &mut self,
        request: impl tonic::IntoRequest<ClientAvailableMessage>,
    ) -> Result<tonic::Response<tonic::Streaming<TaskRequest>>, tonic::Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| tonic::Status::unavailable(format!("service not ready: {e}")))?;
        let codec = ProstCodec::default();
        let path = PathAndQuery::from_static("/fedmesh.Combiner/ModelUpdateRequestStream");
        self.inner
            .server_streaming(request.into_request(), path, codec)
            .await
    }

    pub async fn model_validation_request_stream(
        &mut self,
        request: impl tonic::IntoRequest<ClientAvailableMessage>,
    ) -> Result<tonic::Response<tonic::Streaming<TaskRequest>>, tonic::Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| tonic::Status::unavailable(format!("service not ready: {e}")))?;
        let codec = ProstCodec::default();
        let path = PathAndQuery::from_static("/fedmesh.Combiner/ModelValidationRequestStream");
        self.inner
            .server_streaming(request.into_request(), path, codec)
            .await
    }

    pub async fn send_model_update(
        &mut self,
        request: impl tonic::IntoRequest<ModelUpdate>,
    ) -> Result<tonic::Response<Ack>, tonic::Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| tonic::Status::unavailable(format!("service not ready: {e}")))?;
        let codec = ProstCodec::default();
        let path = PathAndQuery::from_static("/fedmesh.Combiner/SendModelUpdate");
        self.inner.unary(request.into_request(), path, codec).await
    }

    pub async fn send_model_validation(
        &mut self,
        request: impl tonic::IntoRequest<ModelValidation>,
    ) -> Result<tonic::Response<Ack>, tonic::Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| tonic::Status::unavailable(format!("service not ready: {e}")))?;
        let codec = ProstCodec::default();
        let path = PathAndQuery::from_static("/fedmesh.Combiner/SendModelValidation");
        self.inner.unary(request.into_request(), path, codec).await
    }
}

/// Streamed model artifact transfer.
#[derive(Debug, Clone)]
pub struct ModelServiceClient {
    inner: tonic::client::Grpc<Channel>,
}

impl ModelServiceClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: tonic::client::Grpc::new(channel),
        }
    }

    pub async fn download(
        &mut self,
        request: impl tonic::IntoRequest<ModelRequest>,
    ) -> Result<tonic::Response<tonic::Streaming<ModelResponse>>, tonic::Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| tonic::Status::unavailable(format!("service not ready: {e}")))?;
        let codec = ProstCodec::default();
        let path = PathAndQuery::from_static("/fedmesh.ModelService/Download");
        self.inner
            .server_streaming(request.into_request(), path, codec)
            .await
    }

    pub async fn upload(
        &mut self,
        request: impl tonic::IntoStreamingRequest<Message = ModelRequest>,
    ) -> Result<tonic::Response<ModelResponse>, tonic::Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| tonic::Status::unavailable(format!("service not ready: {e}")))?;
        let codec = ProstCodec::default();
        let path = PathAndQuery::from_static("/fedmesh.ModelService/Upload");
        self.inner
            .client_streaming(request.into_streaming_request(), path, codec)
            .await
    }
}
