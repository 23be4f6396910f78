//! Message and enum definitions for the `fedmesh` gRPC package.
//!
//! Tags are part of the wire contract; renumbering is a breaking change.

/// Network actor identity carried on every message.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Peer {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(enumeration = "Role", tag = "2")]
    pub role: i32,
}

impl Peer {
    pub fn new(name: impl Into<String>, role: Role) -> Self {
        Self {
            name: name.into(),
            role: role as i32,
        }
    }

    pub fn role(&self) -> Role {
        Role::try_from(self.role).unwrap_or(Role::Other)
    }
}

/// Liveness signal sent to the combiner at a fixed cadence.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Heartbeat {
    #[prost(message, optional, tag = "1")]
    pub sender: ::core::option::Option<Peer>,
}

/// Free-form status report mirrored into the combiner's event log.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StatusMessage {
    #[prost(message, optional, tag = "1")]
    pub sender: ::core::option::Option<Peer>,
    #[prost(string, tag = "2")]
    pub timestamp: ::prost::alloc::string::String,
    #[prost(enumeration = "LogLevel", tag = "3")]
    pub log_level: i32,
    #[prost(string, tag = "4")]
    pub status: ::prost::alloc::string::String,
    #[prost(enumeration = "StatusType", tag = "5")]
    pub status_type: i32,
    #[prost(string, tag = "6")]
    pub data: ::prost::alloc::string::String,
}

impl StatusMessage {
    pub fn log_level(&self) -> LogLevel {
        LogLevel::try_from(self.log_level).unwrap_or(LogLevel::Info)
    }

    pub fn status_type(&self) -> StatusType {
        StatusType::try_from(self.status_type).unwrap_or(StatusType::Log)
    }
}

/// Announces a worker on a request-subscription stream.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClientAvailableMessage {
    #[prost(message, optional, tag = "1")]
    pub sender: ::core::option::Option<Peer>,
    #[prost(string, tag = "2")]
    pub timestamp: ::prost::alloc::string::String,
}

/// A unit of work pushed by the combiner: train, or validate/infer.
///
/// `is_inference` is only meaningful on the validation stream.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TaskRequest {
    #[prost(message, optional, tag = "1")]
    pub sender: ::core::option::Option<Peer>,
    #[prost(message, optional, tag = "2")]
    pub receiver: ::core::option::Option<Peer>,
    #[prost(string, tag = "3")]
    pub model_id: ::prost::alloc::string::String,
    #[prost(string, tag = "4")]
    pub data: ::prost::alloc::string::String,
    #[prost(string, tag = "5")]
    pub correlation_id: ::prost::alloc::string::String,
    #[prost(string, tag = "6")]
    pub timestamp: ::prost::alloc::string::String,
    #[prost(bool, tag = "7")]
    pub is_inference: bool,
}

/// Result of a completed training task.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ModelUpdate {
    #[prost(message, optional, tag = "1")]
    pub sender: ::core::option::Option<Peer>,
    #[prost(message, optional, tag = "2")]
    pub receiver: ::core::option::Option<Peer>,
    #[prost(string, tag = "3")]
    pub model_id: ::prost::alloc::string::String,
    #[prost(string, tag = "4")]
    pub model_update_id: ::prost::alloc::string::String,
    #[prost(string, tag = "5")]
    pub timestamp: ::prost::alloc::string::String,
    #[prost(string, tag = "6")]
    pub correlation_id: ::prost::alloc::string::String,
    #[prost(string, tag = "7")]
    pub meta: ::prost::alloc::string::String,
}

/// Result of a completed validation or inference task.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ModelValidation {
    #[prost(message, optional, tag = "1")]
    pub sender: ::core::option::Option<Peer>,
    #[prost(message, optional, tag = "2")]
    pub receiver: ::core::option::Option<Peer>,
    #[prost(string, tag = "3")]
    pub model_id: ::prost::alloc::string::String,
    #[prost(string, tag = "4")]
    pub data: ::prost::alloc::string::String,
    #[prost(string, tag = "5")]
    pub timestamp: ::prost::alloc::string::String,
    #[prost(string, tag = "6")]
    pub correlation_id: ::prost::alloc::string::String,
}

/// One frame of a model artifact transfer (both directions).
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ModelRequest {
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    #[prost(enumeration = "ModelStatus", tag = "2")]
    pub status: i32,
    #[prost(bytes = "vec", tag = "3")]
    pub data: ::prost::alloc::vec::Vec<u8>,
}

impl ModelRequest {
    pub fn status(&self) -> ModelStatus {
        ModelStatus::try_from(self.status).unwrap_or(ModelStatus::Failed)
    }
}

/// One frame of a model download, or the upload acknowledgement.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ModelResponse {
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    #[prost(enumeration = "ModelStatus", tag = "2")]
    pub status: i32,
    #[prost(bytes = "vec", tag = "3")]
    pub data: ::prost::alloc::vec::Vec<u8>,
    #[prost(string, tag = "4")]
    pub message: ::prost::alloc::string::String,
}

impl ModelResponse {
    pub fn status(&self) -> ModelStatus {
        ModelStatus::try_from(self.status).unwrap_or(ModelStatus::Failed)
    }
}

/// Opaque acknowledgement for unary calls.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Ack {
    #[prost(message, optional, tag = "1")]
    pub sender: ::core::option::Option<Peer>,
    #[prost(string, tag = "2")]
    pub response: ::prost::alloc::string::String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Role {
    Worker = 0,
    Combiner = 1,
    Reducer = 2,
    Other = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ModelStatus {
    Ok = 0,
    InProgress = 1,
    Failed = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum StatusType {
    Log = 0,
    ModelUpdateRequest = 1,
    ModelUpdate = 2,
    ModelValidationRequest = 3,
    ModelValidation = 4,
    Inference = 5,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum LogLevel {
    Info = 0,
    Debug = 1,
    Warning = 2,
    Error = 3,
    Audit = 4,
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_task_request_roundtrip() {
        let request = TaskRequest {
            sender: Some(Peer::new("combiner0", Role::Combiner)),
            receiver: Some(Peer::new("worker0", Role::Worker)),
            model_id: "m1".to_string(),
            data: "{}".to_string(),
            correlation_id: "c1".to_string(),
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            is_inference: false,
        };

        let bytes = request.encode_to_vec();
        let decoded = TaskRequest::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, request);
        assert_eq!(decoded.sender.unwrap().role(), Role::Combiner);
    }

    #[test]
    fn test_unknown_enum_values_are_defensive() {
        let frame = ModelResponse {
            id: "m1".to_string(),
            status: 99,
            data: vec![],
            message: String::new(),
        };
        assert_eq!(frame.status(), ModelStatus::Failed);

        let peer = Peer {
            name: "x".to_string(),
            role: 42,
        };
        assert_eq!(peer.role(), Role::Other);
    }
}
