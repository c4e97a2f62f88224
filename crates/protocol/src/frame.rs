//! Wire framing for coordinator traffic.
//!
//! A [`Frame`] is the unit the transport moves: a header map carrying the
//! message kind plus a JSON payload body. [`RequestMessage`] and
//! [`ResponseMessage`] are the typed views; converting between them and
//! frames is lossless, which the codec tests pin down.

use crate::requests::*;
use crate::responses::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Header naming the payload type of a frame.
pub const KIND_HEADER: &str = "kind";

/// A transport-level message: headers plus serialized payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Frame {
    /// Build a frame with a single kind header.
    pub fn new(kind: &str, body: Vec<u8>) -> Self {
        let mut headers = HashMap::new();
        headers.insert(KIND_HEADER.to_string(), kind.to_string());
        Self { headers, body }
    }

    /// Get a header value.
    pub fn get_header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(|s| s.as_str())
    }

    /// Serialize the frame for the wire.
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("frame serialization cannot fail")
    }

    /// Parse a frame from wire bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        serde_json::from_slice(bytes).map_err(DecodeError::InvalidFrame)
    }
}

/// Errors that can occur when decoding frames into typed messages.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("unknown message kind: {0}")]
    UnknownKind(String),

    #[error("invalid frame: {0}")]
    InvalidFrame(#[source] serde_json::Error),

    #[error("invalid payload for {kind}: {source}")]
    InvalidPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

macro_rules! message_enum {
    ($name:ident { $($variant:ident($payload:ty) = $kind:literal),+ $(,)? }) => {
        /// Typed view over every frame kind in one direction.
        #[derive(Debug, Clone, PartialEq)]
        pub enum $name {
            $($variant($payload),)+
        }

        impl $name {
            /// The kind string written into the frame header.
            pub fn kind(&self) -> &'static str {
                match self {
                    $(Self::$variant(_) => $kind,)+
                }
            }

            /// Convert to a transport frame.
            pub fn into_frame(self) -> Frame {
                match self {
                    $(Self::$variant(payload) => Frame::new(
                        $kind,
                        serde_json::to_vec(&payload)
                            .expect("payload serialization cannot fail"),
                    ),)+
                }
            }

            /// Parse from a transport frame.
            pub fn from_frame(frame: &Frame) -> Result<Self, DecodeError> {
                let kind = frame
                    .get_header(KIND_HEADER)
                    .ok_or(DecodeError::MissingHeader(KIND_HEADER))?;
                match kind {
                    $($kind => serde_json::from_slice(&frame.body)
                        .map(Self::$variant)
                        .map_err(|source| DecodeError::InvalidPayload {
                            kind: kind.to_string(),
                            source,
                        }),)+
                    other => Err(DecodeError::UnknownKind(other.to_string())),
                }
            }
        }
    };
}

message_enum!(RequestMessage {
    GlobalBegin(GlobalBeginRequest) = "global_begin",
    GlobalCommit(GlobalCommitRequest) = "global_commit",
    GlobalRollback(GlobalRollbackRequest) = "global_rollback",
    GlobalStatus(GlobalStatusRequest) = "global_status",
    GlobalReport(GlobalReportRequest) = "global_report",
    BranchRegister(BranchRegisterRequest) = "branch_register",
    BranchReport(BranchReportRequest) = "branch_report",
    BranchDelete(BranchDeleteRequest) = "branch_delete",
    GlobalLockQuery(GlobalLockQueryRequest) = "global_lock_query",
});

message_enum!(ResponseMessage {
    GlobalBegin(GlobalBeginResponse) = "global_begin_response",
    GlobalCommit(GlobalCommitResponse) = "global_commit_response",
    GlobalRollback(GlobalRollbackResponse) = "global_rollback_response",
    GlobalStatus(GlobalStatusResponse) = "global_status_response",
    GlobalReport(GlobalReportResponse) = "global_report_response",
    BranchRegister(BranchRegisterResponse) = "branch_register_response",
    BranchReport(BranchReportResponse) = "branch_report_response",
    BranchDelete(BranchDeleteResponse) = "branch_delete_response",
    GlobalLockQuery(GlobalLockQueryResponse) = "global_lock_query_response",
});

#[cfg(test)]
mod tests {
    use super::*;
    use concord_common::{BranchStatus, BranchType, GlobalStatus};

    #[test]
    fn test_branch_delete_request_roundtrip() {
        let request = RequestMessage::BranchDelete(BranchDeleteRequest {
            xid: "127.0.0.1:8091:2000042".to_string(),
            branch_id: 2000043,
            resource_id: "jdbc:mysql://orders".to_string(),
            branch_type: BranchType::At,
        });
        let bytes = request.clone().into_frame().encode();
        let decoded = RequestMessage::from_frame(&Frame::decode(&bytes).unwrap()).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_begin_pair_roundtrip() {
        let request = RequestMessage::GlobalBegin(GlobalBeginRequest {
            application_id: "order-service".to_string(),
            transaction_service_group: "default_tx_group".to_string(),
            transaction_name: "purchase".to_string(),
            timeout_ms: 60_000,
        });
        let frame = request.clone().into_frame();
        assert_eq!(frame.get_header(KIND_HEADER), Some("global_begin"));
        assert_eq!(
            RequestMessage::from_frame(&frame).unwrap(),
            request
        );

        let response = ResponseMessage::GlobalBegin(GlobalBeginResponse {
            header: ResultHeader::success(),
            xid: Some("127.0.0.1:8091:2000042".to_string()),
        });
        let bytes = response.clone().into_frame().encode();
        let decoded = ResponseMessage::from_frame(&Frame::decode(&bytes).unwrap()).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn test_failed_response_preserves_error_fields() {
        let err = concord_common::TransactionError::new(
            concord_common::ErrorCode::LockKeyConflict,
            "orders:1 held by another transaction",
        );
        let response = ResponseMessage::BranchRegister(BranchRegisterResponse {
            header: ResultHeader::failed(&err),
            branch_id: None,
        });
        let frame = response.clone().into_frame();
        let decoded = ResponseMessage::from_frame(&frame).unwrap();
        assert_eq!(decoded, response);
        match decoded {
            ResponseMessage::BranchRegister(r) => {
                assert_eq!(r.header.code, ResultCode::Failed);
                assert_eq!(
                    r.header.error,
                    Some(concord_common::ErrorCode::LockKeyConflict)
                );
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_status_report_roundtrip() {
        let request = RequestMessage::GlobalReport(GlobalReportRequest {
            xid: "127.0.0.1:8091:7".to_string(),
            global_status: GlobalStatus::Committed,
        });
        let frame = request.clone().into_frame();
        assert_eq!(RequestMessage::from_frame(&frame).unwrap(), request);

        let response = ResponseMessage::BranchDelete(BranchDeleteResponse {
            header: ResultHeader::success(),
            branch_status: BranchStatus::PhaseTwoRollbacked,
        });
        let frame = response.clone().into_frame();
        assert_eq!(ResponseMessage::from_frame(&frame).unwrap(), response);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let frame = Frame::new("global_begone", Vec::new());
        assert!(matches!(
            RequestMessage::from_frame(&frame),
            Err(DecodeError::UnknownKind(_))
        ));
    }

    #[test]
    fn test_missing_kind_header_rejected() {
        let frame = Frame {
            headers: HashMap::new(),
            body: Vec::new(),
        };
        assert!(matches!(
            RequestMessage::from_frame(&frame),
            Err(DecodeError::MissingHeader(_))
        ));
    }
}
