//! Protocol definitions for client/coordinator communication.
//!
//! This crate defines the typed request and response pairs of the
//! coordinator's RPC surface together with a small framing layer
//! ([`Frame`]) that carries them over any byte transport. The transport
//! itself (connection handling, multiplexing, heartbeats) lives outside
//! this workspace.

pub mod frame;
pub mod requests;
pub mod responses;

pub use frame::{DecodeError, Frame, RequestMessage, ResponseMessage};
pub use requests::{
    BranchDeleteRequest, BranchRegisterRequest, BranchReportRequest, GlobalBeginRequest,
    GlobalCommitRequest, GlobalLockQueryRequest, GlobalReportRequest, GlobalRollbackRequest,
    GlobalStatusRequest,
};
pub use responses::{
    BranchDeleteResponse, BranchRegisterResponse, BranchReportResponse, GlobalBeginResponse,
    GlobalCommitResponse, GlobalLockQueryResponse, GlobalReportResponse, GlobalRollbackResponse,
    GlobalStatusResponse, ResultCode, ResultHeader,
};
