//! # sehat-client
//!
//! Client runtime for the Sehat diagnosis service.
//!
//! - **Gateway**: [`RequestGateway`], request/response calls with bounded retries
//! - **Link**: [`DuplexLink`], a reconnecting duplex channel driven by one
//!   explicit state machine ([`LinkMachine`])
//! - **Session**: [`QuestionAnswerSession`], the follow-up question/answer
//!   protocol over a link, reported through a [`SessionObserver`]
//! - **Flow**: [`DiagnosisFlowController`], intake, follow-up, then report
//! - **Report**: [`ReportDocument`], the downloaded report bytes

#![deny(unsafe_code)]

pub mod flow;
pub mod gateway;
pub mod link;
pub mod report;
pub mod session;

pub use flow::{DiagnosisFlowController, DiagnosisStep, FlowError};
pub use gateway::{GatewayConfig, GatewayError, ProgressFn, RequestGateway};
pub use link::{
    ConnectionState, Connector, DuplexLink, LinkConfig, LinkMachine, LinkNotice, WsConnector,
};
pub use report::ReportDocument;
pub use session::{NoopObserver, QuestionAnswerSession, SessionObserver, SessionPhase};
