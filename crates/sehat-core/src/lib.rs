//! # sehat-core
//!
//! Foundation types for the Sehat diagnosis client.
//!
//! This crate provides the shared vocabulary that the settings, client and CLI
//! crates depend on:
//!
//! - **IDs**: [`SessionId`], the server-issued identifier scoping one follow-up exchange
//! - **Backoff**: [`BackoffPolicy`] and [`RetryBudget`] for retries and reconnects
//! - **Protocol**: inbound/outbound duplex frames and their parser
//! - **Intake**: patient intake payload, validation, and the session snapshot document
//! - **History**: the ordered question/answer [`Turn`] log with its alternation rules
//! - **Errors**: the [`Failure`] taxonomy shared by every callback
//! - **Logging**: `tracing` subscriber setup and a capture layer for tests

#![deny(unsafe_code)]

pub mod backoff;
pub mod errors;
pub mod history;
pub mod ids;
pub mod intake;
pub mod logging;
pub mod protocol;

pub use backoff::{BackoffPolicy, RetryBudget};
pub use errors::{Failure, IntakeError, SessionError};
pub use history::{PushOutcome, QuestionHistory, Turn};
pub use ids::SessionId;
pub use intake::{Gender, PatientIntake, SessionSnapshot};
pub use protocol::{AnswerOption, InboundFrame, OutboundFrame, ProtocolError, Question};
