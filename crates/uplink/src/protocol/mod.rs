//! Protocol definitions shared with the controller.
//!
//! This module contains the records exchanged over the request/response path
//! and the `{type, data}` envelope carried by the push channel.

pub mod envelope;
pub mod types;

pub use envelope::{Envelope, PushMessage};
pub use types::{
    CheckResult, CheckStatus, Registration, RegistrationAck, SubmissionReceipt, Target,
    timestamp_now,
};
