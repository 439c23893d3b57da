//! Error taxonomy, shared data model, and the Key Validator for the
//! vault-unseal operator.
//!
//! This crate has no async runtime dependency: every type here is either
//! plain data or a pure function, so the client, strategy, and controller
//! crates can depend on it without pulling in `tokio`.

pub mod error;
pub mod model;
pub mod validator;

pub use error::{BoxError, ErrorKind, UnsealError};
pub use model::{Condition, ConditionStatus, InstanceDescriptor, InstanceStatus, READY_CONDITION};
pub use validator::{is_sensitive, DefaultKeyValidator, KeyValidator, StrictKeyValidator};
