//! Authorization predicates the external MQTT broker enforces.
//!
//! The broker calls two functions for every client: a connect check
//! (may this identity log in?) and an ACL check (may it touch this
//! topic?). Both are pure over a [`CredentialSource`], so the rules
//! are testable without a broker or a database.

pub mod predicates;
pub mod source;

pub use predicates::{Access, SUPER_USER, acl_check, connect_check};
pub use source::{AgentCredentials, CredentialSource};
