//! Tallybank Common Types
//!
//! Shared types used across the tallybank ledger: identifiers, currency and
//! exchange-rate definitions, the transfer error taxonomy and clock helpers.

pub mod identifiers;
pub mod monetary;
pub mod error;
pub mod time;

pub use identifiers::*;
pub use monetary::*;
pub use error::*;
pub use time::*;
