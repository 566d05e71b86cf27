//! Permission policy layered in front of the remote API
//!
//! - [`scopes`]: what the OAuth grant allows, enforced per account
//! - [`guard`]: what is refused no matter what the grant allows

pub mod guard;
pub mod scopes;

pub use guard::{
    DANGEROUS_LABELS, RestrictedKind, RestrictedOperation, check_label_additions,
    is_dangerous_label,
};
pub use scopes::{AccessMode, AccessTier, Capability, ensure_capability};
