//! Access control
//!
//! Session tokens, the user whitelist, and repository permission checks
//! delegated to the issue tracker.

pub mod collaborator;
mod control;
pub mod guard;
mod session;
mod token;

pub use collaborator::{
    parse_repo_ref, ApiEnvelope, GitHubTracker, IssueTracker, RepoPermission, RepoPermissions,
    TrackerUser,
};
pub use control::AccessControl;
pub use guard::{require_admin, require_auth, AccessDecision};
pub use session::{LoginError, LoginOutcome};
pub use token::{Claims, Identity, TokenIssuer};
