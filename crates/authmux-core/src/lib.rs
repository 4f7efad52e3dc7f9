//! authmux-core: pure domain logic for rate-limit recovery.
//! Text normalization and classification, the per-pane recovery state
//! machine, and account rotation. No IO, no async.

pub mod error;
pub mod recovery;
pub mod rotation;
pub mod text;
pub mod types;

pub use error::{ParseError, TransitionError};
pub use recovery::{Decision, PaneRecovery, RecoveryPhase, RecoveryPolicy};
pub use rotation::{AccountPool, AccountStatus, Strategy};
pub use text::{Classification, MatchTag, TextMatcher, extract_oauth_urls, normalize};
pub use types::{AuthRequest, AuthRequestStatus, FailureKind, PaneId, Tool};
