//! Database repositories.
//!
//! Each repository is a narrow `async_trait` capability with a sqlx-backed
//! implementation. The command queue repository is the single arbiter for
//! command state transitions.

pub mod audit;
pub mod command_queue;
pub mod node;
pub mod onboarding;
pub mod policy;
pub mod script;
pub mod settings;
pub mod terminal;
pub mod update;

pub use audit::{AuditRepository, SqlxAuditRepository};
pub use command_queue::{CommandQueueRepository, SqlxCommandQueueRepository};
pub use node::{NodeRepository, SqlxNodeRepository};
pub use onboarding::{OnboardingRepository, SqlxOnboardingRepository};
pub use policy::{PolicyRepository, SqlxPolicyRepository};
pub use script::{ScriptRepository, SqlxScriptRepository};
pub use settings::{SettingsRepository, SqlxSettingsRepository};
pub use terminal::{SqlxTerminalSessionRepository, TerminalSessionRepository};
pub use update::{SqlxSystemUpdateRepository, SystemUpdateRepository};
