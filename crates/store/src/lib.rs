//! Narrow repository ports in front of the relational schema described in
//! the persisted-state section: api keys, roles, groups, and usage
//! records. The dispatcher and policy enforcer only ever see these
//! traits — no SQL crate is a hard dependency of the admission path.

pub mod apikey;
pub mod memory;
pub mod repo;
pub mod tool_log;

pub use apikey::{generate_api_key, hash_api_key, ApiKeyRecord};
pub use memory::{InMemoryGroupRepository, InMemoryKeyRepository, InMemoryRoleRepository, InMemoryUsageRepository};
pub use repo::{ApiKeyRepository, GroupRepository, RoleRepository, UsageRepository};
pub use tool_log::{InMemoryToolExecutionLogRepository, ToolExecutionLogEntry, ToolExecutionLogRepository};
