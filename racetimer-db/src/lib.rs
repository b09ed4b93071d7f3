//! racetimer-db: database plumbing shared by the service and its tooling
//!
//! Owns the Postgres connection pool (one explicitly constructed pool per
//! process, passed by handle to whoever needs it) and the tenant scope that
//! every tenant-scoped data access runs inside.

pub mod pool;
pub mod tenant;

pub use pool::{ConfigError, Database, DbConfig};
pub use tenant::{clear_tenant, run_scoped, set_tenant, SessionPool, TenantSession, TENANT_SETTING};
