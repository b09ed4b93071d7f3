use crate::error::{MigrateError, Result};

/// Environment name that marks a deployment as production.
pub const PRODUCTION: &str = "production";

/// Gate for operations that rewrite history (`rebaseline`, `down`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnvironmentGuard {
    production: bool,
    force: bool,
}

impl EnvironmentGuard {
    pub fn new(production: bool, force: bool) -> Self {
        Self { production, force }
    }

    /// Build from the deployment's environment name (`MIGRATION_ENV` or
    /// `NODE_ENV`) and the override flag.
    pub fn from_environment(environment: Option<&str>, force: bool) -> Self {
        Self::new(environment == Some(PRODUCTION), force)
    }

    pub fn is_production(&self) -> bool {
        self.production
    }

    pub fn check(&self, action: &'static str) -> Result<()> {
        if self.production && !self.force {
            return Err(MigrateError::GuardRefused { action });
        }
        if self.production {
            tracing::warn!(action, "running destructive migration operation in production (forced)");
        }
        Ok(())
    }
}
