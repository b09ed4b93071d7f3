//! Tenant-scoped sessions
//!
//! Row-visibility policies in the database key off the session setting
//! [`TENANT_SETTING`]. [`run_scoped`] is the only supported way to reach
//! tenant data: it leases one connection, attaches the tenant to that
//! connection's session, runs the caller's work, then clears the tenant before
//! the connection can be handed to anyone else.
//!
//! A connection whose tenant could not be cleared is never recycled. It is
//! closed instead, and the pool opens a replacement. The same happens when a
//! scope is abandoned mid-flight (the future is dropped or the work panics).

use std::ops::DerefMut;

use async_trait::async_trait;
use futures::future::BoxFuture;
use sqlx::pool::PoolConnection;
use sqlx::{PgConnection, PgPool, Postgres};

/// Session setting carrying the current tenant (organization) id.
pub const TENANT_SETTING: &str = "app.current_org_id";

/// Attach `tenant_id` to the session for the rest of its life (not just the
/// current transaction).
pub async fn set_tenant(conn: &mut PgConnection, tenant_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT set_config($1, $2, false)")
        .bind(TENANT_SETTING)
        .bind(tenant_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Reset the session's tenant setting.
pub async fn clear_tenant(conn: &mut PgConnection) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT set_config($1, NULL, false)")
        .bind(TENANT_SETTING)
        .execute(conn)
        .await?;
    Ok(())
}

/// A database session that can carry a tenant identity.
#[async_trait]
pub trait TenantSession: Send {
    async fn attach_tenant(&mut self, tenant_id: &str) -> Result<(), sqlx::Error>;
    async fn detach_tenant(&mut self) -> Result<(), sqlx::Error>;
}

#[async_trait]
impl TenantSession for PgConnection {
    async fn attach_tenant(&mut self, tenant_id: &str) -> Result<(), sqlx::Error> {
        set_tenant(self, tenant_id).await
    }

    async fn detach_tenant(&mut self) -> Result<(), sqlx::Error> {
        clear_tenant(self).await
    }
}

/// A pool that leases exclusive sessions.
///
/// Dropping a lease returns its session to the pool unless [`discard`]
/// was called on it first.
///
/// [`discard`]: SessionPool::discard
#[async_trait]
pub trait SessionPool: Send + Sync {
    type Session: TenantSession;
    type Lease: DerefMut<Target = Self::Session> + Send;

    async fn lease(&self) -> Result<Self::Lease, sqlx::Error>;

    /// Mark the lease so that dropping it closes the session instead of
    /// recycling it.
    fn discard(lease: &mut Self::Lease);
}

#[async_trait]
impl SessionPool for PgPool {
    type Session = PgConnection;
    type Lease = PoolConnection<Postgres>;

    async fn lease(&self) -> Result<Self::Lease, sqlx::Error> {
        self.acquire().await
    }

    fn discard(lease: &mut Self::Lease) {
        lease.close_on_drop();
    }
}

/// Holds the leased session for one scope. Unless the tenant was cleared, the
/// session is discarded on drop.
struct ScopedLease<P: SessionPool> {
    lease: P::Lease,
    cleared: bool,
}

impl<P: SessionPool> ScopedLease<P> {
    fn new(lease: P::Lease) -> Self {
        Self {
            lease,
            cleared: false,
        }
    }

    fn session(&mut self) -> &mut P::Session {
        &mut self.lease
    }

    async fn release(mut self, tenant_id: &str) {
        match self.session().detach_tenant().await {
            Ok(()) => self.cleared = true,
            Err(error) => {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    error = %error,
                    "failed to clear tenant context, discarding connection"
                );
            }
        }
    }
}

impl<P: SessionPool> Drop for ScopedLease<P> {
    fn drop(&mut self) {
        if !self.cleared {
            tracing::debug!("tenant scope ended without clearing, connection discarded");
            P::discard(&mut self.lease);
        }
    }
}

/// Run `work` on a leased session carrying `tenant_id`.
///
/// The tenant is cleared after `work` finishes, whether it succeeded or not.
/// A failure to clear is logged and never replaces `work`'s result. Errors
/// from leasing or attaching propagate through `E::from`.
///
/// ```ignore
/// let entries = run_scoped(&pool, &org_id, |conn| {
///     Box::pin(async move {
///         sqlx::query_as::<_, Entry>("SELECT * FROM entries")
///             .fetch_all(&mut *conn)
///             .await
///     })
/// })
/// .await?;
/// ```
pub async fn run_scoped<P, T, E, F>(pool: &P, tenant_id: &str, work: F) -> Result<T, E>
where
    P: SessionPool,
    E: From<sqlx::Error>,
    F: for<'c> FnOnce(&'c mut P::Session) -> BoxFuture<'c, Result<T, E>>,
{
    let mut scope = ScopedLease::<P>::new(pool.lease().await?);

    let attached = scope.session().attach_tenant(tenant_id).await;
    let outcome = match attached {
        Ok(()) => work(scope.session()).await,
        Err(error) => Err(E::from(error)),
    };

    scope.release(tenant_id).await;
    outcome
}
