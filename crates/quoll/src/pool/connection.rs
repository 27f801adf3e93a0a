use std::fmt::{self, Debug, Formatter};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::Connection;

use super::inner::PoolInner;

/// A connection checked out from a [`Pool`][crate::Pool].
///
/// Dereferences to [`Connection`], so every statement method is available
/// directly. Returned to the pool on drop; the pool validates it, rolls back
/// any transaction left open, and hands it to the next waiter.
pub struct PoolConnection {
    live: Option<Connection>,
    pool: Arc<PoolInner>,
}

const EXPECT_MSG: &str = "BUG: inner connection already taken!";

impl PoolConnection {
    pub(super) fn new(conn: Connection, pool: Arc<PoolInner>) -> Self {
        Self {
            live: Some(conn),
            pool,
        }
    }

    /// Discard this connection instead of returning it, freeing the slot so
    /// the pool may open a replacement.
    pub fn close(mut self) {
        if let Some(conn) = self.live.take() {
            self.pool.discard(conn);
        }
    }
}

impl Debug for PoolConnection {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConnection").field("live", &self.live).finish()
    }
}

impl Deref for PoolConnection {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        self.live.as_ref().expect(EXPECT_MSG)
    }
}

impl DerefMut for PoolConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.live.as_mut().expect(EXPECT_MSG)
    }
}

/// Returns the connection to the [`Pool`][crate::Pool] it was checked out
/// from.
impl Drop for PoolConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.live.take() {
            self.pool.release(conn);
        }
    }
}
