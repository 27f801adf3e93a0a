use std::{sync::Arc, time::Duration};

use log::LevelFilter;

use crate::{
    ConnInfo, Error, Result, logger::LogSettings, pool::Pool, wire::Connector,
};

/// Configure and open a Quoll client.
///
/// `Quoll` collects the client-side settings — pool sizing, acquire
/// deadline, statement logging — and combines them with a parsed connection
/// string and a wire-driver [`Connector`] to produce a [`Pool`]:
///
/// ```no_run
/// # async fn open(driver: impl quoll::Connector) -> quoll::Result<()> {
/// let pool = quoll::Quoll::new()
///     .max_connections(5)
///     .open("host=localhost user=postgres dbname=app", driver)
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Quoll {
    pub(crate) log_settings: LogSettings,
    pub(crate) pool_max_connections: u32,
    pub(crate) pool_acquire_timeout: Duration,
}

impl Default for Quoll {
    fn default() -> Self {
        Self::new()
    }
}

impl Quoll {
    /// Construct `Self` with default options.
    ///
    /// See the source of this method for the current defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            log_settings: Default::default(),
            pool_max_connections: 10,
            pool_acquire_timeout: Duration::from_secs(30),
        }
    }

    /// Set the maximum number of connections the pool will hold open.
    ///
    /// Be mindful of the connection limits configured on the database server
    /// as well as other applications connecting to the same database.
    #[must_use]
    pub fn max_connections(mut self, max: u32) -> Self {
        self.pool_max_connections = max;
        self
    }

    /// Set the maximum amount of time to spend waiting in
    /// [`Pool::acquire()`][crate::Pool::acquire], across queueing and
    /// connection opening.
    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.pool_acquire_timeout = timeout;
        self
    }

    /// Log every executed statement at the given level.
    #[must_use]
    pub fn log_statements(mut self, level: LevelFilter) -> Self {
        self.log_settings.log_statements(level);
        self
    }

    /// Escalate statements slower than `duration` to the given level.
    #[must_use]
    pub fn log_slow_statements(mut self, level: LevelFilter, duration: Duration) -> Self {
        self.log_settings.log_slow_statements(level, duration);
        self
    }

    /// Parse `conninfo`, validate the configuration, and open a pool backed
    /// by `connector`.
    ///
    /// One connection is established up front so that configuration errors
    /// surface here rather than on first use.
    pub async fn open(self, conninfo: &str, connector: impl Connector) -> Result<Pool> {
        if self.pool_max_connections < 1 {
            return Err(Error::BadArgument(
                "max_connections must be at least 1".into(),
            ));
        }
        let conninfo = ConnInfo::parse(conninfo)?;
        Pool::new(self, conninfo, Arc::new(connector)).await
    }
}
