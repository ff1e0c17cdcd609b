//! Failover-aware client for a Sentinel-managed master.
//!
//! Holds a pool bound to the master address Sentinel last reported, plus the
//! known sentinel addresses. Commands run on whichever pool is current. A
//! monitoring driver calls [`SentinelClient::ensure_master`] and
//! [`SentinelClient::ensure_sentinel_addrs`] against a sentinel connection
//! (or [`SentinelClient::refresh`], which does both) to follow failovers.
//!
//! Every command holds the shared state lock until it finishes, so a pool
//! swap waits for in-flight calls and the old pool is only closed once
//! they are done. Dialing the new master happens outside the lock.

use crate::config::{ConnectionConfig, Topology};
use crate::connection::pool::PoolDialer;
use crate::connection::tcp::RedisConnection;
use crate::connection::{CommandConn, Dialer, Pool};
use crate::error::{HaError, Result};
use crate::resp::types::RespValue;
use crate::router::Router;
use crate::sentinel::reply;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

struct State<P> {
    /// `None` until the first successful `ensure_master`.
    pool: Option<Arc<P>>,
    /// Address `pool` is bound to; empty before the first resolution.
    addr: String,
    /// Known sentinels, the one last talked to first.
    sentinel_addrs: Vec<String>,
}

/// Client for the master of one Sentinel-monitored service.
pub struct SentinelClient<D: Dialer> {
    state: RwLock<State<D::Pool>>,
    master_name: String,
    dialer: D,
    /// Seeds and credentials for [`SentinelClient::refresh`].
    config: Option<ConnectionConfig>,
}

impl SentinelClient<PoolDialer> {
    /// Build a client from a `redis+sentinel://` configuration and resolve
    /// the master once.
    pub async fn connect(config: ConnectionConfig) -> Result<Self> {
        let Topology::Sentinel { master_name, .. } = &config.topology else {
            return Err(HaError::Sentinel(
                "configuration does not name a sentinel topology".into(),
            ));
        };
        let client = Self::with_config(
            master_name.clone(),
            PoolDialer::new(config.clone()),
            config,
        );
        client.refresh().await?;
        Ok(client)
    }
}

impl<D: Dialer> SentinelClient<D> {
    /// A client with no master yet; commands fail until `ensure_master`
    /// succeeds.
    pub fn new(master_name: impl Into<String>, dialer: D) -> Self {
        Self {
            state: RwLock::new(State {
                pool: None,
                addr: String::new(),
                sentinel_addrs: Vec::new(),
            }),
            master_name: master_name.into(),
            dialer,
            config: None,
        }
    }

    /// Like [`SentinelClient::new`], keeping `config` for [`SentinelClient::refresh`].
    pub fn with_config(master_name: impl Into<String>, dialer: D, config: ConnectionConfig) -> Self {
        let mut client = Self::new(master_name, dialer);
        client.config = Some(config);
        client
    }

    pub fn master_name(&self) -> &str {
        &self.master_name
    }

    pub fn dialer(&self) -> &D {
        &self.dialer
    }

    /// Address of the current master, empty before the first resolution.
    pub async fn master_addr(&self) -> String {
        self.state.read().await.addr.clone()
    }

    /// Known sentinel addresses, most recently used first.
    pub async fn sentinel_addrs(&self) -> Vec<String> {
        self.state.read().await.sentinel_addrs.clone()
    }

    /// Check out a connection to the current master. The read lock covers
    /// the checkout only; dropping the connection later returns it to the
    /// pool it came from, even if that pool has since been replaced.
    pub async fn get(&self) -> Result<<D::Pool as Pool>::Conn> {
        let state = self.state.read().await;
        let pool = Arc::clone(master_pool(&state)?);
        pool.get().await
    }

    /// Close the current pool.
    pub async fn close(&self) {
        if let Some(pool) = &self.state.read().await.pool {
            pool.close();
        }
    }

    /// Ask `conn` (a sentinel) where the master is and switch pools if it
    /// moved.
    ///
    /// The new pool is dialed before the write lock is taken, so callers
    /// keep using the old pool meanwhile. The swap itself waits for calls
    /// already running on the old pool, then closes it. A failed dial
    /// leaves everything as it was.
    pub async fn ensure_master<C: CommandConn>(&self, conn: &mut C) -> Result<()> {
        let current = self.master_addr().await;
        let response = conn
            .execute_str(&["SENTINEL", "MASTER", self.master_name.as_str()])
            .await?;
        let addr = reply::master_addr(&response)?;
        if addr == current {
            return Ok(());
        }

        let pool = self.dialer.dial(&addr).await?;

        let old = {
            let mut state = self.state.write().await;
            if state.addr == addr {
                // Another refresh installed it while we were dialing.
                drop(state);
                pool.close();
                return Ok(());
            }
            state.addr = addr.clone();
            state.pool.replace(pool)
        };
        if let Some(old) = old {
            old.close();
        }

        tracing::info!(
            master = %self.master_name,
            from = %current,
            to = %addr,
            "switched master pool"
        );
        Ok(())
    }

    /// Replace the known sentinel list with `conn`'s own address followed by
    /// the peers it reports.
    pub async fn ensure_sentinel_addrs<C: CommandConn>(&self, conn: &mut C) -> Result<()> {
        let response = conn
            .execute_str(&["SENTINEL", "SENTINELS", self.master_name.as_str()])
            .await?;
        let peers = reply::sentinel_addrs(&response)?;

        let mut addrs = Vec::with_capacity(peers.len() + 1);
        addrs.push(conn.remote_addr());
        addrs.extend(peers);

        tracing::debug!(master = %self.master_name, sentinels = ?addrs, "updated sentinel list");
        self.state.write().await.sentinel_addrs = addrs;
        Ok(())
    }

    /// One monitoring pass: try each known sentinel, then any configured
    /// seed not already tried, until one answers both queries.
    pub async fn refresh(&self) -> Result<()> {
        let config = self.config.as_ref().ok_or_else(|| {
            HaError::Sentinel("refresh needs a sentinel configuration".into())
        })?;

        let mut candidates = self.sentinel_addrs().await;
        if let Topology::Sentinel { sentinels, .. } = &config.topology {
            for seed in sentinels {
                if !candidates.contains(seed) {
                    candidates.push(seed.clone());
                }
            }
        }

        let mut last_err = None;
        for addr in &candidates {
            match self.refresh_from(addr, config).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    tracing::warn!(sentinel = %addr, error = %err, "sentinel refresh failed");
                    last_err = Some(err);
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| HaError::Sentinel("could not contact any sentinel".into())))
    }

    async fn refresh_from(&self, addr: &str, config: &ConnectionConfig) -> Result<()> {
        let timeout = Duration::from_millis(config.connect_timeout_ms);
        let mut conn = RedisConnection::connect_timeout(addr, timeout).await?;
        conn.set_read_timeout(config.read_timeout_ms);

        // Sentinels often run without the master's password.
        if let Some(pass) = &config.password {
            if let Err(err) = conn.auth(config.username.as_deref(), pass).await {
                tracing::debug!(sentinel = %addr, error = %err, "sentinel AUTH rejected");
            }
        }

        self.ensure_master(&mut conn).await?;
        self.ensure_sentinel_addrs(&mut conn).await
    }
}

fn master_pool<P>(state: &State<P>) -> Result<&Arc<P>> {
    state
        .pool
        .as_ref()
        .ok_or_else(|| HaError::Sentinel("no master pool".into()))
}

impl<D: Dialer> Router for SentinelClient<D> {
    async fn execute(&self, args: &[&str]) -> Result<RespValue> {
        let state = self.state.read().await;
        let pool = master_pool(&state)?;
        let reply = pool.execute(args).await;
        reply
    }

    async fn pipeline(&self, commands: &[Vec<String>]) -> Result<Vec<RespValue>> {
        let state = self.state.read().await;
        let pool = master_pool(&state)?;
        let replies = pool.pipeline(commands).await;
        replies
    }
}

// ── Tests ──────────────────────────────────────────────────────────
