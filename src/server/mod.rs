//! Server supervisor: listening socket, accept loop, and the two background
//! lifecycle routines (shutdown drain and inactivity monitor).

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::Result;
use crate::activity::ActivityLog;
use crate::db::Database;
use crate::storage::FileStore;

pub mod config;
pub mod session;
pub mod state;

pub use config::Config;
pub use session::SessionEnd;
pub use state::ConnectionRegistry;

/// Shared server-wide facilities handed to every session and to the
/// lifecycle routines.
pub struct ServerContext {
    pub config: Config,
    pub registry: ConnectionRegistry,
    pub db: Database,
    pub store: FileStore,
    pub activity: ActivityLog,
}

impl ServerContext {
    /// Drain the registry and interrupt every live session.
    ///
    /// Safe to run concurrently with sessions deregistering themselves
    /// (their deregistration becomes a no-op) and safe to run more than once.
    pub async fn shutdown_all(&self) {
        let handles = self.registry.drain().await;
        if handles.is_empty() {
            return;
        }

        info!(count = handles.len(), "closing active connections");
        self.activity
            .note(&format!("closing {} active connections", handles.len()));
        for handle in &handles {
            debug!(%handle.addr, "closing connection");
            handle.shutdown.notify_one();
        }
    }
}

pub struct Server {
    listener: TcpListener,
    ctx: Arc<ServerContext>,
}

impl Server {
    /// Prepare the upload directory, database, and activity log, then bind
    /// the listener. A bind failure is fatal to startup.
    pub async fn bind(config: Config) -> Result<Self> {
        let store = FileStore::open(&config.upload_dir).await?;
        let db = Database::open(&config.database_path)?;
        let activity = ActivityLog::open(&config.activity_log)?;

        let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
        info!(addr = %listener.local_addr()?, "server listening");
        activity.note("server started");

        Ok(Self {
            listener,
            ctx: Arc::new(ServerContext {
                config,
                registry: ConnectionRegistry::new(),
                db,
                store,
                activity,
            }),
        })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn context(&self) -> Arc<ServerContext> {
        self.ctx.clone()
    }

    /// Serve until the listener fails or the inactivity monitor decides the
    /// process should go away. Both exits end in the shutdown drain.
    pub async fn run(self) -> Result<()> {
        let ctx = self.ctx;
        let result = tokio::select! {
            res = Self::accept_loop(self.listener, ctx.clone()) => res,
            _ = Self::inactivity_monitor(ctx.clone()) => {
                info!("server inactive, shutting down");
                ctx.activity.note("server inactive - initiating shutdown");
                Ok(())
            }
        };
        ctx.shutdown_all().await;
        ctx.activity.note("server shutdown complete");
        result
    }

    async fn accept_loop(listener: TcpListener, ctx: Arc<ServerContext>) -> Result<()> {
        loop {
            let (stream, addr) = listener.accept().await?;
            let handle = ctx.registry.register(addr).await;
            let active = ctx.registry.count().await;
            info!(%addr, active, "connection accepted");

            let ctx = ctx.clone();
            tokio::spawn(async move {
                let id = handle.id;
                let end = session::run(stream, addr, handle, ctx.clone()).await;
                ctx.registry.deregister(id).await;
                let active = ctx.registry.count().await;
                info!(%addr, ?end, active, "connection closed");
                ctx.activity.note(&format!("client disconnected: {addr}"));
            });
        }
    }

    /// Best-effort resource reclamation: once per poll interval, check
    /// whether the server has had no connections and no activity for longer
    /// than the configured threshold.
    async fn inactivity_monitor(ctx: Arc<ServerContext>) {
        let mut ticker = tokio::time::interval(ctx.config.idle_poll());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so a fresh server
        // gets a full interval before its first check.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if ctx
                .registry
                .is_idle_for(ctx.config.shutdown_after())
                .await
            {
                return;
            }
        }
    }
}
