//! Serve command implementation: runs the sync server against a database
//! directory.

use entidb_core::Database;
use entidb_sync_server::{ServerConfig, ServerOplog, SyncServer};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Opens `db_path`, recovers the server oplog from it, and serves sync
/// requests on `bind` until the process is killed.
pub fn run(db_path: &Path, bind: &str, db_id: &str, require_auth: bool) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = bind.parse().map_err(|e| format!("invalid bind address {bind:?}: {e}"))?;

    let database = Arc::new(Database::open(db_path)?);
    let oplog = Arc::new(ServerOplog::new(database)?);

    let mut config = ServerConfig::new(addr);
    if require_auth {
        config = config.with_auth(generate_secret());
    }

    let server = Arc::new(SyncServer::with_oplog(config, db_id.to_string(), oplog));
    info!(db = %db_id, %bind, "starting sync server");

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(entidb_sync_server::serve_tcp(server, addr))?;
    Ok(())
}

fn generate_secret() -> Vec<u8> {
    use rand::RngCore;
    let mut secret = vec![0u8; 32];
    rand::thread_rng().fill_bytes(&mut secret);
    secret
}
