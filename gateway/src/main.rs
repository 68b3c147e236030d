// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The EVPN gateway daemon: wires the object store, the intent database, the
//! subsystem modules and the management API together.

mod args;

use crate::args::{CmdArgs, Parser};
use intentdb::db::IntentDb;
use intentdb::status::Stage;
use intentdb::subscribe::SubscriberTable;
use intentdb::taskmanager::TaskManager;
use intentdb::taskqueue::TaskQueue;
use mgmt::server::ApiServer;
use modules::frr::FrrModule;
use modules::genlinux::GenLinuxModule;
use objstore::Store;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const TASK_QUEUE_CAPACITY: usize = 1024;

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(args: CmdArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store = Store::open(&args.db)?;
    let registry = Arc::new(SubscriberTable::new());
    let queue = Arc::new(TaskQueue::new(TASK_QUEUE_CAPACITY));
    let db = Arc::new(IntentDb::new(store, queue.clone(), registry.clone()));

    // modules register before recovery so resumed intents see their stages
    if args.no_frr {
        warn!("FRR module disabled; intents will not reach the control plane");
    } else {
        let frr = FrrModule::new(db.clone(), &args.frr_agent, args.asn);
        registry.subscribe_all(Stage::Frr, Arc::new(frr));
    }
    if args.no_genlinux {
        warn!("Generic Linux module disabled; intents will not reach the kernel");
    } else {
        let genlinux = GenLinuxModule::new(db.clone())?;
        registry.subscribe_all(Stage::GenLinux, Arc::new(genlinux));
    }

    let resumed = db.recover()?;
    if resumed > 0 {
        info!("Resuming realization of {resumed} intent(s)");
    }
    TaskManager::new(db.clone(), queue, registry).spawn();

    // log committed changes as they happen
    let mut events = db.watch();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => info!("Committed: {event}"),
                Err(RecvError::Lagged(missed)) => warn!("Event log lagged; missed {missed}"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let server = ApiServer::new(db);
    match args.api_addr {
        Some(addr) => server.serve_tcp(addr).await?,
        None => server.serve_unix(&args.api_sock).await?,
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = CmdArgs::parse();
    init_tracing(&args.log_level);
    info!("Starting EVPN gateway...");
    if let Err(e) = run(args).await {
        error!("Gateway failed: {e}");
        std::process::exit(1);
    }
}
