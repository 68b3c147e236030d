// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The management server: accepts connections on a unix or TCP socket and
//! dispatches framed requests to the intent database.

use crate::api::{
    Request, Response, generate_resource_id, merge_masked, validate_resource_id,
};
use crate::wire::{WireError, read_frame, write_frame};
use intentdb::db::IntentDb;
use intentdb::objects::{IntentSpec, Kind};
use intentdb::{ApiError, ApiResult};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UnixListener};
use tracing::{debug, error, info, warn};

pub struct ApiServer {
    db: Arc<IntentDb>,
}

impl ApiServer {
    pub fn new(db: Arc<IntentDb>) -> Arc<Self> {
        Arc::new(Self { db })
    }

    /// Serve on a unix socket; a stale socket file from a previous run is
    /// removed first.
    pub async fn serve_unix(self: Arc<Self>, path: &Path) -> std::io::Result<()> {
        if path.exists() {
            if let Err(e) = std::fs::remove_file(path) {
                warn!("Failed to remove existing socket file: {e}");
            }
        }
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let listener = UnixListener::bind(path)?;
        info!("Serving management API on unix socket {}", path.display());
        loop {
            let (stream, _) = listener.accept().await?;
            debug!("Accepted management connection on unix socket");
            let server = self.clone();
            tokio::spawn(async move { server.handle_conn(stream).await });
        }
    }

    /// Serve on a TCP address.
    pub async fn serve_tcp(self: Arc<Self>, addr: SocketAddr) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("Serving management API on {addr}");
        loop {
            let (stream, peer) = listener.accept().await?;
            debug!("Accepted management connection from {peer}");
            let server = self.clone();
            tokio::spawn(async move { server.handle_conn(stream).await });
        }
    }

    async fn handle_conn<S: AsyncRead + AsyncWrite + Unpin>(&self, mut stream: S) {
        loop {
            let request: Request = match read_frame(&mut stream).await {
                Ok(request) => request,
                Err(WireError::Closed) => {
                    debug!("Management peer disconnected");
                    return;
                }
                Err(e) => {
                    warn!("Dropping management connection: {e}");
                    return;
                }
            };
            let response = self.dispatch(request);
            if let Err(e) = write_frame(&mut stream, &response).await {
                error!("Failed to send management response: {e}");
                return;
            }
        }
    }

    /// Translate one request into database operations.
    pub fn dispatch(&self, request: Request) -> Response {
        let result = match request {
            Request::Create { kind, id, spec } => self.create(kind, id, spec),
            Request::Get { name } => {
                Kind::parse_name(&name).and_then(|_| self.db.get(&name)).map(Response::Record)
            }
            Request::List { kind } => Ok(Response::Records(self.db.list(kind))),
            Request::Update {
                name,
                spec,
                update_mask,
                allow_missing,
            } => self.update(&name, spec, &update_mask, allow_missing),
            Request::Delete {
                name,
                allow_missing,
            } => self.delete(&name, allow_missing),
        };
        match result {
            Ok(response) => response,
            Err(error) => {
                debug!("Request failed: {error}");
                Response::Error(error.into())
            }
        }
    }

    fn create(&self, kind: Kind, id: Option<String>, spec: IntentSpec) -> ApiResult<Response> {
        if spec.kind() != kind {
            return Err(ApiError::InvalidArgument(format!(
                "create of a {kind} carries a {} spec",
                spec.kind()
            )));
        }
        let id = match id {
            Some(id) => {
                validate_resource_id(&id)?;
                id
            }
            None => generate_resource_id(),
        };
        self.db.create(&id, spec).map(Response::Record)
    }

    fn update(
        &self,
        name: &str,
        spec: IntentSpec,
        mask: &[String],
        allow_missing: bool,
    ) -> ApiResult<Response> {
        let (kind, id) = Kind::parse_name(name)?;
        match self.db.get(name) {
            Ok(current) => {
                let merged = merge_masked(&current.spec, &spec, mask)?;
                self.db.update(name, merged).map(Response::Record)
            }
            // absent target turns the update into a create
            Err(ApiError::NotFound(_)) if allow_missing => {
                if spec.kind() != kind {
                    return Err(ApiError::InvalidArgument(format!(
                        "update of a {kind} carries a {} spec",
                        spec.kind()
                    )));
                }
                self.db.create(id, spec).map(Response::Record)
            }
            Err(e) => Err(e),
        }
    }

    fn delete(&self, name: &str, allow_missing: bool) -> ApiResult<Response> {
        Kind::parse_name(name)?;
        self.db.delete(name, allow_missing)?;
        Ok(Response::Empty)
    }
}
