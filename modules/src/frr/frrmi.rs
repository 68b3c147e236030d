// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

// FRRMI: management interface towards the frr-agent

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::str::from_utf8;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time::{Duration, timeout};
use tracing::{debug, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_MSG_LEN: usize = 4 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum FrrErr {
    #[error("Failed to connect to frr-agent: {0}")]
    ConnectFailed(String),

    #[error("Timeout: did not receive response in time")]
    TimeOut,

    #[error("Peer left")]
    PeerLeft,

    #[error("Receive failure: {0}")]
    RxFail(String),

    #[error("Send failure: {0}")]
    TxFail(String),

    #[error("Reloading error: {0}")]
    ReloadErr(String),

    #[error("Decoding error: {0}")]
    DecodeError(&'static str),
}

/// Connect to the agent at the given path, within the connect timeout.
async fn connect_sock_stream(remote: &Path) -> Result<UnixStream, FrrErr> {
    debug!("Connecting to frr-agent at {}...", remote.display());
    let sock = timeout(CONNECT_TIMEOUT, UnixStream::connect(remote))
        .await
        .map_err(|_| FrrErr::TimeOut)?
        .map_err(|e| FrrErr::ConnectFailed(e.to_string()))?;
    debug!("Connected to {}", remote.display());
    Ok(sock)
}

/// Send a message framed as |length|genid|data.
pub(crate) async fn send_msg(sock: &mut UnixStream, genid: u64, data: &str) -> Result<(), FrrErr> {
    let tx_fail = |e: std::io::Error| FrrErr::TxFail(e.to_string());
    sock.write_all(&(data.len() as u64).to_ne_bytes())
        .await
        .map_err(tx_fail)?;
    sock.write_all(&genid.to_ne_bytes()).await.map_err(tx_fail)?;
    sock.write_all(data.as_bytes()).await.map_err(tx_fail)?;
    sock.flush().await.map_err(tx_fail)?;
    Ok(())
}

/// Receive a message framed as |length|genid|data.
pub(crate) async fn receive_msg(sock: &mut UnixStream) -> Result<(u64, String), FrrErr> {
    let rx_fail = |e: std::io::Error| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            FrrErr::PeerLeft
        } else {
            FrrErr::RxFail(e.to_string())
        }
    };
    let mut len_buf = [0u8; 8];
    sock.read_exact(&mut len_buf).await.map_err(rx_fail)?;
    let msg_len = u64::from_ne_bytes(len_buf) as usize;
    if msg_len > MAX_MSG_LEN {
        return Err(FrrErr::DecodeError("message too large"));
    }

    let mut genid_buf = [0u8; 8];
    sock.read_exact(&mut genid_buf).await.map_err(rx_fail)?;
    let genid = u64::from_ne_bytes(genid_buf);

    let mut buf = vec![0u8; msg_len];
    sock.read_exact(&mut buf).await.map_err(rx_fail)?;
    let message = from_utf8(&buf).map_err(|_| FrrErr::DecodeError("bad utf-8 in message"))?;
    debug!("Got message with {msg_len} octets for genid {genid}");
    Ok((genid, message.to_string()))
}

/// Client side of the management interface to the frr-agent. Connects
/// lazily and reconnects after any failure.
pub struct FrrMi {
    remote: PathBuf,
    sock: Option<UnixStream>,
}

impl FrrMi {
    pub fn new(remote: impl Into<PathBuf>) -> Self {
        Self {
            remote: remote.into(),
            sock: None,
        }
    }

    async fn sock(&mut self) -> Result<&mut UnixStream, FrrErr> {
        if self.sock.is_none() {
            self.sock = Some(connect_sock_stream(&self.remote).await?);
        }
        Ok(self.sock.as_mut().unwrap())
    }

    /// Ship a rendered config to the agent and wait for its verdict. The
    /// agent answers "Ok" or an error string from frr-reload.
    pub async fn apply_config(&mut self, genid: u64, config: &str) -> Result<(), FrrErr> {
        debug!("Applying FRR config for genid {genid} ({} octets)...", config.len());
        let result = self.do_apply(genid, config).await;
        if let Err(e) = &result {
            warn!("FRR config for genid {genid} failed: {e}; dropping connection");
            self.sock = None;
        }
        result
    }

    async fn do_apply(&mut self, genid: u64, config: &str) -> Result<(), FrrErr> {
        let sock = self.sock().await?;
        send_msg(sock, genid, config).await?;
        let (resp_genid, message) = timeout(RESPONSE_TIMEOUT, receive_msg(sock))
            .await
            .map_err(|_| FrrErr::TimeOut)??;
        if resp_genid != genid {
            return Err(FrrErr::DecodeError("response for unexpected genid"));
        }
        if message != "Ok" {
            return Err(FrrErr::ReloadErr(message));
        }
        debug!("FRR config for genid {genid} successfully applied");
        Ok(())
    }
}
