// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! A small typed client for the management protocol.

use crate::api::{Request, Response};
use crate::wire::{WireError, read_frame, write_frame};
use std::net::SocketAddr;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};

pub struct ApiClient<S> {
    stream: S,
}

impl ApiClient<UnixStream> {
    pub async fn connect_unix(path: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self {
            stream: UnixStream::connect(path).await?,
        })
    }
}

impl ApiClient<TcpStream> {
    pub async fn connect_tcp(addr: SocketAddr) -> std::io::Result<Self> {
        Ok(Self {
            stream: TcpStream::connect(addr).await?,
        })
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> ApiClient<S> {
    pub async fn call(&mut self, request: &Request) -> Result<Response, WireError> {
        write_frame(&mut self.stream, request).await?;
        read_frame(&mut self.stream).await
    }
}
