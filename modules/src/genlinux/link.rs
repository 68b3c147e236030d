// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Thin helpers over rtnetlink used by the generic Linux module. All of them
//! are convergence-friendly: "already there" and "already gone" count as
//! success.

use futures::TryStreamExt;
use rtnetlink::packet_route::link::LinkMessage;
use rtnetlink::{Handle, LinkUnspec};
use std::net::IpAddr;
use tracing::debug;

const ENOENT: i32 = 2;
const EEXIST: i32 = 17;
const ENODEV: i32 = 19;
const EADDRNOTAVAIL: i32 = 99;

fn raw_code(error: &rtnetlink::Error) -> Option<i32> {
    match error {
        rtnetlink::Error::NetlinkError(message) => Some(message.raw_code()),
        _ => None,
    }
}

pub(crate) fn is_not_found(error: &rtnetlink::Error) -> bool {
    matches!(raw_code(error), Some(code) if code == -ENODEV || code == -ENOENT || code == -EADDRNOTAVAIL)
}

pub(crate) fn is_exists(error: &rtnetlink::Error) -> bool {
    matches!(raw_code(error), Some(code) if code == -EEXIST)
}

/// Look a link up by name.
pub(crate) async fn find_link(
    handle: &Handle,
    name: &str,
) -> Result<Option<LinkMessage>, rtnetlink::Error> {
    let mut links = handle.link().get().match_name(name.to_owned()).execute();
    match links.try_next().await {
        Ok(link) => Ok(link),
        Err(e) if is_not_found(&e) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Create a link unless a link with its name already exists. Returns the
/// interface index either way.
pub(crate) async fn ensure_link(
    handle: &Handle,
    name: &str,
    message: LinkMessage,
) -> Result<u32, rtnetlink::Error> {
    match handle.link().add(message).execute().await {
        Ok(()) => {}
        Err(e) if is_exists(&e) => {
            debug!("Link '{name}' already exists");
        }
        Err(e) => return Err(e),
    }
    match find_link(handle, name).await? {
        Some(link) => Ok(link.header.index),
        // the add was acked, so the link must be lookupable
        None => Err(rtnetlink::Error::RequestFailed),
    }
}

/// Remove a link by name; absent is fine.
pub(crate) async fn remove_link(handle: &Handle, name: &str) -> Result<(), rtnetlink::Error> {
    let Some(link) = find_link(handle, name).await? else {
        debug!("Link '{name}' already gone");
        return Ok(());
    };
    match handle.link().del(link.header.index).execute().await {
        Ok(()) => Ok(()),
        Err(e) if is_not_found(&e) => Ok(()),
        Err(e) => Err(e),
    }
}

pub(crate) async fn set_link_up(handle: &Handle, index: u32) -> Result<(), rtnetlink::Error> {
    handle
        .link()
        .set(LinkUnspec::new_with_index(index).up().build())
        .execute()
        .await
}

/// Enslave `index` to the link `controller`.
pub(crate) async fn set_controller(
    handle: &Handle,
    index: u32,
    controller: u32,
) -> Result<(), rtnetlink::Error> {
    handle
        .link()
        .set_port(
            LinkUnspec::new_with_index(index)
                .controller(controller)
                .build(),
        )
        .execute()
        .await
}

/// Add an address to a link; already-assigned is fine.
pub(crate) async fn add_address(
    handle: &Handle,
    index: u32,
    address: IpAddr,
    prefix_len: u8,
) -> Result<(), rtnetlink::Error> {
    match handle.address().add(index, address, prefix_len).execute().await {
        Ok(()) => Ok(()),
        Err(e) if is_exists(&e) => {
            debug!("Address {address}/{prefix_len} already assigned");
            Ok(())
        }
        Err(e) => Err(e),
    }
}
