//! Local reachability checks for running game servers.

use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::net::UdpSocket;

use super::types::{GameServerInstance, InstanceSource};
use crate::process::is_port_bound;

const A2S_HEADER: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];
const A2S_INFO: u8 = 0x54;
const A2S_CHALLENGE: u8 = 0x41;
const A2S_INFO_PAYLOAD: &[u8] = b"Source Engine Query\0";

fn a2s_info_request(challenge: Option<&[u8]>) -> Vec<u8> {
    let mut packet = Vec::with_capacity(29);
    packet.extend_from_slice(&A2S_HEADER);
    packet.push(A2S_INFO);
    packet.extend_from_slice(A2S_INFO_PAYLOAD);
    if let Some(challenge) = challenge {
        packet.extend_from_slice(challenge);
    }
    packet
}

/// The 4 challenge bytes if `reply` is an `S2C_CHALLENGE` packet.
fn challenge_of(reply: &[u8]) -> Option<&[u8]> {
    match reply {
        [0xFF, 0xFF, 0xFF, 0xFF, A2S_CHALLENGE, rest @ ..] if rest.len() >= 4 => Some(&rest[..4]),
        _ => None,
    }
}

async fn exchange(socket: &UdpSocket, packet: &[u8], timeout: Duration) -> Option<Vec<u8>> {
    socket.send(packet).await.ok()?;
    let mut buf = vec![0u8; 1400];
    let len = tokio::time::timeout(timeout, socket.recv(&mut buf))
        .await
        .ok()?
        .ok()?;
    buf.truncate(len);
    Some(buf)
}

/// Send an A2S_INFO query to `127.0.0.1:port`; true when the server answers.
pub async fn query_a2s_info(port: u16, timeout: Duration) -> bool {
    let Ok(socket) = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await else {
        return false;
    };
    if socket.connect((Ipv4Addr::LOCALHOST, port)).await.is_err() {
        return false;
    }

    let Some(reply) = exchange(&socket, &a2s_info_request(None), timeout).await else {
        return false;
    };
    match challenge_of(&reply) {
        Some(challenge) => exchange(&socket, &a2s_info_request(Some(challenge)), timeout)
            .await
            .is_some(),
        None => true,
    }
}

/// Whether the instance answers locally. Errors count as "not connectable".
pub async fn is_internally_connectable(instance: &GameServerInstance, timeout: Duration) -> bool {
    match instance.source {
        InstanceSource::Steam => {
            instance.query_port != 0 && query_a2s_info(instance.query_port, timeout).await
        }
        InstanceSource::Manual => {
            let ports = [instance.game_port, instance.query_port];
            tokio::task::spawn_blocking(move || ports.into_iter().any(is_port_bound))
                .await
                .unwrap_or(false)
        }
    }
}
