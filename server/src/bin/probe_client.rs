//! Scripted client that connects, picks up one possessable, attaches it,
//! and hands it back, printing every packet it sees along the way.

use bincode::{deserialize, serialize};
use shared::config::MAX_PACKET_SIZE;
use shared::{AnchorId, AttachParams, Packet, PossessableId, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

async fn send(
    socket: &UdpSocket,
    packet: &Packet,
    server_addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("-> {:?}", packet);
    socket.send_to(&serialize(packet)?, server_addr).await?;
    Ok(())
}

/// Prints packets until `done` matches one or the server goes quiet
async fn receive_until<F>(socket: &UdpSocket, mut done: F) -> Option<Packet>
where
    F: FnMut(&Packet) -> bool,
{
    let mut buf = [0u8; MAX_PACKET_SIZE];
    loop {
        let (len, _) = match timeout(Duration::from_secs(2), socket.recv_from(&mut buf)).await {
            Ok(Ok(received)) => received,
            Ok(Err(e)) => {
                println!("Error receiving: {}", e);
                return None;
            }
            Err(_) => {
                println!("No response within 2s");
                return None;
            }
        };
        match deserialize::<Packet>(&buf[0..len]) {
            Ok(packet) => {
                println!("<- {:?}", packet);
                if done(&packet) {
                    return Some(packet);
                }
            }
            Err(e) => println!("Failed to deserialize packet: {}", e),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let server_addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:8080".to_string())
        .parse::<SocketAddr>()?;
    let id = PossessableId(
        std::env::args()
            .nth(2)
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(1),
    );

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    println!("Probe bound to {}", socket.local_addr()?);

    send(&socket, &Packet::Connect { client_version: PROTOCOL_VERSION }, server_addr).await?;
    let Some(Packet::Connected { actor }) = receive_until(&socket, |p| {
        matches!(p, Packet::Connected { .. } | Packet::Disconnected { .. })
    })
    .await
    else {
        println!("Connection refused");
        return Ok(());
    };
    println!("Connected as actor {}", actor);

    send(&socket, &Packet::RequestPossession { request_id: 1, id, actor }, server_addr).await?;
    let granted = receive_until(&socket, |p| {
        matches!(p, Packet::Grant { request_id: 1, .. } | Packet::Denied { request_id: 1, .. })
    })
    .await;

    if let Some(Packet::Grant { .. }) = granted {
        send(
            &socket,
            &Packet::AttachToAnchor {
                id,
                actor,
                anchor: AnchorId::hand(),
                params: AttachParams::default(),
            },
            server_addr,
        )
        .await?;
        receive_until(&socket, |p| matches!(p, Packet::AttachBroadcast(_))).await;

        send(
            &socket,
            &Packet::ReleasePossession {
                request_id: 2,
                id,
                actor,
                consume: false,
            },
            server_addr,
        )
        .await?;
        receive_until(&socket, |p| matches!(p, Packet::Ack { request_id: 2, .. })).await;
    }

    send(&socket, &Packet::Disconnect, server_addr).await?;
    println!("Probe finished");
    Ok(())
}
