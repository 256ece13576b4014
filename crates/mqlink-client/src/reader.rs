//! Background thread reading frames off the live connection.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use log::{debug, error, info, trace, warn};

use mqlink_core::packet::{Connack, ConnackCode, Packet, Suback, Unsuback, SUBACK_FAILURE};

use crate::error::ClientError;
use crate::pending::RequestKind;
use crate::session::Shared;

const READ_BUFFER_SIZE: usize = 4096;

/// Serve connections until the session is torn down.
///
/// Parks while there is no connection. Any read or protocol failure ends
/// the connection it happened on; the thread then waits for the next one.
pub(crate) fn run(shared: Arc<Shared>) {
    while let Some((generation, mut stream)) = shared.wait_for_connection() {
        debug!("Reader attached to connection #{}", generation);
        let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);

        let err = loop {
            let packet = match shared.codec.read_frame(&mut stream, &mut buf) {
                Ok(packet) => packet,
                Err(e) => break e,
            };
            if let Err(e) = handle_packet(&shared, generation, packet) {
                break e;
            }
        };

        if shared.is_current(generation) {
            error!("Read failed on connection #{}: {}", generation, err);
        }
        shared.connection_lost(generation, &err);
    }
    debug!("Reader thread exiting");
}

fn handle_packet(shared: &Shared, generation: u64, packet: Packet) -> Result<(), ClientError> {
    match packet {
        Packet::Connack(connack) => handle_connack(shared, connack),
        Packet::Pingresp => {
            trace!("PINGRESP");
            shared.keepalive.lock().on_pingresp();
            Ok(())
        }
        Packet::Suback(suback) => {
            handle_suback(shared, generation, suback);
            Ok(())
        }
        Packet::Unsuback(unsuback) => {
            handle_unsuback(shared, unsuback);
            Ok(())
        }
        Packet::Publish(publish) => {
            shared.deliver(generation, &publish.topic, publish.payload);
            Ok(())
        }
        Packet::Disconnect { reason_code } => Err(ClientError::ServerDisconnect(reason_code)),
        other @ (Packet::Connect(_)
        | Packet::Puback { .. }
        | Packet::Pubrec { .. }
        | Packet::Pubrel { .. }
        | Packet::Pubcomp { .. }
        | Packet::Subscribe(_)
        | Packet::Unsubscribe(_)
        | Packet::Pingreq) => {
            debug!("Unexpected {:?} packet discarded", other.packet_type());
            Ok(())
        }
    }
}

fn handle_connack(shared: &Shared, connack: Connack) -> Result<(), ClientError> {
    if !connack.is_accepted() {
        let reason = match ConnackCode::try_from(connack.code) {
            Ok(code) => format!("{:?}", code),
            Err(_) => format!("reason code {:#04x}", connack.code),
        };
        warn!("Broker refused connection: {}", reason);
        return Err(ClientError::ConnectionRefused(reason));
    }

    if let Some(secs) = connack.server_keep_alive {
        let mut keepalive = shared.keepalive.lock();
        if keepalive.adopt_server(Duration::from_secs(u64::from(secs))) {
            info!("Using server keep alive of {}s", secs);
        }
    }
    info!("Connection accepted (session present: {})", connack.session_present);
    Ok(())
}

fn handle_suback(shared: &Shared, generation: u64, suback: Suback) {
    let Some(request) = shared.pending.resolve(suback.packet_id, RequestKind::Subscribe) else {
        warn!("SUBACK for unknown packet id {}", suback.packet_id);
        return;
    };

    if suback.return_codes.iter().any(|&code| code >= SUBACK_FAILURE) {
        warn!(
            "Subscription to '{}' rejected by broker ({:?})",
            request.topic, suback.return_codes
        );
        shared.reject_subscription(generation, &request.topic, suback.packet_id);
    } else {
        debug!(
            "Subscribed to '{}' in {:?}",
            request.topic,
            request.sent_at.elapsed()
        );
    }
}

fn handle_unsuback(shared: &Shared, unsuback: Unsuback) {
    match shared.pending.resolve(unsuback.packet_id, RequestKind::Unsubscribe) {
        Some(request) => debug!("Unsubscribed from '{}'", request.topic),
        None => warn!("UNSUBACK for unknown packet id {}", unsuback.packet_id),
    }
}
