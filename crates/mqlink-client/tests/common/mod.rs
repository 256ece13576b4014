//! In-process broker stand-in for driving a real `Session` over TCP.

#![allow(dead_code)]

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use mqlink_client::{DisconnectHandler, MessageHandler, Session, SessionConfig};
use mqlink_core::packet::{
    decode_packet, encode_packet, Connack, Connect, Packet, Publish, QoS, Suback, Subscribe,
    PROTOCOL_V311,
};

pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

pub struct MockBroker {
    listener: TcpListener,
    pub port: u16,
    protocol_version: u8,
}

impl MockBroker {
    pub fn start() -> Self {
        Self::with_version(PROTOCOL_V311)
    }

    pub fn with_version(protocol_version: u8) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        Self {
            listener,
            port,
            protocol_version,
        }
    }

    pub fn accept(&self) -> BrokerConn {
        let (stream, _) = self.listener.accept().unwrap();
        stream.set_read_timeout(Some(IO_TIMEOUT)).unwrap();
        BrokerConn {
            stream,
            buf: BytesMut::new(),
            protocol_version: self.protocol_version,
        }
    }

    /// Connect `session`, accept it and answer its CONNECT.
    pub fn connect(&self, session: &Session) -> BrokerConn {
        session
            .connect("127.0.0.1", self.port, "test-client", None, None)
            .unwrap();
        let mut conn = self.accept();
        conn.expect_connect();
        conn.ack_connect(None);
        conn
    }
}

/// The broker's end of one client connection.
pub struct BrokerConn {
    stream: TcpStream,
    buf: BytesMut,
    protocol_version: u8,
}

impl BrokerConn {
    /// Next packet from the client, or `None` on timeout or EOF.
    pub fn try_packet(&mut self, timeout: Duration) -> Option<Packet> {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 4096];
        loop {
            if let Some((packet, consumed)) =
                decode_packet(&self.buf, self.protocol_version, 0).unwrap()
            {
                let _ = self.buf.split_to(consumed);
                return Some(packet);
            }

            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            self.stream.set_read_timeout(Some(deadline - now)).unwrap();
            match self.stream.read(&mut chunk) {
                Ok(0) => return None,
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return None
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => return None,
            }
        }
    }

    pub fn expect_packet(&mut self) -> Packet {
        self.try_packet(IO_TIMEOUT)
            .expect("timed out waiting for a packet from the client")
    }

    /// Skip PINGREQs while waiting for something else.
    pub fn expect_non_ping(&mut self) -> Packet {
        loop {
            match self.expect_packet() {
                Packet::Pingreq => continue,
                packet => return packet,
            }
        }
    }

    pub fn expect_no_packet(&mut self, wait: Duration) {
        if let Some(packet) = self.try_packet(wait) {
            panic!("unexpected packet from client: {:?}", packet);
        }
    }

    /// True once the client has closed its side.
    pub fn wait_closed(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 256];
        while Instant::now() < deadline {
            self.stream
                .set_read_timeout(Some(Duration::from_millis(50)))
                .unwrap();
            match self.stream.read(&mut chunk) {
                Ok(0) => return true,
                Ok(_) => continue,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    continue
                }
                Err(_) => return true,
            }
        }
        false
    }

    pub fn send(&mut self, packet: &Packet) {
        let mut out = Vec::new();
        encode_packet(packet, self.protocol_version, &mut out).unwrap();
        self.stream.write_all(&out).unwrap();
    }

    pub fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).unwrap();
    }

    pub fn expect_connect(&mut self) -> Connect {
        match self.expect_packet() {
            Packet::Connect(connect) => connect,
            other => panic!("expected CONNECT, got {:?}", other),
        }
    }

    pub fn ack_connect(&mut self, server_keep_alive: Option<u16>) {
        self.send(&Packet::Connack(Connack {
            session_present: false,
            code: 0,
            server_keep_alive,
        }));
    }

    pub fn expect_subscribe(&mut self) -> Subscribe {
        match self.expect_non_ping() {
            Packet::Subscribe(subscribe) => subscribe,
            other => panic!("expected SUBSCRIBE, got {:?}", other),
        }
    }

    /// Read a SUBSCRIBE and grant it at QoS 0.
    pub fn grant_subscribe(&mut self) -> Subscribe {
        let subscribe = self.expect_subscribe();
        self.send(&Packet::Suback(Suback {
            packet_id: subscribe.packet_id,
            return_codes: vec![0; subscribe.topics.len()],
        }));
        subscribe
    }

    pub fn publish(&mut self, topic: &str, payload: &[u8]) {
        self.send(&Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
            topic: topic.to_string(),
            packet_id: None,
            payload: Bytes::copy_from_slice(payload),
        }));
    }

    pub fn close(self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut cond: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}

/// Keep-alive off so tests see no stray PINGREQs.
pub fn quiet_config() -> SessionConfig {
    SessionConfig::new().keep_alive(0)
}

pub type Received = Arc<Mutex<Vec<(String, Vec<u8>)>>>;

/// A message handler recording every delivery.
pub fn recording_handler() -> (Arc<dyn MessageHandler>, Received) {
    let received = Received::default();
    let sink = Arc::clone(&received);
    let handler: Arc<dyn MessageHandler> = Arc::new(move |topic: &str, payload: &[u8]| {
        sink.lock().unwrap().push((topic.to_string(), payload.to_vec()));
    });
    (handler, received)
}

pub type Reasons = Arc<Mutex<Vec<Option<String>>>>;

/// A disconnect handler recording every notification.
pub fn recording_disconnect() -> (Arc<dyn DisconnectHandler>, Reasons) {
    let reasons = Reasons::default();
    let sink = Arc::clone(&reasons);
    let handler: Arc<dyn DisconnectHandler> = Arc::new(move |reason: Option<&str>| {
        sink.lock().unwrap().push(reason.map(str::to_string));
    });
    (handler, reasons)
}
