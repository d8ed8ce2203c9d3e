//! UDP Fan-out (C7): forwards every streamed-selected raw sentence to the
//! configured sink as a fire-and-forget datagram (spec.md §4.7).

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use log::warn;

pub struct FanOut {
    socket: Mutex<Option<UdpSocket>>,
    sink: Mutex<Option<SocketAddr>>,
    streaming: AtomicBool,
}

impl FanOut {
    pub fn new() -> Self {
        Self {
            socket: Mutex::new(None),
            sink: Mutex::new(None),
            streaming: AtomicBool::new(false),
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    /// Begin streaming to `sink`. Idempotent: starting while already
    /// streaming just updates the sink address without resetting counters
    /// unless the not-streaming -> streaming transition actually occurs
    /// (spec.md §4.7 — the counter reset belongs to the caller, who owns
    /// `LinkState.streamed_messages`).
    pub fn start(&self, sink: SocketAddr) -> bool {
        *self.sink.lock().unwrap() = Some(sink);
        let was_streaming = self.streaming.swap(true, Ordering::SeqCst);
        if !was_streaming {
            self.recreate_socket();
        }
        !was_streaming
    }

    pub fn stop(&self) {
        self.streaming.store(false, Ordering::SeqCst);
        *self.socket.lock().unwrap() = None;
    }

    fn recreate_socket(&self) {
        match UdpSocket::bind("0.0.0.0:0") {
            Ok(s) => *self.socket.lock().unwrap() = Some(s),
            Err(e) => warn!("failed to open UDP fan-out socket: {e}"),
        }
    }

    /// Send one raw sentence, newline-terminated. On failure the socket is
    /// torn down and rebuilt for the next send; the failed datagram is not
    /// retried (spec.md §4.7).
    pub fn send(&self, raw_sentence: &str) {
        if !self.is_streaming() {
            return;
        }
        let Some(sink) = *self.sink.lock().unwrap() else {
            return;
        };
        let mut guard = self.socket.lock().unwrap();
        if guard.is_none() {
            match UdpSocket::bind("0.0.0.0:0") {
                Ok(s) => *guard = Some(s),
                Err(e) => {
                    warn!("failed to open UDP fan-out socket: {e}");
                    return;
                }
            }
        }
        let mut payload = raw_sentence.as_bytes().to_vec();
        payload.push(b'\n');
        if let Some(socket) = guard.as_ref() {
            if let Err(e) = socket.send_to(&payload, sink) {
                warn!("UDP send failed, recreating socket: {e}");
                *guard = None;
            }
        }
    }
}

impl Default for FanOut {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_streaming_drops_sends_silently() {
        let fanout = FanOut::new();
        fanout.send("$GPZDA,1*00");
        assert!(!fanout.is_streaming());
    }

    #[test]
    fn start_is_idempotent_about_transition() {
        let fanout = FanOut::new();
        let sink: SocketAddr = "127.0.0.1:27000".parse().unwrap();
        assert!(fanout.start(sink));
        assert!(!fanout.start(sink)); // already streaming, not a fresh transition
        fanout.stop();
        assert!(!fanout.is_streaming());
    }
}
