//! The event loop (C7): composes the reactor, the transaction table, and
//! the per-slot state machine into the translator's single-threaded run
//! loop.

use std::io::{Read, Write};
use std::net::SocketAddr;
use std::time::Duration;

use mio::{Interest, Token};

use crate::clock::Clock;
use crate::config::Config;
use crate::diagnostics;
use crate::error::{FatalError, SlotError};
use crate::framing;
use crate::sockets::{bind_udp_listener, connect_upstream, Reactor};
use crate::table::{State, Table};

const LISTENER_TOKEN: Token = Token(0);

/// Minimum length of a syntactically plausible DNS message (the fixed
/// header).
const DNS_HEADER_LEN: usize = 12;

pub struct Dispatcher<C: Clock> {
    listener: mio::net::UdpSocket,
    reactor: Reactor,
    table: Table,
    clock: C,
    upstream: SocketAddr,
    recv_scratch: Box<[u8; framing::MAX_MESSAGE_LEN]>,
}

impl<C: Clock> Dispatcher<C> {
    pub fn new(config: &Config, clock: C) -> Result<Self, FatalError> {
        let mut listener = bind_udp_listener(config.family, config.listen_port)
            .map_err(FatalError::BindFailed)?;
        let reactor = Reactor::new(config.max_trx + 1).map_err(FatalError::BindFailed)?;
        reactor
            .register_udp(&mut listener, LISTENER_TOKEN)
            .map_err(FatalError::BindFailed)?;

        Ok(Self {
            listener,
            reactor,
            table: Table::new(config.max_trx, config.timeout_secs),
            clock,
            upstream: config.upstream,
            recv_scratch: Box::new([0u8; framing::MAX_MESSAGE_LEN]),
        })
    }

    /// The address the UDP listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    fn slot_token(index: usize) -> Token {
        Token(index + 1)
    }

    fn token_to_slot(token: Token) -> Option<usize> {
        token.0.checked_sub(1)
    }

    /// Runs the translator until a fatal error occurs. Never returns on
    /// success; the translator is a long-running daemon.
    pub fn run(&mut self) -> Result<(), FatalError> {
        loop {
            self.tick(None)?;
        }
    }

    /// Runs exactly one dispatcher iteration: reap stale slots, wait for
    /// readiness, then service whatever became ready.
    ///
    /// `wait_timeout` is `None` in production (block until something is
    /// ready); tests pass a short timeout so a dispatcher under test never
    /// hangs on a quiet reactor.
    pub fn tick(&mut self, wait_timeout: Option<Duration>) -> Result<(), FatalError> {
        let now = self.clock.now();
        let reaped = self.table.reap_stale(now);
        for (idx, mut stream) in reaped {
            let _ = self.reactor.deregister_tcp(&mut stream);
            tracing::debug!(slot = idx, "reaped stale transaction");
        }

        self.reactor.wait(wait_timeout).map_err(FatalError::FatalIo)?;

        let mut listener_ready = false;
        let mut slot_events = Vec::new();
        for (token, readable, writable) in self.reactor.ready_events() {
            if token == LISTENER_TOKEN {
                listener_ready = true;
            } else if let Some(idx) = Self::token_to_slot(token) {
                slot_events.push((idx, readable, writable));
            }
        }

        if listener_ready {
            self.handle_udp_readable();
        }

        for (idx, readable, writable) in slot_events {
            self.handle_slot_event(idx, readable, writable);
        }

        Ok(())
    }

    fn handle_udp_readable(&mut self) {
        let (n, from) = match self.listener.recv_from(&mut self.recv_scratch[..]) {
            Ok(result) => result,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read from UDP listener");
                return;
            }
        };

        if n < DNS_HEADER_LEN {
            tracing::warn!("{}", SlotError::Malformed { len: n });
            return;
        }

        let id = u16::from_be_bytes([self.recv_scratch[0], self.recv_scratch[1]]);
        let (name, consumed) = diagnostics::decode_name(&self.recv_scratch[..n], DNS_HEADER_LEN, 255);
        let qtype = self
            .recv_scratch
            .get(DNS_HEADER_LEN + consumed..DNS_HEADER_LEN + consumed + 2)
            .map(|bytes| u16::from_be_bytes([bytes[0], bytes[1]]))
            .unwrap_or(0);
        tracing::info!(
            bytes = n,
            from = %from,
            id = format!("{id:#06x}"),
            name = %name,
            qtype = diagnostics::qtype_name(qtype),
            "accepted query"
        );

        let Some(idx) = self.table.find_free() else {
            tracing::warn!("{}", SlotError::TableFull);
            return;
        };

        let mut stream = match connect_upstream(self.upstream) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!("{}", SlotError::UpstreamConnectFailed(e));
                return;
            }
        };

        let slot = self.table.get_mut(idx);
        let framed_len = match framing::frame_for_tcp(&self.recv_scratch[..n], &mut slot.buffer[..]) {
            Ok(len) => len,
            Err(e) => {
                // Unreachable in practice: a UDP datagram can never exceed
                // the 65535-byte frame maximum.
                tracing::warn!(error = %e, "query too large to frame");
                return;
            }
        };

        if let Err(e) = self
            .reactor
            .register_tcp(&mut stream, Self::slot_token(idx), Interest::WRITABLE)
        {
            tracing::warn!(error = %e, "failed to register upstream socket");
            return;
        }

        slot.client_addr = Some(from);
        slot.started_at = self.clock.now();
        slot.buffer_len = framed_len;
        slot.send_cursor = 0;
        slot.state = State::Sending;
        slot.upstream = Some(stream);
    }

    fn handle_slot_event(&mut self, idx: usize, readable: bool, writable: bool) {
        match self.table.get(idx).state {
            State::Sending if writable => self.handle_sendable(idx),
            State::Receiving if readable => self.handle_receivable(idx),
            _ => {}
        }
    }

    fn handle_sendable(&mut self, idx: usize) {
        let slot = self.table.get_mut(idx);
        let Some(stream) = slot.upstream.as_mut() else {
            return;
        };

        let connect_error = match stream.take_error() {
            Ok(maybe_err) => maybe_err,
            Err(e) => Some(e),
        };
        if let Some(e) = connect_error {
            tracing::warn!("{}", SlotError::UpstreamConnectFailed(e));
            self.release_slot(idx);
            return;
        }

        let slot = self.table.get_mut(idx);
        let buf_len = slot.buffer_len;
        let cursor = slot.send_cursor;
        let stream = slot.upstream.as_mut().unwrap();
        let remaining = &slot.buffer[cursor..buf_len];

        match stream.write(remaining) {
            Ok(n) => {
                let slot = self.table.get_mut(idx);
                slot.send_cursor += n;
                if slot.send_cursor >= slot.buffer_len {
                    slot.buffer_len = 0;
                    slot.send_cursor = 0;
                    slot.state = State::Receiving;
                    let mut stream = slot.upstream.take().unwrap();
                    match self.reactor.reregister_tcp(
                        &mut stream,
                        Self::slot_token(idx),
                        Interest::READABLE,
                    ) {
                        Ok(()) => self.table.get_mut(idx).upstream = Some(stream),
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to reregister upstream socket");
                            self.table.get_mut(idx).release();
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => {
                tracing::warn!("{}", SlotError::UpstreamIoFailed(e));
                self.release_slot(idx);
            }
        }
    }

    fn handle_receivable(&mut self, idx: usize) {
        let slot = self.table.get_mut(idx);
        let buf_len = slot.buffer_len;
        let Some(stream) = slot.upstream.as_mut() else {
            return;
        };
        let read_result = stream.read(&mut slot.buffer[buf_len..]);

        match read_result {
            Ok(0) => {
                tracing::warn!(
                    "{}",
                    SlotError::UpstreamIoFailed(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "upstream closed connection before a complete response arrived",
                    ))
                );
                self.release_slot(idx);
            }
            Ok(n) => {
                let slot = self.table.get_mut(idx);
                slot.buffer_len += n;
                if framing::tcp_message_complete(&slot.buffer[..], slot.buffer_len) {
                    let response = framing::strip_prefix(&slot.buffer[..], slot.buffer_len).to_vec();
                    let client = slot.client_addr;
                    self.release_slot(idx);

                    if let (Some(client), response) = (client, response) {
                        match self.listener.send_to(&response, client) {
                            Ok(sent) => {
                                let rcode = response.get(3).map(|flags2| flags2 & 0x0f);
                                tracing::info!(
                                    bytes = sent,
                                    to = %client,
                                    rcode = rcode.map(diagnostics::rcode_name).unwrap_or(""),
                                    "replied to client"
                                );
                            }
                            Err(e) => {
                                tracing::warn!("{}", SlotError::ClientReplyFailed(e));
                            }
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => {
                tracing::warn!("{}", SlotError::UpstreamIoFailed(e));
                self.release_slot(idx);
            }
        }
    }

    fn release_slot(&mut self, idx: usize) {
        let slot = self.table.get_mut(idx);
        if let Some(mut stream) = slot.upstream.take() {
            let _ = self.reactor.deregister_tcp(&mut stream);
        }
        self.table.get_mut(idx).release();
    }
}
