//! WAS server: the application side of a connection.
//!
//! # Data Flow
//! ```text
//! REQUEST, METHOD, URI, …, HEADER*, PARAMETER*, DATA|NO_DATA
//!     → request handed to the handler once the burst is drained
//!     → handler future polled next to the channel driver
//!     → STATUS, HEADER*, DATA|NO_DATA (+LENGTH)
//!     → both bodies finish → ready for the next REQUEST
//! ```
//!
//! Requests are served strictly one after another. The control channel
//! closing between requests is a clean shutdown.

use std::future::pending;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use http::header::{HeaderValue, CONTENT_LENGTH};
use http::Method;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::Instrument;

use crate::config::WasConfig;
use crate::error::WasError;
use crate::net::socket::{SplitSocket, WasSocket};
use crate::net::ConnectionId;
use crate::observability::metrics::{self, Role};
use crate::protocol::method::{method_from_code, method_is_empty};
use crate::protocol::{Command, Packet};
use crate::was::body::{self, IncomingBody, OutgoingBody};
use crate::was::channels::{Channels, IoEvent};
use crate::was::input::InputChannel;
use crate::was::message::{append_header, status_forbids_body, Request, RequestHandler, Response};
use crate::was::output::OutputChannel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestState {
    /// Waiting for REQUEST.
    Idle,
    /// Receiving request metadata.
    Metadata,
    /// DATA or NO_DATA received; the handler runs once control is drained.
    Pending,
    /// The handler has the request.
    Submitted,
}

/// Serves requests arriving on one connection.
pub struct WasServer<C, I, O> {
    socket: SplitSocket<C, I, O>,
    channels: Channels,
    config: Arc<WasConfig>,
    id: ConnectionId,
    state: RequestState,
    request: Request<()>,
    has_method: bool,
    has_uri: bool,
    pending_body: Option<IncomingBody>,
    /// Method of the request being answered.
    method: Method,
    /// STOP arrived before the response was sent.
    stopped: bool,
    responded: bool,
}

impl<C, I, O> WasServer<C, I, O>
where
    C: AsyncRead + AsyncWrite + Unpin,
    I: AsyncRead + Unpin,
    O: AsyncWrite + Unpin,
{
    pub fn new(socket: WasSocket<C, I, O>, config: Arc<WasConfig>) -> Self {
        Self {
            socket: socket.split(),
            channels: Channels::new(&config, Role::Server),
            config,
            id: ConnectionId::new(),
            state: RequestState::Idle,
            request: Request::get(String::new()),
            has_method: false,
            has_uri: false,
            pending_body: None,
            method: Method::GET,
            stopped: false,
            responded: false,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Serve until the client closes the control channel between
    /// requests (`Ok`) or something fatal happens.
    pub async fn run<H>(mut self, handler: &H) -> Result<(), WasError>
    where
        H: RequestHandler + ?Sized,
    {
        let span = tracing::debug_span!("was_server", connection_id = %self.id);
        async move {
            tracing::debug!("WAS server started");
            let result = self.serve(handler).await;
            match &result {
                Ok(()) => tracing::debug!("WAS client closed the connection"),
                Err(err) => {
                    tracing::warn!(error = %err, state = ?self.state, "WAS server failed");
                    metrics::record_error(Role::Server, err.kind());
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn serve<H>(&mut self, handler: &H) -> Result<(), WasError>
    where
        H: RequestHandler + ?Sized,
    {
        let mut handling: Option<BoxFuture<'_, Response<OutgoingBody>>> = None;

        loop {
            if self.is_cycle_complete() {
                tracing::debug!("WAS request complete");
                self.state = RequestState::Idle;
                if !self.channels.control.rx.is_empty() {
                    if let Some(request) = self.dispatch()? {
                        handling = Some(handler.handle(request));
                    }
                }
            }

            let waiting = matches!(self.state, RequestState::Metadata | RequestState::Pending);
            self.channels.arm_control(waiting);

            let event = self
                .channels
                .next_event(&mut self.socket, handler_response(&mut handling))
                .await?;
            match event {
                IoEvent::ControlReceived => {
                    if let Some(request) = self.dispatch()? {
                        handling = Some(handler.handle(request));
                    }
                }
                IoEvent::ControlClosed => {
                    if self.state == RequestState::Idle && self.channels.control.rx.is_empty() {
                        return Ok(());
                    }
                    return Err(WasError::Closed("control connection"));
                }
                IoEvent::ControlSent => {}
                IoEvent::Input(event) => {
                    if self.channels.handle_input(event) {
                        self.send_stop()?;
                    }
                    self.channels.finish_input_if_eof();
                }
                IoEvent::Output(event) => {
                    // the handler is gone; PREMATURE is all the client gets
                    self.channels.handle_output(event)?;
                }
                IoEvent::Extra(response) => {
                    handling = None;
                    self.send_response(response)?;
                }
            }
        }
    }

    fn is_cycle_complete(&self) -> bool {
        self.state == RequestState::Submitted
            && self.responded
            && self.channels.input.is_none()
            && self.channels.output.is_none()
    }

    /// Dispatch buffered packets; returns the request once it is ready
    /// for the handler.
    fn dispatch(&mut self) -> Result<Option<Request<IncomingBody>>, WasError> {
        while !self.holds_next_request() {
            let Some(packet) = self.channels.control.rx.next_packet()? else {
                break;
            };
            tracing::trace!(command = %packet.command, length = packet.payload.len(), "received control packet");
            self.handle_packet(packet)?;
        }
        self.channels.finish_input_if_eof();

        if self.state != RequestState::Pending || !self.channels.control.rx.is_empty() {
            return Ok(None);
        }

        self.state = RequestState::Submitted;
        let head = std::mem::replace(&mut self.request, Request::get(String::new()));
        self.method = head.method.clone();
        tracing::debug!(method = %head.method, uri = %head.uri, "WAS request received");
        Ok(Some(head.with_incoming(self.pending_body.take())))
    }

    /// The client may send the next REQUEST right after `PREMATURE`; it
    /// stays buffered until the previous request body is drained.
    fn holds_next_request(&self) -> bool {
        self.state == RequestState::Submitted
            && self.responded
            && self.channels.control.rx.peek_command() == Some(Command::Request)
    }

    fn misplaced(command: Command) -> WasError {
        WasError::protocol(format!("misplaced {command} packet"))
    }

    fn handle_packet(&mut self, packet: Packet) -> Result<(), WasError> {
        let command = packet.command;
        let in_metadata = self.state == RequestState::Metadata;

        match command {
            Command::Nop => {}

            Command::Request => {
                if self.state != RequestState::Idle {
                    return Err(Self::misplaced(command));
                }
                metrics::record_request(Role::Server);
                self.request = Request::get(String::new());
                self.has_method = false;
                self.has_uri = false;
                self.pending_body = None;
                self.stopped = false;
                self.responded = false;
                self.state = RequestState::Metadata;
            }

            Command::Method => {
                if !in_metadata {
                    return Err(Self::misplaced(command));
                }
                let method = method_from_code(packet.parse_u32()?)
                    .ok_or_else(|| WasError::protocol("invalid METHOD packet"))?;
                if self.has_method && method != self.request.method {
                    return Err(Self::misplaced(command));
                }
                self.request.method = method;
                self.has_method = true;
            }

            Command::Uri => {
                if !in_metadata || self.has_uri {
                    return Err(Self::misplaced(command));
                }
                self.request.uri = packet.parse_text()?.to_owned();
                self.has_uri = true;
            }

            Command::ScriptName | Command::PathInfo | Command::QueryString => {
                let slot = match command {
                    Command::ScriptName => &mut self.request.script_name,
                    Command::PathInfo => &mut self.request.path_info,
                    _ => &mut self.request.query_string,
                };
                if !in_metadata || slot.is_some() {
                    return Err(Self::misplaced(command));
                }
                *slot = Some(packet.parse_text()?.to_owned());
            }

            Command::Header => {
                if !in_metadata {
                    return Err(Self::misplaced(command));
                }
                let (key, value) = packet.parse_pair()?;
                append_header(&mut self.request.headers, key, value)?;
            }

            Command::Parameter => {
                if !in_metadata {
                    return Err(Self::misplaced(command));
                }
                let (key, value) = packet.parse_pair()?;
                self.request.parameters.push((key.to_owned(), value.to_owned()));
            }

            Command::Status => return Err(Self::misplaced(command)),

            Command::NoData => {
                if !in_metadata || !self.has_uri {
                    return Err(Self::misplaced(command));
                }
                self.state = RequestState::Pending;
            }

            Command::Data => {
                if !in_metadata || !self.has_uri {
                    return Err(Self::misplaced(command));
                }
                let (sender, body) = body::channel(self.config.buffers.body_queue_depth);
                self.channels.input = Some(InputChannel::new(sender, self.config.buffers.data_chunk_size));
                self.pending_body = Some(body);
                self.state = RequestState::Pending;
            }

            Command::Length => {
                let Some(input) = self.channels.input.as_mut().filter(|_| !in_metadata) else {
                    return Err(Self::misplaced(command));
                };
                input.set_length(packet.parse_u64()?)?;
            }

            Command::Premature => {
                let Some(input) = self.channels.input.as_mut().filter(|_| !in_metadata) else {
                    return Err(Self::misplaced(command));
                };
                input.set_premature(packet.parse_u64()?)?;
            }

            Command::Stop => match self.state {
                RequestState::Metadata => return Err(Self::misplaced(command)),
                // late STOP for a response that already completed
                RequestState::Idle => {}
                RequestState::Pending | RequestState::Submitted => {
                    if !self.responded {
                        tracing::debug!("STOP before response, body will be cut");
                        self.stopped = true;
                    } else if self.channels.abort_output()? {
                        tracing::debug!("Client stopped the response body");
                    }
                }
            },
        }
        Ok(())
    }

    fn send_response(&mut self, response: Response<OutgoingBody>) -> Result<(), WasError> {
        let Response {
            status,
            mut headers,
            mut body,
        } = response;

        if let Some(source) = &body {
            if method_is_empty(&self.method) {
                if let Some(length) = source.remaining() {
                    headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
                }
                body = None;
            } else if status_forbids_body(status) {
                body = None;
            }
        }

        // a dropped request body is stopped before the response goes out
        if self.channels.input.as_ref().is_some_and(InputChannel::is_unwanted) {
            self.send_stop()?;
            if let Some(input) = self.channels.input.as_mut() {
                input.discard();
            }
        }

        tracing::debug!(status = %status, has_body = body.is_some(), "Sending WAS response");
        let tx = &mut self.channels.control.tx;
        tx.bulk_on();
        tx.send_u32(Command::Status, u32::from(status.as_u16()))?;
        tx.send_header_map(Command::Header, &headers)?;
        match body {
            Some(_) if self.stopped => {
                // the client no longer wants it
                tx.send_empty(Command::Data)?;
                tx.send_u64(Command::Premature, 0)?;
            }
            Some(source) => {
                tx.send_empty(Command::Data)?;
                let mut output = OutputChannel::new(source.into_source());
                if let Some(length) = output.check_length() {
                    tx.send_u64(Command::Length, length)?;
                }
                self.channels.output = Some(output);
            }
            None => tx.send_empty(Command::NoData)?,
        }
        self.channels.control.tx.bulk_off();
        self.responded = true;
        Ok(())
    }

    fn send_stop(&mut self) -> Result<(), WasError> {
        if self.channels.input.as_ref().map_or(true, InputChannel::is_eof) {
            return Ok(());
        }
        tracing::debug!("Request body unwanted, sending STOP");
        self.channels.control.tx.send_empty(Command::Stop)?;
        metrics::record_stop(Role::Server);
        Ok(())
    }
}

/// The handler's response, once it has one.
async fn handler_response<T>(handling: &mut Option<BoxFuture<'_, T>>) -> T {
    match handling {
        Some(future) => future.await,
        None => pending().await,
    }
}
