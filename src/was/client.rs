//! WAS client: sends one request over a leased connection.
//!
//! # Data Flow
//! ```text
//! send(request)
//!     → request metadata built in bulk mode, one flush
//!     → connection driver spawned as a task
//!     → STATUS, HEADER*, DATA|NO_DATA from the server
//!     → response handed to the caller once the burst is drained
//!     → driver keeps pumping both bodies and late control packets
//!     → lease released with Reuse or Destroy
//! ```
//!
//! Dropping the `send` future before the response arrives cancels the
//! request: the descriptors are closed without flushing and the lease is
//! destroyed.

use std::future::pending;
use std::sync::Arc;

use http::{HeaderMap, Method, StatusCode};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::WasConfig;
use crate::error::WasError;
use crate::lease::{Lease, LeaseGuard, Release};
use crate::net::socket::{SplitSocket, WasSocket};
use crate::net::ConnectionId;
use crate::observability::metrics::{self, Role};
use crate::protocol::method::{method_code, method_is_empty};
use crate::protocol::{Command, Packet};
use crate::was::body::{self, IncomingBody, OutgoingBody};
use crate::was::channels::{Channels, IoEvent};
use crate::was::input::InputChannel;
use crate::was::message::{append_header, status_forbids_body, Request, Response};
use crate::was::output::OutputChannel;

type Responder = oneshot::Sender<Result<Response<IncomingBody>, WasError>>;

/// One request on one connection.
pub struct WasClient<C, I, O> {
    socket: WasSocket<C, I, O>,
    lease: LeaseGuard<WasSocket<C, I, O>>,
    config: Arc<WasConfig>,
}

impl<C, I, O> WasClient<C, I, O>
where
    C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    I: AsyncRead + Unpin + Send + 'static,
    O: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(
        socket: WasSocket<C, I, O>,
        lease: impl Lease<WasSocket<C, I, O>> + 'static,
        config: Arc<WasConfig>,
    ) -> Self {
        Self {
            socket,
            lease: LeaseGuard::new(lease),
            config,
        }
    }

    /// Shorthand for `new(..).send(request)`.
    pub async fn request(
        socket: WasSocket<C, I, O>,
        lease: impl Lease<WasSocket<C, I, O>> + 'static,
        request: Request<OutgoingBody>,
        config: Arc<WasConfig>,
    ) -> Result<Response<IncomingBody>, WasError> {
        Self::new(socket, lease, config).send(request).await
    }

    /// Send `request` and wait for the response metadata.
    ///
    /// A body error after this returns surfaces through the
    /// [`IncomingBody`], never as silent truncation. That includes a
    /// failure of our own request body's source.
    pub async fn send(
        self,
        request: Request<OutgoingBody>,
    ) -> Result<Response<IncomingBody>, WasError> {
        let span = tracing::debug_span!(
            "was_client",
            connection_id = %ConnectionId::new(),
            request_id = %Uuid::new_v4(),
        );
        metrics::record_request(Role::Client);

        let head_request = method_is_empty(&request.method);
        let mut channels = Channels::new(&self.config, Role::Client);

        span.in_scope(|| {
            tracing::debug!(method = %request.method, uri = %request.uri, "Sending WAS request");
        });
        if let Err(err) = send_request(&mut channels, request) {
            // nothing has been written yet
            metrics::record_error(Role::Client, err.kind());
            self.lease.release(Release::Reuse(self.socket));
            return Err(err);
        }

        let (responder, response) = oneshot::channel();
        let connection = ClientConnection {
            socket: self.socket.split(),
            lease: self.lease,
            channels,
            config: self.config,
            responder: Some(responder),
            state: ResponseState::Metadata,
            head_request,
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            had_body: false,
            pending_body: None,
            stopped: false,
        };
        tokio::spawn(connection.run().instrument(span));

        response.await.unwrap_or(Err(WasError::Cancelled))
    }
}

fn send_request(channels: &mut Channels, request: Request<OutgoingBody>) -> Result<(), WasError> {
    let (head, body) = request.split_body();
    let tx = &mut channels.control.tx;

    tx.bulk_on();
    tx.send_empty(Command::Request)?;
    if head.method != Method::GET {
        let code = method_code(&head.method).ok_or_else(|| {
            WasError::protocol(format!("unsupported request method {}", head.method))
        })?;
        tx.send_u32(Command::Method, code)?;
    }
    tx.send_string(Command::Uri, &head.uri)?;
    if let Some(script_name) = &head.script_name {
        tx.send_string(Command::ScriptName, script_name)?;
    }
    if let Some(path_info) = &head.path_info {
        tx.send_string(Command::PathInfo, path_info)?;
    }
    if let Some(query_string) = &head.query_string {
        tx.send_string(Command::QueryString, query_string)?;
    }
    tx.send_header_map(Command::Header, &head.headers)?;
    for (key, value) in &head.parameters {
        tx.send_pair(Command::Parameter, key, value.as_bytes())?;
    }

    match body {
        Some(body) => {
            tx.send_empty(Command::Data)?;
            let mut output = OutputChannel::new(body.into_source());
            if let Some(length) = output.check_length() {
                tx.send_u64(Command::Length, length)?;
            }
            channels.output = Some(output);
        }
        None => tx.send_empty(Command::NoData)?,
    }
    channels.control.tx.bulk_off();
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResponseState {
    /// Receiving STATUS and HEADER packets.
    Metadata,
    /// DATA received; the response goes out once control is drained.
    Pending,
    /// The caller has the response.
    Submitted,
}

enum Completion {
    Reuse,
    Cancelled,
}

struct ClientConnection<C, I, O> {
    socket: SplitSocket<C, I, O>,
    lease: LeaseGuard<WasSocket<C, I, O>>,
    channels: Channels,
    config: Arc<WasConfig>,
    responder: Option<Responder>,
    state: ResponseState,
    head_request: bool,
    status: StatusCode,
    headers: HeaderMap,
    had_body: bool,
    pending_body: Option<IncomingBody>,
    /// We sent STOP and are discarding the rest of the response body.
    stopped: bool,
}

impl<C, I, O> ClientConnection<C, I, O>
where
    C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    I: AsyncRead + Unpin + Send + 'static,
    O: AsyncWrite + Unpin + Send + 'static,
{
    async fn run(mut self) {
        match self.drive().await {
            Ok(Completion::Reuse) => {
                tracing::debug!("WAS request complete");
                self.lease.release(Release::Reuse(self.socket.into_inner()));
            }
            Ok(Completion::Cancelled) => {
                tracing::debug!("WAS request cancelled by caller");
                self.lease.release(Release::Destroy);
            }
            Err(err) => {
                tracing::warn!(error = %err, state = ?self.state, "WAS request failed");
                metrics::record_error(Role::Client, err.kind());
                match self.responder.take() {
                    Some(responder) => {
                        let _ = responder.send(Err(err));
                    }
                    None => self.channels.abort_input(err),
                }
                self.lease.release(Release::Destroy);
            }
        }
    }

    fn is_complete(&self) -> bool {
        self.state == ResponseState::Submitted && self.channels.input.is_none()
    }

    async fn drive(&mut self) -> Result<Completion, WasError> {
        loop {
            if self.is_complete() {
                // the server is done with us; so is our request body
                self.channels.abort_output()?;
                self.channels.finish_control(&mut self.socket).await?;
                return Ok(Completion::Reuse);
            }

            let waiting = self.state != ResponseState::Submitted || self.stopped;
            self.channels.arm_control(waiting);

            let event = self
                .channels
                .next_event(&mut self.socket, caller_gone(&mut self.responder))
                .await?;
            match event {
                IoEvent::ControlReceived => self.dispatch()?,
                IoEvent::ControlClosed => return Err(WasError::Closed("control connection")),
                IoEvent::ControlSent => {}
                IoEvent::Input(event) => {
                    if self.channels.handle_input(event) {
                        self.send_stop()?;
                    }
                    self.channels.finish_input_if_eof();
                }
                IoEvent::Output(event) => {
                    if let Some(err) = self.channels.handle_output(event)? {
                        self.report_source_error(err)?;
                    }
                }
                IoEvent::Extra(()) => return Ok(Completion::Cancelled),
            }
        }
    }

    fn dispatch(&mut self) -> Result<(), WasError> {
        while let Some(packet) = self.channels.control.rx.next_packet()? {
            tracing::trace!(command = %packet.command, length = packet.payload.len(), "received control packet");
            self.handle_packet(packet)?;
        }

        if self.state == ResponseState::Pending && self.channels.control.rx.is_empty() {
            let body = self.pending_body.take();
            self.submit(body)?;
        }
        self.channels.finish_input_if_eof();
        Ok(())
    }

    fn handle_packet(&mut self, packet: Packet) -> Result<(), WasError> {
        let receiving_metadata = self.state == ResponseState::Metadata;

        match packet.command {
            Command::Nop => {}

            Command::Request
            | Command::Method
            | Command::Uri
            | Command::ScriptName
            | Command::PathInfo
            | Command::QueryString
            | Command::Parameter => {
                return Err(WasError::protocol(format!("unexpected packet {}", packet.command)));
            }

            Command::Header => {
                if !receiving_metadata {
                    return Err(WasError::protocol("response header was too late"));
                }
                let (key, value) = packet.parse_pair()?;
                append_header(&mut self.headers, key, value)?;
            }

            Command::Status => {
                if !receiving_metadata {
                    return Err(WasError::protocol("STATUS after body start"));
                }
                self.status = packet.parse_status()?;
            }

            Command::NoData => {
                if !receiving_metadata {
                    return Err(WasError::protocol("NO_DATA after body start"));
                }
                self.channels.abort_output()?;
                self.submit(None)?;
            }

            Command::Data => {
                if !receiving_metadata {
                    return Err(WasError::protocol("DATA after body start"));
                }
                if self.head_request || status_forbids_body(self.status) {
                    return Err(WasError::protocol("no response body allowed"));
                }
                let (sender, body) = body::channel(self.config.buffers.body_queue_depth);
                self.channels.input = Some(InputChannel::new(sender, self.config.buffers.data_chunk_size));
                self.pending_body = Some(body);
                self.had_body = true;
                self.state = ResponseState::Pending;
            }

            Command::Length => {
                if receiving_metadata {
                    return Err(WasError::protocol("LENGTH before DATA"));
                }
                let length = packet.parse_u64()?;
                match self.channels.input.as_mut() {
                    Some(input) => input.set_length(length)?,
                    None if !self.had_body => {
                        return Err(WasError::protocol("LENGTH after NO_DATA"));
                    }
                    None => return Err(WasError::protocol("misplaced LENGTH packet")),
                }
            }

            Command::Stop => {
                if self.channels.abort_output()? {
                    tracing::debug!("Server stopped the request body");
                }
            }

            Command::Premature => {
                if receiving_metadata {
                    return Err(WasError::protocol("PREMATURE before DATA"));
                }
                let length = packet.parse_u64()?;
                match self.channels.input.as_mut() {
                    Some(input) => input.set_premature(length)?,
                    None if !self.had_body => {
                        return Err(WasError::protocol("PREMATURE after NO_DATA"));
                    }
                    None => return Err(WasError::protocol("misplaced PREMATURE packet")),
                }
            }
        }
        Ok(())
    }

    fn submit(&mut self, body: Option<IncomingBody>) -> Result<(), WasError> {
        self.state = ResponseState::Submitted;
        let response = Response {
            status: self.status,
            headers: std::mem::take(&mut self.headers),
            body,
        };
        tracing::debug!(status = %response.status, has_body = response.body.is_some(), "WAS response received");

        let Some(responder) = self.responder.take() else {
            // the caller already got our request body's error; dropping
            // the response body makes the input channel STOP
            return Ok(());
        };
        responder.send(Ok(response)).map_err(|_| WasError::Cancelled)
    }

    /// Our request body failed and `PREMATURE` is queued. The caller
    /// learns through whatever it is waiting on: the response itself, or
    /// the response body. The connection resynchronises as usual.
    fn report_source_error(&mut self, err: WasError) -> Result<(), WasError> {
        if let Some(responder) = self.responder.take() {
            let _ = responder.send(Err(err));
            return Ok(());
        }
        match self.channels.input.as_mut() {
            Some(input) => {
                input.fail_consumer(err);
                self.send_stop()
            }
            None => Ok(()),
        }
    }

    fn send_stop(&mut self) -> Result<(), WasError> {
        if self.stopped || self.channels.input.as_ref().map_or(true, InputChannel::is_eof) {
            return Ok(());
        }
        tracing::debug!("Response body unwanted, sending STOP");
        self.channels.control.tx.send_empty(Command::Stop)?;
        metrics::record_stop(Role::Client);
        self.stopped = true;
        Ok(())
    }
}

/// Resolves when the caller dropped the `send` future.
async fn caller_gone(responder: &mut Option<Responder>) {
    match responder {
        Some(responder) => responder.closed().await,
        None => pending().await,
    }
}
