//! The I/O multiplexer shared by client and server drivers.
//!
//! One connection has one control channel and at most one active body
//! channel per direction. [`Channels::next_event`] waits on all of them
//! (plus one caller-supplied future) and reports whichever made progress
//! first. Packet semantics stay with the caller.

use std::future::{pending, Future};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::WasConfig;
use crate::error::WasError;
use crate::net::socket::SplitSocket;
use crate::observability::metrics::{self, Role};
use crate::protocol::Command;
use crate::resilience::timeouts::{with_timeout, IdleTimer};
use crate::was::control::ControlChannel;
use crate::was::input::{InputChannel, InputEvent};
use crate::was::output::{OutputChannel, OutputEvent};

#[derive(Debug)]
pub(crate) enum IoEvent<X> {
    /// New control bytes are buffered; dispatch packets.
    ControlReceived,
    /// The peer closed the control socket.
    ControlClosed,
    ControlSent,
    Input(InputEvent),
    Output(OutputEvent),
    Extra(X),
}

pub(crate) struct Channels {
    pub control: ControlChannel,
    pub input: Option<InputChannel>,
    pub output: Option<OutputChannel>,
    control_timer: IdleTimer,
    control_timeout: Duration,
    input_timeout: Duration,
    output_timeout: Duration,
    role: Role,
}

impl Channels {
    pub fn new(config: &WasConfig, role: Role) -> Self {
        Self {
            control: ControlChannel::new(config.buffers.control_capacity),
            input: None,
            output: None,
            control_timer: IdleTimer::new(config.timeouts.control()),
            control_timeout: config.timeouts.control(),
            input_timeout: config.timeouts.input(),
            output_timeout: config.timeouts.output(),
            role,
        }
    }

    /// The control timer runs while we wait for the peer's metadata, or
    /// while control bytes are stuck in either direction.
    pub fn arm_control(&mut self, waiting: bool) {
        let busy = waiting || !self.control.tx.is_empty() || !self.control.rx.is_empty();
        self.control_timer.arm(busy);
    }

    pub async fn next_event<C, I, O, X>(
        &mut self,
        socket: &mut SplitSocket<C, I, O>,
        extra: X,
    ) -> Result<IoEvent<X::Output>, WasError>
    where
        C: AsyncRead + AsyncWrite + Unpin,
        I: AsyncRead + Unpin,
        O: AsyncWrite + Unpin,
        X: Future,
    {
        let Channels {
            control,
            input,
            output,
            control_timer,
            input_timeout,
            output_timeout,
            ..
        } = self;
        let flush = control.tx.wants_flush();
        let can_read = control.rx.has_room();

        tokio::select! {
            biased;

            result = control.tx.write_to(&mut socket.control_w), if flush => {
                result?;
                control_timer.touch();
                Ok(IoEvent::ControlSent)
            }
            result = control.rx.read_from(&mut socket.control_r), if can_read => {
                if result? == 0 {
                    return Ok(IoEvent::ControlClosed);
                }
                control_timer.touch();
                Ok(IoEvent::ControlReceived)
            }
            result = transfer(output, &mut socket.output, *output_timeout) => {
                Ok(IoEvent::Output(result?))
            }
            result = receive(input, &mut socket.input, *input_timeout) => {
                Ok(IoEvent::Input(result?))
            }
            value = extra => Ok(IoEvent::Extra(value)),
            _ = control_timer.expired() => Err(WasError::Timeout("control")),
        }
    }

    /// React to an output event: announce lengths, finish eagerly, or
    /// cancel with `PREMATURE` after a source failure. The source's error
    /// is handed back once `PREMATURE` is queued; reporting it is up to
    /// the caller.
    pub fn handle_output(&mut self, event: OutputEvent) -> Result<Option<WasError>, WasError> {
        match event {
            OutputEvent::Progress(n) => {
                metrics::record_body_bytes("out", n as u64);
                let Some(output) = self.output.as_mut() else {
                    return Ok(None);
                };
                if let Some(length) = output.check_length() {
                    self.control.tx.send_u64(Command::Length, length)?;
                }
                if output.is_complete() {
                    self.end_output()?;
                }
            }
            OutputEvent::Eof => self.end_output()?,
            OutputEvent::SourceError(err) => {
                metrics::record_error(self.role, err.kind());
                tracing::warn!(error = %err, "Body source failed, sending PREMATURE");
                self.abort_output()?;
                return Ok(Some(err));
            }
        }
        Ok(None)
    }

    /// Body written completely; send the deferred length if needed.
    fn end_output(&mut self) -> Result<(), WasError> {
        if let Some(mut output) = self.output.take() {
            if let Some(length) = output.final_length() {
                self.control.tx.send_u64(Command::Length, length)?;
            }
            tracing::debug!(sent = output.sent(), "Body sent");
        }
        Ok(())
    }

    /// Free the output channel, telling the peer how much it got.
    /// Returns false if there was nothing to cancel.
    pub fn abort_output(&mut self) -> Result<bool, WasError> {
        let Some(output) = self.output.take() else {
            return Ok(false);
        };
        if output.is_complete() {
            self.output = Some(output);
            self.end_output()?;
            return Ok(false);
        }
        tracing::debug!(sent = output.sent(), "Cancelling body with PREMATURE");
        self.control.tx.send_u64(Command::Premature, output.sent())?;
        Ok(true)
    }

    /// Account an input event. Returns true when the consumer went away
    /// and the caller should send `STOP`.
    pub fn handle_input(&mut self, event: InputEvent) -> bool {
        match event {
            InputEvent::Data(n) => {
                metrics::record_body_bytes("in", n as u64);
                false
            }
            InputEvent::SinkClosed => {
                if let Some(input) = self.input.as_mut() {
                    input.discard();
                }
                true
            }
        }
    }

    /// Finish the input channel once all announced bytes are in.
    /// Returns `Some(premature)` when it ended.
    pub fn finish_input_if_eof(&mut self) -> Option<bool> {
        if !self.input.as_ref().is_some_and(InputChannel::is_eof) {
            return None;
        }
        let input = self.input.take()?;
        let premature = input.finish();
        tracing::debug!(premature, "Body received");
        Some(premature)
    }

    /// Tear down the input channel with an error for its consumer.
    pub fn abort_input(&mut self, err: WasError) {
        if let Some(input) = self.input.take() {
            input.abort(err);
        }
    }

    /// Mark the conversation done and flush everything queued.
    pub async fn finish_control<C, I, O>(
        &mut self,
        socket: &mut SplitSocket<C, I, O>,
    ) -> Result<(), WasError>
    where
        C: AsyncRead + AsyncWrite + Unpin,
    {
        self.control.done()?;
        with_timeout(
            self.control_timeout,
            "control",
            self.control.tx.flush_to(&mut socket.control_w),
        )
        .await?
    }
}

async fn receive<R>(
    input: &mut Option<InputChannel>,
    fd: &mut R,
    timeout: Duration,
) -> Result<InputEvent, WasError>
where
    R: AsyncRead + Unpin,
{
    match input {
        Some(input) if !input.is_eof() => input.receive(fd, timeout).await,
        _ => pending().await,
    }
}

async fn transfer<W>(
    output: &mut Option<OutputChannel>,
    fd: &mut W,
    timeout: Duration,
) -> Result<OutputEvent, WasError>
where
    W: AsyncWrite + Unpin,
{
    match output {
        Some(output) => output.transfer(fd, timeout).await,
        None => pending().await,
    }
}
