//! The three descriptors of one WAS connection.
//!
//! # Responsibilities
//! - Own control, input, and output for exactly one connection
//! - Split control into halves for the connection driver, and join them
//!   again when the connection goes back to its lease
//! - Adopt the standard descriptors a WAS application is started with

use std::io;

use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::unix::pipe;
use tokio::net::UnixStream;

/// Control stream, readable data descriptor, writable data descriptor.
///
/// `input` carries the peer's body towards us, `output` carries ours.
#[derive(Debug)]
pub struct WasSocket<C, I, O> {
    pub control: C,
    pub input: I,
    pub output: O,
}

/// The descriptors a WAS application process inherits.
pub type PipeSocket = WasSocket<UnixStream, pipe::Receiver, pipe::Sender>;

/// Control fd of an application process.
pub const CONTROL_FD: i32 = 3;

impl<C, I, O> WasSocket<C, I, O>
where
    C: AsyncRead + AsyncWrite + Unpin,
    I: AsyncRead + Unpin,
    O: AsyncWrite + Unpin,
{
    pub fn new(control: C, input: I, output: O) -> Self {
        Self {
            control,
            input,
            output,
        }
    }

    pub(crate) fn split(self) -> SplitSocket<C, I, O> {
        let (control_r, control_w) = tokio::io::split(self.control);
        SplitSocket {
            control_r,
            control_w,
            input: self.input,
            output: self.output,
        }
    }
}

impl PipeSocket {
    /// Adopt fd 3 (control), stdin (request body), and stdout (response
    /// body). Call at most once per process.
    pub fn from_standard_fds() -> io::Result<Self> {
        use std::os::fd::{AsFd, FromRawFd};

        // SAFETY: fd 3 is handed to WAS applications by the process that
        // spawned us and nothing else in this process owns it.
        let control = unsafe { std::os::unix::net::UnixStream::from_raw_fd(CONTROL_FD) };
        control.set_nonblocking(true)?;
        let control = UnixStream::from_std(control)?;

        let input = io::stdin().as_fd().try_clone_to_owned()?;
        let input = pipe::Receiver::from_file(std::fs::File::from(input))?;
        let output = io::stdout().as_fd().try_clone_to_owned()?;
        let output = pipe::Sender::from_file(std::fs::File::from(output))?;

        Ok(Self::new(control, input, output))
    }
}

/// Driver view of a [`WasSocket`].
#[derive(Debug)]
pub(crate) struct SplitSocket<C, I, O> {
    pub control_r: ReadHalf<C>,
    pub control_w: WriteHalf<C>,
    pub input: I,
    pub output: O,
}

impl<C, I, O> SplitSocket<C, I, O>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    pub fn into_inner(self) -> WasSocket<C, I, O> {
        WasSocket {
            control: self.control_r.unsplit(self.control_w),
            input: self.input,
            output: self.output,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn split_and_join_keep_the_streams() {
        let (control, mut peer_control) = UnixStream::pair().unwrap();
        let (input, _peer_out) = UnixStream::pair().unwrap();
        let (output, _peer_in) = UnixStream::pair().unwrap();

        let socket = WasSocket::new(control, input, output);
        let mut split = socket.split();
        split.control_w.write_all(b"ping").await.unwrap();

        let mut socket = split.into_inner();
        let mut buf = [0u8; 4];
        peer_control.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        peer_control.write_all(b"pong").await.unwrap();
        socket.control.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }
}
