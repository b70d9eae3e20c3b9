//! Links between two parties over anything that implements
//! `AsyncRead`/`AsyncWrite`, with built-in in-memory duplex links for tests.
//!
//! A link carries whole rounds: everything one party sent a peer during a
//! round travels as a single length-delimited bincode frame, tagged with the
//! round number so parties that fall out of lock-step are caught. Frames are
//! bounded by a configurable maximum length, which both ends must agree on.

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite, DuplexStream, ReadHalf, WriteHalf},
    time::error::Elapsed,
};
use tokio_util::{
    bytes::Bytes,
    codec::{FramedRead, FramedWrite, LengthDelimitedCodec},
};

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct RoundFrame {
    round: u64,
    messages: Vec<Vec<u8>>,
}

pub struct Link<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> {
    reader: FramedRead<R, LengthDelimitedCodec>,
    writer: FramedWrite<W, LengthDelimitedCodec>,
}

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Could not decode round frame: {0}")]
    MalformedFrame(#[from] bincode::Error),
    #[error("Round frame of {len} bytes exceeds the limit of {max} bytes")]
    FrameTooLarge { len: usize, max: usize },
    #[error("Peer is in round {got}, we are in round {expected}")]
    OutOfStep { expected: u64, got: u64 },
    #[error("Timed out after {0}")]
    TimeOut(Elapsed),
    #[error("Link closed")]
    Closed,
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> Link<R, W> {
    /// Largest round frame accepted unless configured otherwise.
    pub const DEFAULT_MAX_FRAME_LENGTH: usize = 256 << 20;

    pub fn new(reader: R, writer: W) -> Self {
        let codec = LengthDelimitedCodec::builder()
            .max_frame_length(Self::DEFAULT_MAX_FRAME_LENGTH)
            .new_codec();
        Self {
            reader: FramedRead::new(reader, codec.clone()),
            writer: FramedWrite::new(writer, codec),
        }
    }

    pub fn set_max_frame_length(&mut self, max: usize) {
        self.reader.decoder_mut().set_max_frame_length(max);
        self.writer.encoder_mut().set_max_frame_length(max);
    }

    /// Borrow both directions at once, so a round can be sent while the
    /// peer's round is awaited.
    pub fn split(&mut self) -> (Incoming<'_, R>, Outgoing<'_, W>) {
        (Incoming(&mut self.reader), Outgoing(&mut self.writer))
    }
}

pub struct Incoming<'a, R: AsyncRead>(&'a mut FramedRead<R, LengthDelimitedCodec>);
pub struct Outgoing<'a, W: AsyncWrite>(&'a mut FramedWrite<W, LengthDelimitedCodec>);

impl<R: AsyncRead + Unpin> Incoming<'_, R> {
    /// Wait for the peer's messages of `round`.
    pub async fn recv_round(&mut self, round: u64) -> Result<Vec<Bytes>, ConnectionError> {
        let buf = self.0.next().await.ok_or(ConnectionError::Closed)??;
        let frame: RoundFrame = bincode::deserialize(&buf)?;
        if frame.round != round {
            return Err(ConnectionError::OutOfStep {
                expected: round,
                got: frame.round,
            });
        }
        Ok(frame.messages.into_iter().map(Bytes::from).collect())
    }
}

impl<W: AsyncWrite + Unpin> Outgoing<'_, W> {
    pub async fn send_round(
        &mut self,
        round: u64,
        messages: &[Bytes],
    ) -> Result<(), ConnectionError> {
        let frame = RoundFrame {
            round,
            messages: messages.iter().map(|msg| msg.to_vec()).collect(),
        };
        let buf = bincode::serialize(&frame)?;
        let max = self.0.encoder().max_frame_length();
        if buf.len() > max {
            return Err(ConnectionError::FrameTooLarge {
                len: buf.len(),
                max,
            });
        }
        self.0.send(Bytes::from(buf)).await?;
        Ok(())
    }
}

pub type DuplexLink = Link<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

impl DuplexLink {
    /// Both ends of an in-memory link.
    pub fn in_memory() -> (Self, Self) {
        let (s1, s2) = tokio::io::duplex(1 << 16);
        let (r1, w1) = tokio::io::split(s1);
        let (r2, w2) = tokio::io::split(s2);
        (Self::new(r1, w1), Self::new(r2, w2))
    }
}
