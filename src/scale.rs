use futures::{FutureExt, SinkExt, StreamExt};
use std::{pin::Pin, time::Duration};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, StopBits};
use tokio_util::codec::Decoder;
use tracing::debug;

use super::proto::{
    codec::ScaleCodec,
    command::Command,
    response::{self, WeightReading},
    ProtoError,
};
use crate::proto::Result;
use crate::DEFAULT_TIMEOUT;

trait AsyncReadWrite<S>: futures::Sink<S> + futures::Stream {}

impl<T, S> AsyncReadWrite<S> for T where T: futures::Sink<S> + futures::Stream {}

#[allow(clippy::type_complexity)]
type LineStream = Pin<
    Box<
        dyn AsyncReadWrite<
                Command,
                Error = std::io::Error,
                Item = std::result::Result<String, std::io::Error>,
            > + Send,
    >,
>;

/// The one command waiting for its answer.
#[derive(Debug)]
struct PendingExchange {
    command: Command,
    timeout: Duration,
    deadline: Instant,
}

impl PendingExchange {
    fn arm(command: Command, timeout: Duration) -> Self {
        Self {
            command,
            timeout,
            deadline: Instant::now() + timeout,
        }
    }

    /// Wait for the next line or the deadline, whichever comes first.
    /// Consumes the record, so the slot resolves at most once.
    async fn resolve(self, stream: &mut LineStream) -> Resolution {
        match tokio::time::timeout_at(self.deadline, stream.next()).await {
            Ok(Some(Ok(line))) => {
                debug!(command = %self.command, response = %line, "RX");
                Resolution::Line(line)
            }
            Ok(Some(Err(ioerr))) => Resolution::Failed(ioerr.into()),
            Ok(None) => Resolution::Closed,
            Err(_) => {
                debug!(command = %self.command, "no response within {:?}", self.timeout);
                Resolution::Failed(ProtoError::Timeout(self.timeout))
            }
        }
    }
}

enum Resolution {
    Line(String),
    Closed,
    Failed(ProtoError),
}

/// Connection to a scale speaking the `Q` / `ST,<value> <unit>` protocol.
pub struct Scale {
    stream: Option<LineStream>,
    timeout: Duration,
}

impl Scale {
    /// Open the serial port at `com`, configured 7E1 as the scales expect.
    pub fn open(com: impl AsRef<str>, baudrate: u32) -> Result<Self> {
        #[allow(unused_mut)]
        let mut port = tokio_serial::new(com.as_ref(), baudrate)
            .data_bits(DataBits::Seven)
            .parity(Parity::Even)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open_native_async()?;

        #[cfg(unix)]
        port.set_exclusive(false)?;

        Ok(Self::from_stream(port))
    }

    /// Speak the protocol over any byte stream, e.g. a TCP serial bridge
    /// or the built-in simulator.
    pub fn from_stream<T>(io: T) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let stream = ScaleCodec::default().framed(io);

        Self {
            stream: Some(Box::pin(stream)),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Drop the underlying channel. Later exchanges fail with
    /// [`ProtoError::ChannelNotOpen`].
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!("channel closed");
        }
    }

    /// Query the current weight
    pub async fn read_weight(&mut self) -> Result<WeightReading> {
        self.send(Command::Query).await
    }

    /// Send one command and decode the single line answering it.
    pub async fn send(&mut self, command: Command) -> Result<WeightReading> {
        let timeout = self.timeout;
        let stream = self.stream.as_mut().ok_or(ProtoError::ChannelNotOpen)?;

        if Self::discard_stale(stream) {
            self.close();
            return Err(ProtoError::ChannelNotOpen);
        }

        debug!(command = %command, "TX");
        stream
            .send(command.clone())
            .await
            .map_err(ProtoError::WriteFailed)?;

        let pending = PendingExchange::arm(command, timeout);
        match pending.resolve(stream).await {
            Resolution::Line(line) => Ok(response::parse(&line)),
            Resolution::Failed(err) => Err(err),
            Resolution::Closed => {
                self.close();
                Err(ProtoError::ChannelNotOpen)
            }
        }
    }

    /// Throw away lines that arrived after their exchange timed out.
    /// Returns true if the stream has ended.
    fn discard_stale(stream: &mut LineStream) -> bool {
        while let Some(item) = stream.next().now_or_never() {
            match item {
                Some(Ok(line)) => debug!(response = %line, "discarding stale line"),
                Some(Err(ioerr)) => debug!(error = %ioerr, "discarding stale error"),
                None => return true,
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::proto::response::Status;
    use crate::sim::{Reply, Simulator};

    fn scripted(replies: Vec<Reply>) -> (Scale, crate::sim::Requests) {
        let (io, requests) = Simulator::scripted(replies).spawn();
        (Scale::from_stream(io), requests)
    }

    #[tokio::test]
    async fn test_read_weight() {
        let (mut scale, requests) = scripted(vec![Reply::line("ST,+0012.34 kg")]);
        let reading = scale.read_weight().await.unwrap();
        assert_eq!(reading, WeightReading::stable(12.34, "kg"));
        assert_eq!(requests.count(), 1);
    }

    #[tokio::test]
    async fn test_protocol_errors_are_readings() {
        let (mut scale, _) = scripted(vec![Reply::line("OL"), Reply::line("garbage")]);
        assert_eq!(scale.read_weight().await.unwrap().status(), Status::Overload);
        assert_eq!(scale.read_weight().await.unwrap().status(), Status::Error);
    }

    #[tokio::test]
    async fn test_unknown_command_rejected() {
        let (mut scale, _) = scripted(vec![]);
        let reading = scale.send(Command::from("X")).await.unwrap();
        assert_eq!(reading.status(), Status::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let (mut scale, _) = scripted(vec![Reply::Silent, Reply::line("US,1.00 kg")]);
        let start = Instant::now();
        let err = scale.read_weight().await.unwrap_err();
        assert!(matches!(err, ProtoError::Timeout(t) if t == DEFAULT_TIMEOUT));
        assert!(start.elapsed() >= DEFAULT_TIMEOUT);

        // The expired timer does not touch the next exchange
        let reading = scale.read_weight().await.unwrap();
        assert_eq!(reading, WeightReading::unstable(1.0, "kg"));
        assert!(scale.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_line_is_not_matched_to_next_command() {
        let (mut scale, requests) = scripted(vec![
            Reply::delayed(Duration::from_secs(3), "US,9.99 kg"),
            Reply::line("ST,1.00 kg"),
        ]);
        assert!(matches!(
            scale.read_weight().await,
            Err(ProtoError::Timeout(_))
        ));

        tokio::time::sleep(Duration::from_secs(2)).await;
        let reading = scale.read_weight().await.unwrap();
        assert_eq!(reading, WeightReading::stable(1.0, "kg"));
        assert_eq!(requests.count(), 2);
    }

    #[tokio::test]
    async fn test_hangup_closes_channel() {
        let (mut scale, _) = scripted(vec![Reply::Hangup]);
        assert!(matches!(
            scale.read_weight().await,
            Err(ProtoError::ChannelNotOpen)
        ));
        assert!(!scale.is_open());
        assert!(matches!(
            scale.read_weight().await,
            Err(ProtoError::ChannelNotOpen)
        ));
    }

    #[tokio::test]
    async fn test_closed_channel() {
        let (mut scale, requests) = scripted(vec![Reply::line("ST,1.00 kg")]);
        scale.close();
        assert!(matches!(
            scale.read_weight().await,
            Err(ProtoError::ChannelNotOpen)
        ));
        assert_eq!(requests.count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_command_write_failed() {
        let (mut scale, requests) = scripted(vec![]);
        let err = scale.send(Command::from("Q\r\nQ")).await.unwrap_err();
        assert!(matches!(err, ProtoError::WriteFailed(_)));
        assert_eq!(requests.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_timeout() {
        let (scale, _) = scripted(vec![Reply::Silent]);
        let mut scale = scale.with_timeout(Duration::from_millis(250));
        let start = Instant::now();
        let err = scale.read_weight().await.unwrap_err();
        assert!(matches!(err, ProtoError::Timeout(t) if t == Duration::from_millis(250)));
        assert!(start.elapsed() < DEFAULT_TIMEOUT);
    }
}
