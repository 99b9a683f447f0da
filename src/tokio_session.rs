//! Asynchronous request/response session over any `tokio` byte stream.
//!
//! A [`Session`] owns the write half of the stream and a background reader
//! task owning the read half. Sent requests go through the encoder and the
//! shared [`PendingRequests`] tracker, received bytes go through the decoder
//! reading that same tracker. Both directions are recorded in a
//! [`SessionLog`].
//!
//! ```no_run
//! use mbterm_lib::encoder::RequestDescriptor;
//! use mbterm_lib::protocol::BaudRate;
//! use mbterm_lib::session_log::SessionLog;
//! use mbterm_lib::tokio_common::serial_port_builder;
//! use mbterm_lib::tokio_session::{Session, SessionOptions};
//! use mbterm_lib::tracker::PendingRequests;
//! use std::time::Duration;
//! use tokio_serial::SerialPortBuilderExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let port = serial_port_builder("/dev/ttyUSB0", &BaudRate::B9600).open_native_async()?;
//!     let mut session = Session::start(
//!         port,
//!         SessionOptions::default(),
//!         PendingRequests::new(),
//!         SessionLog::default(),
//!     );
//!
//!     let request = RequestDescriptor::read_holding_registers(1, 0x0000, 2);
//!     let response = session.request(&request, Duration::from_secs(1)).await?;
//!     println!("{response}");
//!
//!     session.close().await?;
//!     Ok(())
//! }
//! ```

use crate::assembler::FrameAssembler;
use crate::decoder::{self, DecodedResponse};
use crate::encoder::{self, Frame, RequestDescriptor};
use crate::format;
use crate::protocol::{BaudRate, Direction, FunctionCode, EXCEPTION_BIT};
use crate::session_log::{SessionLog, SessionLogEntry};
use crate::tokio_common::{minimum_rtu_delay, Error, Result};
use crate::tracker::PendingRequests;
use log::{debug, trace, warn};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Size of a single read from the stream.
const READ_BUFFER_SIZE: usize = 512;
/// Decoded responses waiting for the caller.
const RESPONSE_QUEUE_SIZE: usize = 64;

/// How received bytes are cut into frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum ReadMode {
    /// Every chunk returned by a read is decoded as one frame.
    #[default]
    PerChunk,
    /// Chunks are buffered and cut at the frame length implied by the
    /// function code. Leftovers are decoded after `inter_frame_gap` of silence.
    Reassemble,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub read_mode: ReadMode,
    pub inter_frame_gap: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            read_mode: ReadMode::default(),
            inter_frame_gap: minimum_rtu_delay(&BaudRate::default()),
        }
    }
}

impl SessionOptions {
    /// Options for a serial line at `baud_rate`.
    pub fn for_baud_rate(read_mode: ReadMode, baud_rate: &BaudRate) -> Self {
        Self {
            read_mode,
            inter_frame_gap: minimum_rtu_delay(baud_rate),
        }
    }
}

/// A running session on one byte stream.
pub struct Session<T> {
    writer: WriteHalf<T>,
    tracker: PendingRequests,
    log: SessionLog,
    responses: mpsc::Receiver<Result<DecodedResponse>>,
    shutdown: watch::Sender<bool>,
    reader: Option<JoinHandle<()>>,
}

impl<T> Session<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Splits `io` and spawns the reader task. Must be called inside a
    /// `tokio` runtime.
    pub fn start(
        io: T,
        options: SessionOptions,
        tracker: PendingRequests,
        log: SessionLog,
    ) -> Self {
        let (reader, writer) = tokio::io::split(io);
        let (response_tx, responses) = mpsc::channel(RESPONSE_QUEUE_SIZE);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let dispatch = Dispatch {
            tracker: tracker.clone(),
            log: log.clone(),
            responses: response_tx,
        };
        let reader = tokio::spawn(read_loop(reader, options, dispatch, shutdown_rx));
        debug!("Session started with {options:?}");
        Self {
            writer,
            tracker,
            log,
            responses,
            shutdown,
            reader: Some(reader),
        }
    }

    pub fn tracker(&self) -> &PendingRequests {
        &self.tracker
    }

    pub fn log(&self) -> &SessionLog {
        &self.log
    }

    /// Encodes, records and writes one request.
    ///
    /// An invalid request is rejected before anything touches the stream,
    /// the tracker or the log. The frame is logged once it was written; a
    /// failed write is logged as a text note instead.
    pub async fn send(&mut self, request: &RequestDescriptor) -> Result<Frame> {
        let frame = encoder::encode_and_track(request, &self.tracker)?;
        debug!("TX {frame}");
        if let Err(error) = self.write_frame(&frame).await {
            self.log.append(SessionLogEntry::text(
                Direction::Request,
                format!("Failed to send {frame}: {error}"),
            ));
            return Err(error.into());
        }
        self.log.append(SessionLogEntry::frame(
            Direction::Request,
            frame.as_bytes().to_vec(),
            self.tracker.last_quantity(request.function),
        ));
        Ok(frame)
    }

    async fn write_frame(&mut self, frame: &Frame) -> std::io::Result<()> {
        self.writer.write_all(frame.as_bytes()).await?;
        self.writer.flush().await
    }

    /// Next received frame in arrival order.
    ///
    /// Returns `None` once the reader has stopped and every queued response
    /// was taken.
    pub async fn next_response(&mut self) -> Option<Result<DecodedResponse>> {
        self.responses.recv().await
    }

    /// Sends `request` and waits up to `timeout` for the next response.
    ///
    /// Responses that arrived before the request was sent are discarded.
    pub async fn request(
        &mut self,
        request: &RequestDescriptor,
        timeout: Duration,
    ) -> Result<DecodedResponse> {
        while let Ok(stale) = self.responses.try_recv() {
            debug!("Discarding unsolicited response: {stale:?}");
        }
        self.send(request).await?;
        match tokio::time::timeout(timeout, self.next_response()).await {
            Ok(Some(response)) => response,
            Ok(None) => Err(Error::Closed),
            Err(_) => Err(Error::Timeout(timeout)),
        }
    }

    /// Stops the reader task and shuts the write half down.
    pub async fn close(mut self) -> Result<()> {
        // The receiver may already be gone if the reader ended on its own.
        let _ = self.shutdown.send(true);
        // Unblocks a reader waiting for room in a full response queue.
        self.responses.close();
        if let Some(reader) = self.reader.take() {
            if let Err(error) = reader.await {
                warn!("Reader task ended abnormally: {error}");
            }
        }
        self.writer.shutdown().await?;
        debug!("Session closed");
        Ok(())
    }
}

/// Receiving side shared by every frame the reader hands over.
struct Dispatch {
    tracker: PendingRequests,
    log: SessionLog,
    responses: mpsc::Sender<Result<DecodedResponse>>,
}

impl Dispatch {
    /// Logs and decodes one received frame. Returns `false` when nobody is
    /// listening anymore.
    async fn deliver(&self, bytes: Vec<u8>) -> bool {
        let quantity = bytes
            .get(1)
            .and_then(|&code| FunctionCode::try_from(code & !EXCEPTION_BIT).ok())
            .and_then(|function| self.tracker.last_quantity(function));
        self.log.append(SessionLogEntry::frame(
            Direction::Response,
            bytes.clone(),
            quantity,
        ));
        let decoded = decoder::decode(&bytes, Direction::Response, &self.tracker);
        match &decoded {
            Ok(response) => debug!("RX {}", format::to_hex(&response.raw_frame)),
            Err(error) => debug!("RX {} ({error})", format::to_hex(&bytes)),
        }
        self.responses.send(decoded.map_err(Error::from)).await.is_ok()
    }
}

async fn read_loop<T: AsyncRead>(
    mut reader: ReadHalf<T>,
    options: SessionOptions,
    dispatch: Dispatch,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buffer = [0u8; READ_BUFFER_SIZE];
    let mut assembler = FrameAssembler::new();
    loop {
        let read = tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(options.inter_frame_gap), if assembler.pending() > 0 => {
                if let Some(leftover) = assembler.flush() {
                    trace!("Inter-frame silence, flushing {} byte(s)", leftover.len());
                    if !dispatch.deliver(leftover).await {
                        break;
                    }
                }
                continue;
            }
            read = reader.read(&mut buffer) => read,
        };

        match read {
            Ok(0) => {
                debug!("End of stream");
                if let Some(leftover) = assembler.flush() {
                    dispatch.deliver(leftover).await;
                }
                break;
            }
            Ok(length) => {
                let chunk = &buffer[..length];
                trace!("Read {} byte(s): {}", length, format::to_hex(chunk));
                let frames = match options.read_mode {
                    ReadMode::PerChunk => vec![chunk.to_vec()],
                    ReadMode::Reassemble => assembler.push(chunk),
                };
                let mut open = true;
                for frame in frames {
                    open = dispatch.deliver(frame).await;
                    if !open {
                        break;
                    }
                }
                if !open {
                    break;
                }
            }
            Err(error) => {
                warn!("Read failed: {error}");
                let _ = dispatch.responses.send(Err(error.into())).await;
                break;
            }
        }
    }
    debug!("Reader task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::Payload;
    use crate::error::{InvalidRequest, MalformedFrame};
    use crate::session_log::LogContent;
    use assert_matches::assert_matches;
    use tokio::io::DuplexStream;

    fn response(body: &[u8]) -> Vec<u8> {
        Frame::with_crc(body.to_vec()).into_bytes()
    }

    fn start(read_mode: ReadMode) -> (Session<DuplexStream>, DuplexStream) {
        let (client, device) = tokio::io::duplex(256);
        let options = SessionOptions {
            read_mode,
            inter_frame_gap: Duration::from_millis(100),
        };
        let session = Session::start(client, options, PendingRequests::new(), SessionLog::new(16));
        (session, device)
    }

    async fn expect_request(device: &mut DuplexStream, frame: &Frame) {
        let mut received = vec![0u8; frame.len()];
        device.read_exact(&mut received).await.unwrap();
        assert_eq!(received, frame.as_bytes());
    }

    #[tokio::test]
    async fn read_registers_round_trip() {
        let (mut session, mut device) = start(ReadMode::PerChunk);
        let request = RequestDescriptor::read_holding_registers(1, 0x0010, 2);
        let frame = session.send(&request).await.unwrap();
        expect_request(&mut device, &frame).await;

        device
            .write_all(&response(&[0x01, 0x03, 0x04, 0x00, 0x0A, 0x01, 0x02]))
            .await
            .unwrap();
        let decoded = session.next_response().await.unwrap().unwrap();
        assert_eq!(decoded.registers(), Some(&[0x000A, 0x0102][..]));
        assert_eq!(decoded.start_address, Some(0x0010));
        assert!(decoded.crc_valid);

        let entries = session.log().entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].direction, Direction::Request);
        assert_eq!(entries[0].associated_quantity, Some(2));
        assert_eq!(entries[1].direction, Direction::Response);
        session.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn session_moves_between_worker_threads() {
        let (mut session, mut device) = start(ReadMode::PerChunk);
        let request = RequestDescriptor::read_holding_registers(1, 0x0010, 1);
        let frame = encoder::encode(&request).unwrap();
        let device_task = tokio::spawn(async move {
            expect_request(&mut device, &frame).await;
            device
                .write_all(&response(&[0x01, 0x03, 0x02, 0x00, 0x2A]))
                .await
                .unwrap();
            device
        });
        let client = tokio::spawn(async move {
            let decoded = session.request(&request, Duration::from_secs(2)).await;
            session.close().await.unwrap();
            decoded
        });
        let decoded = client.await.unwrap().unwrap();
        assert_eq!(decoded.registers(), Some(&[0x002A][..]));
        drop(device_task.await.unwrap());
    }

    #[tokio::test]
    async fn coil_response_uses_tracked_quantity() {
        let (mut session, mut device) = start(ReadMode::PerChunk);
        let request = RequestDescriptor::read_coils(1, 0, 3);
        let frame = session.send(&request).await.unwrap();
        expect_request(&mut device, &frame).await;

        device
            .write_all(&response(&[0x01, 0x01, 0x01, 0b0000_0101]))
            .await
            .unwrap();
        let decoded = session.next_response().await.unwrap().unwrap();
        assert_eq!(decoded.bits(), Some(&[true, false, true][..]));
    }

    #[tokio::test]
    async fn invalid_request_is_not_written() {
        let (mut session, _device) = start(ReadMode::PerChunk);
        let request = RequestDescriptor::read_holding_registers(0, 0, 1);
        let result = session.send(&request).await;
        assert_matches!(
            result,
            Err(Error::Engine(crate::Error::InvalidRequest(
                InvalidRequest::SlaveIdOutOfRange(0)
            )))
        );
        assert!(session.log().is_empty());
        assert_eq!(
            session.tracker().last_quantity(FunctionCode::ReadHoldingRegisters),
            None
        );
    }

    #[tokio::test]
    async fn request_times_out_without_response() {
        let (mut session, mut device) = start(ReadMode::PerChunk);
        let request = RequestDescriptor::write_single_register(1, 1, 3);
        let result = session.request(&request, Duration::from_millis(50)).await;
        assert_matches!(result, Err(Error::Timeout(timeout)) if timeout == Duration::from_millis(50));

        let frame = encoder::encode(&request).unwrap();
        expect_request(&mut device, &frame).await;
    }

    #[tokio::test]
    async fn request_returns_echo() {
        let (mut session, mut device) = start(ReadMode::PerChunk);
        let request = RequestDescriptor::write_single_register(1, 1, 3);
        let frame = encoder::encode(&request).unwrap();
        let device_task = tokio::spawn(async move {
            expect_request(&mut device, &frame).await;
            device.write_all(frame.as_bytes()).await.unwrap();
            device
        });

        let decoded = session
            .request(&request, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(
            decoded.payload,
            Payload::SingleRegister {
                address: 1,
                value: 3
            }
        );
        drop(device_task.await.unwrap());
    }

    #[tokio::test]
    async fn malformed_chunk_does_not_stop_reader() {
        let (mut session, mut device) = start(ReadMode::PerChunk);
        device.write_all(&[0x01, 0x03]).await.unwrap();
        assert_matches!(
            session.next_response().await,
            Some(Err(Error::Engine(crate::Error::MalformedFrame(
                MalformedFrame::TooShort(2)
            ))))
        );

        device.write_all(&response(&[0x01, 0x83, 0x02])).await.unwrap();
        let decoded = session.next_response().await.unwrap().unwrap();
        assert!(decoded.is_exception);
    }

    #[tokio::test]
    async fn reassembles_split_frame() {
        let (mut session, mut device) = start(ReadMode::Reassemble);
        let bytes = response(&[0x01, 0x04, 0x02, 0x12, 0x34]);
        device.write_all(&bytes[..3]).await.unwrap();
        tokio::task::yield_now().await;
        device.write_all(&bytes[3..]).await.unwrap();

        let decoded = session.next_response().await.unwrap().unwrap();
        assert_eq!(decoded.registers(), Some(&[0x1234][..]));
        assert_eq!(decoded.raw_frame, bytes);
    }

    #[tokio::test]
    async fn flushes_leftover_after_silence() {
        let (mut session, mut device) = start(ReadMode::Reassemble);
        device.write_all(&[0x01, 0x03, 0x04, 0x00]).await.unwrap();
        assert_matches!(
            session.next_response().await,
            Some(Err(Error::Engine(crate::Error::MalformedFrame(
                MalformedFrame::TooShort(4)
            ))))
        );
        let entries = session.log().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].content,
            LogContent::Frame(vec![0x01, 0x03, 0x04, 0x00])
        );
    }

    #[tokio::test]
    async fn end_of_stream_ends_responses() {
        let (mut session, device) = start(ReadMode::PerChunk);
        drop(device);
        assert!(session.next_response().await.is_none());
        let result = session
            .request(
                &RequestDescriptor::read_coils(1, 0, 1),
                Duration::from_millis(50),
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn close_returns_with_full_response_queue() {
        let (client, mut device) = tokio::io::duplex(4096);
        let options = SessionOptions {
            read_mode: ReadMode::Reassemble,
            inter_frame_gap: Duration::from_millis(100),
        };
        let session = Session::start(client, options, PendingRequests::new(), SessionLog::new(16));
        let exception = response(&[0x01, 0x83, 0x02]);
        for _ in 0..RESPONSE_QUEUE_SIZE + 16 {
            device.write_all(&exception).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let closed = tokio::time::timeout(Duration::from_secs(2), session.close()).await;
        assert_matches!(closed, Ok(Ok(())));
    }

    #[tokio::test]
    async fn failed_write_is_logged_as_note() {
        let (mut session, device) = start(ReadMode::PerChunk);
        drop(device);
        let result = session
            .send(&RequestDescriptor::read_coils(1, 0, 1))
            .await;
        assert_matches!(result, Err(Error::Io(_)));

        let entries = session.log().entries();
        assert_eq!(entries.len(), 1);
        assert_matches!(&entries[0].content, LogContent::Text(note) if note.starts_with("Failed to send 01 01"));
        assert_eq!(entries[0].frame_bytes(), None);
    }

    #[tokio::test]
    async fn close_stops_idle_reader() {
        let (session, _device) = start(ReadMode::Reassemble);
        session.close().await.unwrap();
    }
}
