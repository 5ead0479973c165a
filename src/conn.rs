use anyhow::{Context, Result, anyhow, bail};
use crossbeam_channel::{Receiver, Sender, bounded};
use serde::Serialize;
use std::fmt;
use std::io::{BufReader, Read, Write};
use std::net::TcpStream;
use std::thread::JoinHandle;

use crate::constants::{
    MAX_FRAME_SIZE, READ_BUFFER_SIZE, WRITE_BUFFER_SIZE, WRITER_POOL_BUFFERS,
};
use crate::label::{LABEL_BYTES, Label};

/// Connection transfer counters
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ConnStats {
    /// Bytes handed to the writer
    pub sent: u64,
    /// Bytes consumed from the peer
    pub received: u64,
    /// Number of buffer handoffs to the writer thread
    pub flushes: u64,
}

/// Either a recycled write buffer or the error that consumed one
type WriteOutcome = std::io::Result<Vec<u8>>;

struct WriterHandle {
    work_tx: Sender<Vec<u8>>,
    free_rx: Receiver<WriteOutcome>,
    handle: JoinHandle<std::io::Result<()>>,
}

fn writer_loop<W: Write>(
    mut out: W,
    work_rx: Receiver<Vec<u8>>,
    free_tx: Sender<WriteOutcome>,
) -> std::io::Result<()> {
    for mut buf in work_rx {
        let result = out.write_all(&buf).and_then(|_| out.flush());
        buf.clear();
        let outcome = result.map(|_| buf);
        if free_tx.send(outcome).is_err() {
            break;
        }
    }
    out.flush()
}

/// Framed, buffered duplex connection between the two parties
///
/// All integers travel big-endian; `data` frames carry a u32 length prefix;
/// labels are 16 raw bytes. Writes accumulate into 64 KiB buffers that a
/// dedicated writer thread drains through a small bounded pool, so garbling
/// overlaps I/O. A writer error is sticky: the operation that hits it and
/// every later one fails.
pub struct Connection<R: Read> {
    reader: BufReader<R>,
    buf: Vec<u8>,
    writer: Option<WriterHandle>,
    sticky: Option<String>,
    sent: u64,
    received: u64,
    flushes: u64,
}

impl<R: Read> fmt::Debug for Connection<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("sent", &self.sent)
            .field("received", &self.received)
            .field("flushes", &self.flushes)
            .finish_non_exhaustive()
    }
}

impl Connection<TcpStream> {
    /// Wrap a TCP stream, cloning the handle for the read side
    pub fn tcp(stream: TcpStream) -> Result<Self> {
        let reader = stream.try_clone().context("cloning TCP stream")?;
        Ok(Self::new(reader, stream))
    }
}

impl<R: Read> Connection<R> {
    /// Build a connection from separate read and write halves
    pub fn new<W: Write + Send + 'static>(reader: R, writer: W) -> Self {
        let (work_tx, work_rx) = bounded::<Vec<u8>>(WRITER_POOL_BUFFERS);
        let (free_tx, free_rx) = bounded::<WriteOutcome>(WRITER_POOL_BUFFERS);
        for _ in 0..WRITER_POOL_BUFFERS - 1 {
            free_tx
                .send(Ok(Vec::with_capacity(WRITE_BUFFER_SIZE)))
                .expect("seeding an empty bounded channel");
        }
        let handle = std::thread::spawn(move || writer_loop(writer, work_rx, free_tx));
        Connection {
            reader: BufReader::with_capacity(READ_BUFFER_SIZE, reader),
            buf: Vec::with_capacity(WRITE_BUFFER_SIZE),
            writer: Some(WriterHandle { work_tx, free_rx, handle }),
            sticky: None,
            sent: 0,
            received: 0,
            flushes: 0,
        }
    }

    fn check_sticky(&self) -> Result<()> {
        if let Some(error) = &self.sticky {
            bail!("connection writer failed earlier: {}", error);
        }
        Ok(())
    }

    /// Hand the accumulated write buffer to the writer thread
    pub fn flush(&mut self) -> Result<()> {
        self.check_sticky()?;
        if self.buf.is_empty() {
            return Ok(());
        }
        let writer = self
            .writer
            .as_ref()
            .ok_or_else(|| anyhow!("connection is closed"))?;
        let full = std::mem::take(&mut self.buf);
        if writer.work_tx.send(full).is_err() {
            self.sticky = Some("writer thread exited".to_string());
            bail!("connection writer exited unexpectedly");
        }
        match writer.free_rx.recv() {
            Ok(Ok(recycled)) => self.buf = recycled,
            Ok(Err(error)) => {
                self.sticky = Some(error.to_string());
                bail!("connection write failed: {}", error);
            }
            Err(_) => {
                self.sticky = Some("writer thread exited".to_string());
                bail!("connection writer exited unexpectedly");
            }
        }
        self.flushes += 1;
        Ok(())
    }

    fn flush_if_full(&mut self) -> Result<()> {
        if self.buf.len() >= WRITE_BUFFER_SIZE {
            self.flush()?;
        }
        Ok(())
    }

    /// Queue a single byte
    pub fn send_byte(&mut self, value: u8) -> Result<()> {
        self.check_sticky()?;
        self.buf.push(value);
        self.sent += 1;
        self.flush_if_full()
    }

    /// Queue a big-endian u16
    pub fn send_u16(&mut self, value: u16) -> Result<()> {
        self.check_sticky()?;
        self.buf.extend_from_slice(&value.to_be_bytes());
        self.sent += 2;
        self.flush_if_full()
    }

    /// Queue a big-endian u32
    pub fn send_u32(&mut self, value: u32) -> Result<()> {
        self.check_sticky()?;
        self.buf.extend_from_slice(&value.to_be_bytes());
        self.sent += 4;
        self.flush_if_full()
    }

    /// Queue a length-prefixed byte frame
    pub fn send_data(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > MAX_FRAME_SIZE {
            bail!("frame of {} bytes exceeds the frame limit", data.len());
        }
        self.send_u32(data.len() as u32)?;
        self.buf.extend_from_slice(data);
        self.sent += data.len() as u64;
        self.flush_if_full()
    }

    /// Queue a UTF-8 string as a data frame
    pub fn send_string(&mut self, value: &str) -> Result<()> {
        self.send_data(value.as_bytes())
    }

    /// Queue raw bytes with no length prefix; the peer must know the layout
    pub(crate) fn send_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.check_sticky()?;
        self.buf.extend_from_slice(data);
        self.sent += data.len() as u64;
        self.flush_if_full()
    }

    /// Queue the 16 raw bytes of a label, with no length prefix
    pub fn send_label(&mut self, label: &Label) -> Result<()> {
        self.check_sticky()?;
        self.buf.extend_from_slice(label.as_bytes());
        self.sent += LABEL_BYTES as u64;
        self.flush_if_full()
    }

    fn read_exact_counted(&mut self, out: &mut [u8]) -> Result<()> {
        self.reader
            .read_exact(out)
            .context("connection read failed")?;
        self.received += out.len() as u64;
        Ok(())
    }

    /// Read a single byte
    pub fn receive_byte(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.read_exact_counted(&mut byte)?;
        Ok(byte[0])
    }

    /// Read a big-endian u16
    pub fn receive_u16(&mut self) -> Result<u16> {
        let mut bytes = [0u8; 2];
        self.read_exact_counted(&mut bytes)?;
        Ok(u16::from_be_bytes(bytes))
    }

    /// Read a big-endian u32
    pub fn receive_u32(&mut self) -> Result<u32> {
        let mut bytes = [0u8; 4];
        self.read_exact_counted(&mut bytes)?;
        Ok(u32::from_be_bytes(bytes))
    }

    /// Read a length-prefixed byte frame
    pub fn receive_data(&mut self) -> Result<Vec<u8>> {
        let len = self.receive_u32()? as usize;
        if len > MAX_FRAME_SIZE {
            bail!("peer announced an oversized frame of {} bytes", len);
        }
        let mut data = vec![0u8; len];
        self.read_exact_counted(&mut data)?;
        Ok(data)
    }

    /// Read a data frame and decode it as UTF-8
    pub fn receive_string(&mut self) -> Result<String> {
        let data = self.receive_data()?;
        String::from_utf8(data).context("peer sent invalid UTF-8")
    }

    /// Read the 16 raw bytes of a label
    pub fn receive_label(&mut self) -> Result<Label> {
        let mut bytes = [0u8; LABEL_BYTES];
        self.read_exact_counted(&mut bytes)?;
        Ok(Label::new(bytes))
    }

    /// Transfer counters
    pub fn stats(&self) -> ConnStats {
        ConnStats {
            sent: self.sent,
            received: self.received,
            flushes: self.flushes,
        }
    }

    fn shutdown(&mut self) -> Result<()> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        let WriterHandle { work_tx, free_rx, handle } = writer;
        drop(work_tx);
        drop(free_rx);
        match handle.join() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => bail!("connection writer failed on close: {}", error),
            Err(_) => bail!("connection writer panicked"),
        }
    }

    /// Flush pending bytes and stop the writer thread
    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        self.shutdown()
    }
}

impl<R: Read> Drop for Connection<R> {
    fn drop(&mut self) {
        let _ = self.flush();
        let _ = self.shutdown();
    }
}
