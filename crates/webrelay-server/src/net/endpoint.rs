//! Datagram endpoints the bridge reads from and writes to.

use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use webrtc::data::data_channel::DataChannel;

/// Source of inbound datagrams for one session.
///
/// A read error means the endpoint is closed; the reader is not used again.
#[async_trait]
pub trait DatagramReader: Send + Sync {
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Sink for datagrams addressed to one session
#[async_trait]
pub trait DatagramWriter: Send + Sync {
    async fn write(&self, payload: &Bytes) -> io::Result<usize>;
}

#[async_trait]
impl DatagramReader for DataChannel {
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        match DataChannel::read(self, buf).await {
            // The SCTP stream reports reset/shutdown as an empty read
            Ok(0) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "data channel stream closed",
            )),
            Ok(n) => Ok(n),
            Err(e) => Err(io::Error::other(e)),
        }
    }
}

#[async_trait]
impl DatagramWriter for DataChannel {
    async fn write(&self, payload: &Bytes) -> io::Result<usize> {
        DataChannel::write(self, payload).await.map_err(io::Error::other)
    }
}
