//! In-memory datagram endpoints for tests.

use super::endpoint::{DatagramReader, DatagramWriter};
use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Reader fed through a channel; reads fail once the sender is dropped
pub struct ChannelReader {
    rx: tokio::sync::Mutex<mpsc::Receiver<Vec<u8>>>,
}

pub fn channel_reader() -> (mpsc::Sender<Vec<u8>>, Arc<ChannelReader>) {
    let (tx, rx) = mpsc::channel(64);
    (
        tx,
        Arc::new(ChannelReader {
            rx: tokio::sync::Mutex::new(rx),
        }),
    )
}

#[async_trait]
impl DatagramReader for ChannelReader {
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self.rx.lock().await.recv().await {
            Some(data) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed")),
        }
    }
}

#[derive(Default)]
pub struct RecordingWriter {
    written: Mutex<Vec<Vec<u8>>>,
}

impl RecordingWriter {
    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.written.lock().unwrap().clone()
    }
}

#[async_trait]
impl DatagramWriter for RecordingWriter {
    async fn write(&self, payload: &Bytes) -> io::Result<usize> {
        self.written.lock().unwrap().push(payload.to_vec());
        Ok(payload.len())
    }
}
