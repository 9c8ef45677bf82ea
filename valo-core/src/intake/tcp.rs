//! Minimal TCP broker client.
//!
//! Reads length-prefixed JSON envelopes off a socket and groups them into
//! per-topic batches. Acks are local (the transport is a plain stream); lag
//! is reported as the number of batches queued behind the current poll.

use super::codec::{Envelope, FrameDecoder};
use super::{BrokerConsumer, Record, RecordBatch, Topic};
use crate::core::EngineError;
use crate::resilience::{BackoffConfig, ExponentialBackoff};
use std::collections::VecDeque;
use std::io::Read;
use std::net::TcpStream;
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub struct TcpRecordFeed {
    stream: TcpStream,
    decoder: FrameDecoder,
    queued: VecDeque<RecordBatch>,
    next_offset: u64,
    group: String,
}

impl TcpRecordFeed {
    /// Connect once.
    pub fn connect(addr: &str, group: impl Into<String>) -> Result<Self, EngineError> {
        let stream = TcpStream::connect(addr)
            .map_err(|e| EngineError::Processing(format!("connect {addr}: {e}")))?;
        stream
            .set_nodelay(true)
            .map_err(|e| EngineError::Processing(format!("nodelay: {e}")))?;
        info!(addr, "broker connected");
        Ok(Self {
            stream,
            decoder: FrameDecoder::new(),
            queued: VecDeque::new(),
            next_offset: 0,
            group: group.into(),
        })
    }

    /// Connect with retries until `window` elapses. Exhaustion maps to exit
    /// code 3 at the binary boundary.
    pub fn connect_with_retry(
        addr: &str,
        group: impl Into<String>,
        window: Duration,
    ) -> Result<Self, EngineError> {
        let group = group.into();
        let deadline = Instant::now() + window;
        let mut backoff = ExponentialBackoff::with_config(BackoffConfig::unlimited());

        loop {
            match Self::connect(addr, group.clone()) {
                Ok(feed) => return Ok(feed),
                Err(e) => {
                    let Some(delay) = backoff.next_delay() else {
                        return Err(e);
                    };
                    if Instant::now() + delay >= deadline {
                        warn!(addr, error = %e, "broker unreachable, retry window exhausted");
                        return Err(EngineError::Processing(format!(
                            "broker unreachable after retry window: {e}"
                        )));
                    }
                    warn!(addr, error = %e, ?delay, "broker connect failed, retrying");
                    std::thread::sleep(delay);
                }
            }
        }
    }

    /// Read whatever the socket has within `timeout` and queue complete
    /// frames as per-topic batches.
    fn fill(&mut self, timeout: Duration) -> Result<(), EngineError> {
        self.stream
            .set_read_timeout(Some(timeout))
            .map_err(|e| EngineError::Processing(format!("read timeout: {e}")))?;

        let mut chunk = [0u8; 64 * 1024];
        match self.stream.read(&mut chunk) {
            Ok(0) => {
                return Err(EngineError::Processing("broker closed the stream".into()));
            }
            Ok(n) => self.decoder.push(&chunk[..n]),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                return Ok(());
            }
            Err(e) => {
                return Err(EngineError::Processing(format!("broker read: {e}")));
            }
        }

        // Group the decoded frames by topic, preserving arrival order
        let mut per_topic: Vec<(Topic, Vec<Record>)> = Vec::new();
        while let Some(body) = self.decoder.next_frame()? {
            let envelope: Envelope = match serde_json::from_slice(&body) {
                Ok(env) => env,
                Err(e) => {
                    warn!(error = %e, "unroutable frame dropped, envelope undecodable");
                    continue;
                }
            };
            let Some(topic) = Topic::from_name(&envelope.topic) else {
                warn!(topic = %envelope.topic, "frame for unknown topic dropped");
                continue;
            };
            let record = Record {
                key: envelope.key.clone(),
                payload: envelope.payload_bytes(),
            };
            match per_topic.iter_mut().find(|(t, _)| *t == topic) {
                Some((_, records)) => records.push(record),
                None => per_topic.push((topic, vec![record])),
            }
        }

        for (topic, records) in per_topic {
            let offset = self.next_offset;
            self.next_offset += 1;
            self.queued.push_back(RecordBatch {
                topic,
                offset,
                records,
            });
        }
        Ok(())
    }
}

impl BrokerConsumer for TcpRecordFeed {
    fn poll(&mut self, timeout: Duration) -> Result<Option<RecordBatch>, EngineError> {
        if self.queued.is_empty() {
            self.fill(timeout)?;
        }
        Ok(self.queued.pop_front())
    }

    fn ack(&mut self, topic: Topic, offset: u64) -> Result<(), EngineError> {
        // The stream transport has no server-side ack; the offset is local
        tracing::trace!(topic = topic.as_str(), offset, "batch acked");
        Ok(())
    }

    fn lag(&self) -> Option<u64> {
        Some(self.queued.len() as u64)
    }

    fn group(&self) -> &str {
        &self.group
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intake::codec::encode_frame;
    use serde_json::json;
    use std::io::Write;
    use std::net::TcpListener;

    fn frame(topic: &str, payload: serde_json::Value) -> Vec<u8> {
        encode_frame(&Envelope {
            topic: topic.to_string(),
            key: None,
            payload,
        })
        .unwrap()
    }

    #[test]
    fn reads_and_groups_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = std::thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            socket
                .write_all(&frame("prices.ticks", json!({"productId": 1})))
                .unwrap();
            socket
                .write_all(&frame("prices.ticks", json!({"productId": 2})))
                .unwrap();
            socket
                .write_all(&frame("fx.rates", json!({"pair": "EURUSD"})))
                .unwrap();
            socket.flush().unwrap();
            // Keep the socket open long enough for the client to read
            std::thread::sleep(Duration::from_millis(200));
        });

        let mut feed = TcpRecordFeed::connect(&addr.to_string(), "test").unwrap();

        let mut batches = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(2);
        while batches.len() < 2 && Instant::now() < deadline {
            if let Some(batch) = feed.poll(Duration::from_millis(50)).unwrap() {
                batches.push(batch);
            }
        }
        server.join().unwrap();

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].topic, Topic::PriceTicks);
        assert_eq!(batches[0].records.len(), 2);
        assert_eq!(batches[1].topic, Topic::FxRates);
        assert_eq!(batches[1].records.len(), 1);
    }

    #[test]
    fn connect_with_retry_gives_up() {
        // Nothing listens on this port
        let result = TcpRecordFeed::connect_with_retry(
            "127.0.0.1:1",
            "test",
            Duration::from_millis(200),
        );
        assert!(result.is_err());
    }

    #[test]
    fn closed_stream_is_processing_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = std::thread::spawn(move || {
            let (socket, _) = listener.accept().unwrap();
            drop(socket);
        });

        let mut feed = TcpRecordFeed::connect(&addr.to_string(), "test").unwrap();
        server.join().unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut saw_error = false;
        while Instant::now() < deadline {
            match feed.poll(Duration::from_millis(50)) {
                Err(EngineError::Processing(_)) => {
                    saw_error = true;
                    break;
                }
                Err(_) => break,
                Ok(_) => {}
            }
        }
        assert!(saw_error);
    }
}
