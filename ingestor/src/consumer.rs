//! JSON-lines queue consumer.
//!
//! Every input line is an envelope `{"kind": "header" | "payload", "body": ...}`. A string body
//! is delivered as its raw UTF-8 bytes, any other JSON value is delivered serialized.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use config::shared::InputConfig;
use dispatch::transport::{AckDecision, Delivery, QueueConsumer};
use dispatch::types::MessageKind;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Redeliveries attempted for a requeued delivery before it is dropped.
const MAX_REDELIVERIES: u32 = 5;

/// Base delay before a requeued delivery is offered again, multiplied by the attempt.
const REDELIVERY_BACKOFF: Duration = Duration::from_millis(50);

type LineReader = Lines<BufReader<Box<dyn AsyncRead + Send + Unpin>>>;

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("failed to open input file {path}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read input line {line}")]
    Read {
        line: u64,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Deserialize)]
struct Envelope {
    kind: MessageKind,
    body: Value,
}

impl Envelope {
    fn into_body(self) -> Result<Bytes, serde_json::Error> {
        match self.body {
            Value::String(body) => Ok(Bytes::from(body)),
            body => serde_json::to_vec(&body).map(Bytes::from),
        }
    }
}

#[derive(Debug)]
struct Redelivery {
    delivery: Delivery,
    not_before: Instant,
}

/// Reads envelopes from a file or standard input and redelivers requeued ones locally.
pub struct JsonLinesConsumer {
    lines: LineReader,
    line_number: u64,
    redeliveries: VecDeque<Redelivery>,
    attempts: HashMap<u64, u32>,
    skipped: u64,
}

impl JsonLinesConsumer {
    /// Opens the configured input, standard input when no path is set.
    pub async fn open(input: &InputConfig) -> Result<Self, ConsumerError> {
        match &input.path {
            Some(path) => Self::open_file(path).await,
            None => {
                info!("reading envelopes from standard input");
                Ok(Self::from_reader(tokio::io::stdin()))
            }
        }
    }

    async fn open_file(path: &Path) -> Result<Self, ConsumerError> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|source| ConsumerError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        info!(path = %path.display(), "reading envelopes from file");

        Ok(Self::from_reader(file))
    }

    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(reader);

        Self {
            lines: BufReader::new(reader).lines(),
            line_number: 0,
            redeliveries: VecDeque::new(),
            attempts: HashMap::new(),
            skipped: 0,
        }
    }

    /// Lines skipped because they did not hold a valid envelope.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    async fn next_line_delivery(&mut self) -> Result<Option<Delivery>, ConsumerError> {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|source| ConsumerError::Read {
                    line: self.line_number + 1,
                    source,
                })?;
            let Some(line) = line else {
                return Ok(None);
            };

            self.line_number += 1;
            if line.trim().is_empty() {
                continue;
            }

            match parse_envelope(&line) {
                Ok((kind, body)) => {
                    return Ok(Some(Delivery {
                        tag: self.line_number,
                        kind,
                        body,
                    }));
                }
                Err(err) => {
                    warn!(line = self.line_number, error = %err, "skipping malformed envelope");
                    self.skipped += 1;
                }
            }
        }
    }

    fn requeue(&mut self, delivery: Delivery) {
        let attempt = self.attempts.entry(delivery.tag).or_insert(0);
        *attempt += 1;

        if *attempt > MAX_REDELIVERIES {
            warn!(
                tag = delivery.tag,
                kind = %delivery.kind,
                attempts = MAX_REDELIVERIES,
                "dropping delivery after exhausting redeliveries"
            );
            self.attempts.remove(&delivery.tag);
            return;
        }

        debug!(tag = delivery.tag, attempt = *attempt, "requeueing delivery");
        let not_before = Instant::now() + REDELIVERY_BACKOFF * *attempt;
        self.redeliveries.push_back(Redelivery {
            delivery,
            not_before,
        });
    }
}

impl QueueConsumer for JsonLinesConsumer {
    type Error = ConsumerError;

    async fn next_delivery(&mut self) -> Result<Option<Delivery>, Self::Error> {
        // Requeued deliveries go first so an exhausted input still drains them.
        if let Some(not_before) = self.redeliveries.front().map(|retry| retry.not_before) {
            tokio::time::sleep_until(not_before).await;
            if let Some(retry) = self.redeliveries.pop_front() {
                return Ok(Some(retry.delivery));
            }
        }

        self.next_line_delivery().await
    }

    async fn settle(&mut self, delivery: Delivery, decision: AckDecision) -> Result<(), Self::Error> {
        match decision {
            AckDecision::Ack => {
                self.attempts.remove(&delivery.tag);
            }
            AckDecision::Nack { requeue: true } => self.requeue(delivery),
            AckDecision::Nack { requeue: false } => {
                self.attempts.remove(&delivery.tag);
                warn!(tag = delivery.tag, kind = %delivery.kind, "discarding rejected delivery");
            }
        }

        Ok(())
    }
}

fn parse_envelope(line: &str) -> Result<(MessageKind, Bytes), serde_json::Error> {
    let envelope: Envelope = serde_json::from_str(line)?;
    let kind = envelope.kind;

    Ok((kind, envelope.into_body()?))
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};

    use super::*;

    fn consumer(input: &str) -> JsonLinesConsumer {
        JsonLinesConsumer::from_reader(Cursor::new(input.as_bytes().to_vec()))
    }

    #[tokio::test]
    async fn string_and_object_bodies_are_delivered() {
        let mut consumer = consumer(concat!(
            "{\"kind\":\"payload\",\"body\":\"meta\\nraw\"}\n",
            "\n",
            "{\"kind\":\"header\",\"body\":{\"transaction_id\":\"tx-1\"}}\n",
        ));

        let first = consumer.next_delivery().await.unwrap().unwrap();
        assert_eq!(first.kind, MessageKind::Payload);
        assert_eq!(first.body.as_ref(), b"meta\nraw");
        assert_eq!(first.tag, 1);

        let second = consumer.next_delivery().await.unwrap().unwrap();
        assert_eq!(second.kind, MessageKind::Header);
        assert_eq!(second.body.as_ref(), br#"{"transaction_id":"tx-1"}"#);
        assert_eq!(second.tag, 3);

        assert!(consumer.next_delivery().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        let mut consumer = consumer(concat!(
            "not json\n",
            "{\"kind\":\"trailer\",\"body\":\"x\"}\n",
            "{\"kind\":\"header\",\"body\":\"ok\"}\n",
        ));

        let delivery = consumer.next_delivery().await.unwrap().unwrap();
        assert_eq!(delivery.body.as_ref(), b"ok");
        assert_eq!(consumer.skipped(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn requeued_deliveries_are_redelivered_until_exhausted() {
        let mut consumer = consumer("{\"kind\":\"header\",\"body\":\"retry me\"}\n");

        let mut deliveries = 0;
        while let Some(delivery) = consumer.next_delivery().await.unwrap() {
            deliveries += 1;
            consumer
                .settle(delivery, AckDecision::Nack { requeue: true })
                .await
                .unwrap();
        }

        assert_eq!(deliveries, 1 + MAX_REDELIVERIES);
    }

    #[tokio::test]
    async fn acked_and_dropped_deliveries_are_not_redelivered() {
        let mut consumer = consumer(concat!(
            "{\"kind\":\"header\",\"body\":\"a\"}\n",
            "{\"kind\":\"payload\",\"body\":\"b\"}\n",
        ));

        let first = consumer.next_delivery().await.unwrap().unwrap();
        consumer.settle(first, AckDecision::Ack).await.unwrap();
        let second = consumer.next_delivery().await.unwrap().unwrap();
        consumer
            .settle(second, AckDecision::Nack { requeue: false })
            .await
            .unwrap();

        assert!(consumer.next_delivery().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn opens_the_configured_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{{\"kind\":\"header\",\"body\":\"from file\"}}").unwrap();

        let mut consumer = JsonLinesConsumer::open(&InputConfig {
            path: Some(file.path().to_path_buf()),
        })
        .await
        .unwrap();

        let delivery = consumer.next_delivery().await.unwrap().unwrap();
        assert_eq!(delivery.body.as_ref(), b"from file");
    }

    #[tokio::test]
    async fn missing_input_file_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.jsonl");

        let err = JsonLinesConsumer::open(&InputConfig { path: Some(path) })
            .await
            .err()
            .unwrap();

        assert!(matches!(err, ConsumerError::Open { .. }));
    }
}
