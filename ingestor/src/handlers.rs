//! Handlers for header and payload messages.
//!
//! Decode failures are permanent: the same bytes will never decode. Store failures are
//! transient.

use bytes::Bytes;
use dispatch::error::{ErrorKind, ProcessingError, ProcessingResult};
use dispatch::handler::Handler;
use dispatch::types::{Message, MessageKind};
use dispatch::{bail, processing_error};
use tracing::info;

use crate::model::{PayloadMetadata, TransactionHeader};
use crate::stores::{BlobStore, MetadataStore, StoreError};

/// Writes the transaction metadata carried by header messages.
#[derive(Debug, Clone)]
pub struct HeaderHandler<M> {
    metadata: M,
}

impl<M> HeaderHandler<M> {
    pub fn new(metadata: M) -> Self {
        Self { metadata }
    }
}

impl<M> Handler for HeaderHandler<M>
where
    M: MetadataStore,
{
    async fn handle(&self, message: Message) -> ProcessingResult<()> {
        let header = decode_header(message.payload())?;

        self.metadata
            .write_transaction_metadata(&header)
            .await
            .map_err(|err| store_error(err, MessageKind::Header))?;

        info!(transaction_id = %header.transaction_id, "initialized transaction");

        Ok(())
    }
}

/// Uploads payload data and records where it was stored.
#[derive(Debug, Clone)]
pub struct PayloadHandler<B, M> {
    blobs: B,
    metadata: M,
}

impl<B, M> PayloadHandler<B, M> {
    pub fn new(blobs: B, metadata: M) -> Self {
        Self { blobs, metadata }
    }
}

impl<B, M> Handler for PayloadHandler<B, M>
where
    B: BlobStore,
    M: MetadataStore,
{
    async fn handle(&self, message: Message) -> ProcessingResult<()> {
        let (metadata, data) = decode_payload(message.into_payload())?;
        let key = metadata.blob_key();

        let uri = self
            .blobs
            .upload_blob(&key, data)
            .await
            .map_err(|err| store_error(err, MessageKind::Payload))?;

        self.metadata
            .write_blob_mapping(&key, &uri)
            .await
            .map_err(|err| store_error(err, MessageKind::Payload))?;

        info!(transaction_id = %metadata.transaction_id, %key, uri, "uploaded and mapped blob");

        Ok(())
    }
}

fn decode_header(body: &Bytes) -> ProcessingResult<TransactionHeader> {
    let header: TransactionHeader = serde_json::from_slice(body).map_err(|err| {
        processing_error!(
            ErrorKind::DeserializationError,
            "Header message is not valid transaction metadata",
            err.to_string(),
            source: err
        )
        .with_message_kind(MessageKind::Header)
    })?;

    if header.series_types.len() != header.series_counts.len() {
        return Err(processing_error!(
            ErrorKind::InvalidMessage,
            "Header series types and counts differ in length",
            format!(
                "transaction {} lists {} series types and {} counts",
                header.transaction_id,
                header.series_types.len(),
                header.series_counts.len()
            )
        )
        .with_message_kind(MessageKind::Header));
    }

    Ok(header)
}

/// Splits a payload body into its metadata line and the raw data that follows it.
fn decode_payload(body: Bytes) -> ProcessingResult<(PayloadMetadata, Bytes)> {
    let Some(newline) = body.iter().position(|byte| *byte == b'\n') else {
        bail!(
            ErrorKind::InvalidMessage,
            "Payload message has no metadata line",
            format!("{} bytes without a newline", body.len())
        );
    };

    let metadata: PayloadMetadata =
        serde_json::from_slice(&body[..newline]).map_err(|err| {
            processing_error!(
                ErrorKind::DeserializationError,
                "Payload metadata line is not valid JSON",
                err.to_string(),
                source: err
            )
            .with_message_kind(MessageKind::Payload)
        })?;

    Ok((metadata, body.slice(newline + 1..)))
}

fn store_error(err: StoreError, message_kind: MessageKind) -> ProcessingError {
    let error = match &err {
        StoreError::Unavailable { .. } => {
            processing_error!(ErrorKind::StoreUnavailable, "Store is unavailable", err.to_string())
        }
        StoreError::WriteRefused { .. } => {
            processing_error!(ErrorKind::StoreWriteFailed, "Store write failed", err.to_string())
        }
    };

    error.with_message_kind(message_kind).with_source(err)
}
