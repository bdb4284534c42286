use std::fmt;

use serde::{Deserialize, Serialize};

/// Metadata announced by a header message before the payloads of a transaction arrive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionHeader {
    pub transaction_id: String,
    /// Series produced by the transaction.
    pub series_types: Vec<String>,
    /// Number of payloads expected per series, aligned with `series_types`.
    pub series_counts: Vec<u64>,
}

/// Metadata line leading every payload message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadMetadata {
    pub transaction_id: String,
    pub series_type: String,
    pub ordinal: u64,
}

impl PayloadMetadata {
    pub fn blob_key(&self) -> BlobKey {
        BlobKey {
            transaction_id: self.transaction_id.clone(),
            series_type: self.series_type.clone(),
            ordinal: self.ordinal,
        }
    }
}

/// Identifies one uploaded payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobKey {
    pub transaction_id: String,
    pub series_type: String,
    pub ordinal: u64,
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.transaction_id, self.series_type, self.ordinal
        )
    }
}
