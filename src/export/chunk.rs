//! Chunk encoding
//!
//! A chunk is the serialized form of exactly one document. The reader never
//! splits a chunk, so the encoding only has to be self-delimiting per
//! document: raw BSON carries its own length prefix, JSON Lines ends in `\n`.

use mongodb::bson::{Bson, Document};
use serde::{Deserialize, Serialize};

use crate::error::{ReadError, Result};

/// Encoding applied to each document
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChunkFormat {
    /// Raw BSON, concatenated (same layout as `mongodump` output)
    #[default]
    #[serde(rename = "bson")]
    Bson,

    /// Relaxed extended JSON, one document per line
    #[serde(rename = "jsonl")]
    JsonLines,
}

impl ChunkFormat {
    /// Serialize one document into a chunk
    pub fn encode(&self, doc: &Document) -> Result<Vec<u8>> {
        match self {
            ChunkFormat::Bson => {
                mongodb::bson::to_vec(doc).map_err(|e| ReadError::Encode(e.to_string()).into())
            }
            ChunkFormat::JsonLines => {
                let value = Bson::Document(doc.clone()).into_relaxed_extjson();
                let mut line = serde_json::to_vec(&value)
                    .map_err(|e| ReadError::Encode(e.to_string()))?;
                line.push(b'\n');
                Ok(line)
            }
        }
    }

    /// File extension of a segment holding chunks of this format
    pub fn extension(&self) -> &'static str {
        match self {
            ChunkFormat::Bson => "bson",
            ChunkFormat::JsonLines => "jsonl",
        }
    }
}

impl std::str::FromStr for ChunkFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bson" => Ok(ChunkFormat::Bson),
            "jsonl" | "json" => Ok(ChunkFormat::JsonLines),
            other => Err(format!("unknown format '{other}' (expected bson or jsonl)")),
        }
    }
}
