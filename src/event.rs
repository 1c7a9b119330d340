//! Events and their framing inside a container.
//!
//! An event is framed as
//! `varint(sequence) varint(timestamp) varint(payload_len) payload`,
//! so a decompressed container can be split back into its events without any
//! side table.

use crate::error::{BuslogError, Result};
use crate::varint;
use serde::de::DeserializeOwned;

/// One serialized, timestamped record submitted for durable storage.
///
/// Events are immutable once built. The sequence number is assigned by the
/// [`LogFile`](crate::LogFile) at submission time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    sequence_number: u64,
    timestamp: u64,
    payload: Vec<u8>,
}

impl Event {
    /// Creates an event.
    pub fn new(sequence_number: u64, timestamp: u64, payload: Vec<u8>) -> Self {
        Self {
            sequence_number,
            timestamp,
            payload,
        }
    }

    /// Position of this event in the file's global submission order.
    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    /// Producer supplied timestamp.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Opaque serialized payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Size of the framed event in bytes.
    pub fn encoded_len(&self) -> usize {
        varint::encoded_len(self.sequence_number)
            + varint::encoded_len(self.timestamp)
            + varint::encoded_len(self.payload.len() as u64)
            + self.payload.len()
    }

    /// Appends the framed event to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        varint::encode_u64(out, self.sequence_number);
        varint::encode_u64(out, self.timestamp);
        varint::encode_u64(out, self.payload.len() as u64);
        out.extend_from_slice(&self.payload);
    }

    /// Decodes the payload of an event written with
    /// [`LogFile::write_serialized`](crate::LogFile::write_serialized).
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T> {
        bincode::serde::decode_from_slice(&self.payload, bincode::config::standard())
            .map(|(obj, _)| obj)
            .map_err(|e| BuslogError::Serialization(e.to_string()))
    }
}

/// Splits a decompressed container payload back into its events.
///
/// # Errors
/// Returns `BuslogError::Format` when a frame is truncated.
pub fn decode_events(mut buf: &[u8]) -> Result<Vec<Event>> {
    let mut events = Vec::new();

    while !buf.is_empty() {
        let (sequence_number, n) = varint::decode_u64(buf)?;
        buf = &buf[n..];
        let (timestamp, n) = varint::decode_u64(buf)?;
        buf = &buf[n..];
        let (len, n) = varint::decode_u64(buf)?;
        buf = &buf[n..];

        let len = usize::try_from(len)
            .map_err(|_| BuslogError::Format("event length exceeds usize".into()))?;
        let payload = buf.get(..len).ok_or_else(|| {
            BuslogError::Format(format!(
                "event {sequence_number} claims {len} payload bytes, {} left in container",
                buf.len()
            ))
        })?;
        events.push(Event::new(sequence_number, timestamp, payload.to_vec()));
        buf = &buf[len..];
    }

    Ok(events)
}
