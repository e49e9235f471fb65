//! Incremental JSON array emission
//!
//! The GET response is a single JSON array assembled chunk by chunk while
//! the engine is still scanning, so the success status is committed before
//! the full result set is known. The writer here owns bracket and separator
//! placement and guarantees the closing bracket on every exit path. A
//! mid-scan failure is signaled in-band: the producer sends a `Failed`
//! event and the array ends with an `{"_error": ...}` marker object.

use bytes::Bytes;
use futures::stream::{self, Stream};
use serde_json::Value;
use std::convert::Infallible;
use tokio::sync::mpsc;

/// Events the scan producer feeds into the response writer.
#[derive(Debug)]
pub enum StreamEvent {
    /// One finished entity, ready to serialize.
    Entity(Value),
    /// The scan died mid-stream; carry the message into the error marker.
    Failed(String),
}

/// Bounded-channel capacity between the engine and the response writer.
pub const CHANNEL_CAPACITY: usize = 32;

enum Phase {
    /// Nothing written yet; the opening bracket is still owed.
    Start,
    /// Inside the array; items need a leading separator.
    Mid,
    /// Closing bracket written; the stream is finished.
    Closed,
}

fn error_marker(message: &str) -> String {
    serde_json::json!({ "_error": message }).to_string()
}

/// Turn the producer channel into the array-shaped byte stream.
///
/// The closing bracket is emitted exactly once whatever happens on the
/// producer side: normal completion, an in-band failure event, or the
/// sender being dropped (including by panic) all close the array.
pub fn json_array_body(
    rx: mpsc::Receiver<StreamEvent>,
) -> impl Stream<Item = Result<Bytes, Infallible>> {
    stream::unfold((rx, Phase::Start), |(mut rx, phase)| async move {
        let chunk = match phase {
            Phase::Closed => return None,
            Phase::Start => match rx.recv().await {
                Some(StreamEvent::Entity(entity)) => {
                    return Some((Ok(Bytes::from(format!("[{entity}"))), (rx, Phase::Mid)))
                }
                Some(StreamEvent::Failed(message)) => {
                    format!("[{}]", error_marker(&message))
                }
                None => "[]".to_string(),
            },
            Phase::Mid => match rx.recv().await {
                Some(StreamEvent::Entity(entity)) => {
                    return Some((Ok(Bytes::from(format!(",{entity}"))), (rx, Phase::Mid)))
                }
                Some(StreamEvent::Failed(message)) => {
                    format!(",{}]", error_marker(&message))
                }
                None => "]".to_string(),
            },
        };
        Some((Ok(Bytes::from(chunk)), (rx, Phase::Closed)))
    })
}
