//! Catch-up for reconnecting clients.
//!
//! A reconnecting connection is attached in the `Replaying` phase before the
//! log is queried, so every broadcast issued from that point on is captured in
//! its buffer. The backlog is written first, then the buffer is flushed minus
//! anything the backlog already covered, and the connection goes live in the
//! same critical section that observes the buffer empty.

use ahash::AHashMap;
use bytes::Bytes;
use tokio::sync::mpsc::Sender;
use tracing::debug;

use super::connection::{Connection, Pending};
use super::frame::Frame;
use crate::database::EventLog;
use crate::errors::{SinkError, StoreError};
use crate::models::{Event, EventId};

/// What a replay wrote.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplayOutcome {
    /// Events read from the log.
    pub replayed: usize,
    /// Buffered broadcasts written after the backlog.
    pub flushed: usize,
    /// Buffered broadcasts dropped because the backlog already carried them.
    pub skipped: usize,
}

/// Events on `channels` after `last_seen_id`, ascending across all channels.
pub async fn backlog(
    events: &dyn EventLog,
    channels: &[String],
    last_seen_id: EventId,
) -> Result<Vec<Event>, StoreError> {
    let backlog = events.events_after(channels, last_seen_id).await?;
    debug!(
        last_seen_id,
        channels = ?channels,
        backlog = backlog.len(),
        "Loaded replay backlog"
    );
    Ok(backlog)
}

/// Stream the backlog to a replaying connection and switch it to live.
pub(crate) async fn run(
    connection: &Connection,
    backlog: Vec<Event>,
) -> Result<ReplayOutcome, SinkError> {
    let sink = connection.replay_sender().ok_or(SinkError::Closed)?;
    let mut outcome = ReplayOutcome::default();

    // Highest replayed id per channel. Publishing is serialized per channel,
    // so a buffered frame at or below it was already in the backlog.
    let mut cursors: AHashMap<String, EventId> = AHashMap::new();

    for event in &backlog {
        write(&sink, connection, &Frame::event(event)).await?;
        cursors.insert(event.channel.clone(), event.id);
        outcome.replayed += 1;
    }

    loop {
        match connection.drain_pending() {
            Pending::Batch(frames) => {
                for frame in frames {
                    if already_replayed(&cursors, &frame) {
                        outcome.skipped += 1;
                        continue;
                    }
                    write(&sink, connection, &frame).await?;
                    outcome.flushed += 1;
                }
            }
            Pending::Live => return Ok(outcome),
            Pending::Closed => return Err(SinkError::Closed),
        }
    }
}

fn already_replayed(cursors: &AHashMap<String, EventId>, frame: &Frame) -> bool {
    match (frame.channel(), frame.event_id()) {
        (Some(channel), Some(id)) => cursors.get(channel).is_some_and(|cursor| id <= *cursor),
        _ => false,
    }
}

async fn write(
    sink: &Sender<Bytes>,
    connection: &Connection,
    frame: &Frame,
) -> Result<(), SinkError> {
    sink.send(frame.bytes()).await.map_err(|_| SinkError::Closed)?;
    connection.record_sent();
    Ok(())
}
