//! Turn append/broadcast helpers shared by the processor, dispatcher, and
//! ingestion API. Every appended turn and read-receipt advance is mirrored
//! to the broadcast hub.

use brain_blackboard::Blackboard;
use brain_domain::event::Turn;
use brain_domain::Result;

use crate::broadcast::{BroadcastSink, PushMessage, ReadState, TurnSet};
use crate::state::BrainState;

/// Append a turn and push it to the UI. Returns the assigned turn number.
pub async fn append_and_push(state: &BrainState, event_id: &str, mut turn: Turn) -> Result<u32> {
    let n = state.blackboard.append_turn(event_id, turn.clone()).await?;
    turn.turn = n;
    state.broadcast.push(PushMessage::TurnAppended {
        event_id: event_id.to_owned(),
        turn,
    });
    Ok(n)
}

/// Push a read-receipt advance to the UI.
pub fn push_status(state: &BrainState, event_id: &str, status: ReadState, turns: TurnSet) {
    state.broadcast.push(PushMessage::MessageStatus {
        event_id: event_id.to_owned(),
        status,
        turns,
    });
}
