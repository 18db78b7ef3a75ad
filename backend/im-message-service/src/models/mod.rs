pub mod conversation;
pub mod message;

pub use conversation::{Conversation, ConversationPage, ConversationView};
pub use message::{Message, MessageStatus, MessageType, NewMessage};

/// Order-independent id shared by both sides of a pair: `"{min}_{max}"`.
pub fn pair_conversation_id(a: i64, b: i64) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{lo}_{hi}")
}

/// Order-dependent storage key of the row owned by `owner`: `"{owner}:{counterpart}"`.
pub fn owner_key(owner: i64, counterpart: i64) -> String {
    format!("{owner}:{counterpart}")
}

/// Parse a pair id back into its two participants, lowest first.
pub fn parse_pair_id(conversation_id: &str) -> Option<(i64, i64)> {
    let (lo, hi) = conversation_id.split_once('_')?;
    let lo: i64 = lo.parse().ok()?;
    let hi: i64 = hi.parse().ok()?;
    if lo <= 0 || hi <= 0 || lo > hi {
        return None;
    }
    Some((lo, hi))
}

/// The counterpart of `user_id` in a pair id, if `user_id` participates.
pub fn pair_counterpart(conversation_id: &str, user_id: i64) -> Option<i64> {
    let (lo, hi) = parse_pair_id(conversation_id)?;
    if user_id == lo {
        Some(hi)
    } else if user_id == hi {
        Some(lo)
    } else {
        None
    }
}
