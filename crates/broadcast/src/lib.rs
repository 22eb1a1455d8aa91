//! Alarm Broadcast
//!
//! Pushes confirmed alarm events to every connected subscriber (live
//! dashboards). Sends never block the publisher: a subscriber whose buffer is
//! full or whose receiver is gone is dropped from the set.

mod dispatcher;
mod event;

pub use dispatcher::{BroadcastDispatcher, BroadcastReport, SubscriberId, Subscription};
pub use event::{AlarmEvent, EventKind};
