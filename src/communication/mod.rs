pub mod event_queue;

pub use event_queue::{event_queue, EventReceiver, EventSender, QueueError};
