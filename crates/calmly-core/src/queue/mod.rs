//! Outbox and dead-letter queues built on the local store

mod dead_letter;
mod outbox;

pub use dead_letter::DeadLetterQueue;
pub use outbox::Outbox;

pub(crate) use outbox::enqueue;
