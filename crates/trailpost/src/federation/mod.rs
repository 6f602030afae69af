//! ActivityPub federation: wire documents, actor resolution, the inbound
//! activity processor and the outbound delivery dispatcher.

pub mod actors;
pub mod inbox;
pub mod objects;
pub mod outbox;
