//! Quiz duel client: the room state machine on top of a document store, a
//! terminal front-end and a bot player.

pub mod bot;
pub mod command;
pub mod input;
pub mod render;
pub mod session;
pub mod store;
