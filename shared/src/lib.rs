//! Types and pure logic shared by the quiz duel store server and clients.
//!
//! Nothing in this crate performs I/O: the room document model, the question
//! catalog, document field operations, the wire protocol and the view
//! projection are all plain data and functions.

pub mod catalog;
pub mod config;
pub mod document;
pub mod protocol;
pub mod room;
pub mod view;
