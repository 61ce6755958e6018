//! External delivery channels for callback events.

pub mod webhook;
