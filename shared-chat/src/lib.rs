//! Terminal chat over a shared key-value/pub-sub store.
//!
//! Each process is one user session. It claims `online.<username>` with an
//! expiring lease, joins the `users` set, relays typed lines on the
//! `messages` channel, and renews its lease until the user leaves.
//!
//! - [`session`] runs startup, the coordination loop, and teardown.
//! - [`presence`] acquires, renews, and releases the username lease.
//! - [`registry`] maintains the advisory set of online users for `/who`.
//! - [`channel`] publishes chat lines and forwards subscriptions to the loop.
//! - [`input`] turns an input stream into user-line events.
//! - [`store`] defines the backend capabilities, with in-memory and TCP
//!   implementations.
//! - [`server`] and [`message`] implement the `chat-store` server and its
//!   JSON line protocol.
//! - [`cli`] and [`logging`] hold the binaries' argument parsing and tracing setup.

pub mod channel;
pub mod cli;
pub mod input;
pub mod logging;
pub mod message;
pub mod presence;
pub mod registry;
pub mod server;
pub mod session;
pub mod store;
