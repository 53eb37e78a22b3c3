//! # warren
//!
//! A supervised AMQP consumption worker built on top of [lapin](https://github.com/amqp-rs/lapin).
//!
//! Given a stream of connection handles and a handler, `warren` keeps exactly
//! one active subscription to a queue, dispatches each delivery to the
//! handler, and transparently re-establishes the subscription whenever the
//! channel, the connection, or the consumption itself is lost. A small
//! observer surface (ready / unready / closed notifications) lets higher
//! layers compose several consumers into a pool.

// warren is 100% Safe Rust.
#![forbid(unsafe_code)]
#![warn(
    // Warns on ::path, allows crate::path.
    absolute_paths_not_starting_with_crate,

    // Warns you about missing documentation comments.
    missing_docs,
    clippy::missing_docs_in_private_items,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,

    // Warns you when you have dependencies you're not using.
    unused_crate_dependencies,

    // Warns on converting values using the `as` keyword.
    clippy::as_conversions,
)]

// Re-exporting underlying lapin version so you don't have to add the same version as a dependency.
pub use lapin;

pub mod broadcaster;
pub mod channel;
pub mod connection;
pub mod consumer;
pub mod error;
pub mod handler;
pub mod retry;
pub mod state;
pub mod supervisor;
mod worker;

// pub-using every name::Name to avoid having to have warren::name::Name repetition.
// This way you can just do warren::Name.
pub use broadcaster::{Broadcaster, ReadyReceiver, UnreadyReceiver};
pub use channel::{AmqpChannel, ConsumeArgs, ConsumeEvent, DeliveryConsumer, LapinChannel, LapinConsumer};
pub use connection::{default_init, AmqpConnection, ConnectionHandle, InitFn, LapinConnection};
pub use consumer::{ClosedReceiver, Consumer, ConsumerBuilder};
pub use error::{ConsumerError, Error};
pub use handler::Handler;
pub use retry::RetryCounter;
pub use state::State;

/// Convenience type for a result with this crate's construction-time error.
pub type Result<T> = std::result::Result<T, Error>;
