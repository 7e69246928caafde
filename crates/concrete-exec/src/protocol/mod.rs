//! Worker process protocol.
//!
//! The client sends correlation-id tagged [`Command`]s over a pair of byte
//! streams and the worker answers each with a [`Reply`]. Frames are
//! length-prefixed bincode (see [`codec`]). Crash isolation comes from
//! running the worker as a separate process started by a
//! [`WorkerLauncher`]; [`ConcreteExecutor`] restarts it when it dies.

pub mod codec;
mod client;
mod executor;
mod launcher;
mod message;
mod pool;
mod server;

pub use client::{WorkerClient, WorkerReader, WorkerWriter};
pub use executor::ConcreteExecutor;
pub use launcher::{InProcessLauncher, ProcessLauncher, WorkerChannel, WorkerLauncher, WorkerProcess};
pub use message::{decode_payload, encode_payload, Command, Reply, Request, RequestId, Response};
pub use pool::ConcreteExecutorPool;
pub use server::{handle, serve, ServeExit};
