//! # sd-file-server
//!
//! Serves files from a block device over HTTP without ever blocking the
//! thread that drives the transfers.
//!
//! Every download is a [`DownloadSession`]: an open file, a handle to the
//! response, and a fixed-size [`CyclicBuffer`] between the two. A
//! [`SessionScheduler`] owns all sessions and is ticked periodically by the
//! caller. Each [`tick`](SessionScheduler::tick) polls readiness without
//! waiting, reads one bounded chunk per readable session and hands one bounded
//! send per writable session to the [`Transport`], which runs it on its own
//! runtime and reports back through the next tick. A session never has more
//! than one send in flight.
//!
//! `Range` headers are folded into a single covering interval by
//! [`parse_range_header`]; multipart responses are not produced.
//!
//! Storage and transport are injected, so the engine runs against real files
//! and tokio channels ([`StdStorage`], [`ChannelTransport`]) as well as against
//! in-memory doubles in tests.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use sd_file_server::{ChannelTransport, Config, FileServer, StdStorage};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config { enable_download: true, ..Config::default() };
//!     let storage = StdStorage::new(&config.mount);
//!     let server = Arc::new(FileServer::new(&config, storage, ChannelTransport::current()));
//!
//!     let (_stop, stopped) = tokio::sync::watch::channel(false);
//!     tokio::spawn(Arc::clone(&server).drive(stopped));
//!
//!     let listener = tokio::net::TcpListener::bind(config.listen).await?;
//!     axum::serve(listener, server.router()).await?;
//!     Ok(())
//! }
//! ```

mod buffer;
mod config;
mod error;
mod file;
pub mod path;
mod provider;
mod range;
mod scheduler;
mod server;
mod session;
mod stream;
mod units;

pub use buffer::CyclicBuffer;
pub use config::Config;
pub use error::Error;
pub use file::{KnownSize, StdStorage};
pub use provider::{
    Descriptor, PollEntry, SendCompletion, SendJob, SessionId, Storage, StorageFile, Transport,
};
pub use range::{parse_range_header, ByteRange, RangeError};
pub use scheduler::{Download, SessionScheduler, StreamLimits, TickReport};
pub use server::{dump_config, response_head, FileServer, Scheduler};
pub use session::{DownloadSession, SessionState};
pub use stream::{body_channel, BodySender, ChannelTransport, SessionBody, SOCKET_QUEUE_DEPTH};
pub use units::format_size;
