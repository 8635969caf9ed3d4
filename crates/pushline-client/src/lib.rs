//! pushline-client
//!
//! Client for a line-delimited server-push streaming protocol: a long-lived
//! HTTP connection carries control words and incremental data lines, while
//! subscriptions are managed out of band over a separate control channel.
//!
//! # Example
//!
//! ```rust,no_run
//! use pushline_client::{Mode, PushClient, Subscription};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = PushClient::new("http://push.example.com:8080/")?;
//!     client.connect("user", "token", "DEMO").await?;
//!
//!     let mut quotes = Subscription::new(
//!         Mode::Merge,
//!         vec!["item1".into(), "item2".into()],
//!         vec!["bid".into(), "ask".into()],
//!     );
//!     quotes.add_listener(|update| {
//!         println!("{} bid={:?}", update.name, update.value("bid"));
//!     });
//!     let key = client.subscribe(quotes).await?;
//!
//!     // ... consume updates through the listener ...
//!
//!     client.unsubscribe(key).await?;
//!     client.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! The session/stream lifecycle is driven by the server: keepalives keep the
//! connection open, a LOOP directive makes the client rebind the session on
//! a fresh connection without losing subscriptions, and every other terminal
//! message drops the session and all registered subscriptions.
//!
//! # Testing
//!
//! The [`testing`] module provides a scripted in-process push server:
//!
//! ```rust,ignore
//! use pushline_client::testing::TestServer;
//!
//! let server = TestServer::start().await?;
//! let client = PushClient::new(&server.base_url())?;
//! client.connect("user", "token", "DEMO").await?;
//! server.push_update(1, "1|42.1|42.3");
//! ```

mod client;
mod control;
mod error;
mod session;
mod stream;
mod subscription;
mod table;
pub mod testing;

pub use client::PushClient;
pub use error::{PushClientError, Result, ServerErrorKind};
pub use subscription::Subscription;

// Re-export core types for convenience
pub use pushline_core::{decode_field, ItemUpdate, Mode, ProtocolError, StreamMessage};
