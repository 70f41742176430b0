//! `mazebot-middleware` – the channel protocol plumbing.
//!
//! Moves typed packets between the robot core and the host link without
//! caring what they mean.
//!
//! # Modules
//!
//! - [`codec`] – packed little-endian layout of every channel record.
//! - [`link`] – escaped, checksummed serial envelope around frames.
//! - [`router`] – per-channel handler registry with traffic counters.
//! - [`transport`] – outbound byte sinks the router writes to.
//! - [`bus`] – topic-based publish/subscribe event bus built on Tokio
//!   broadcast channels.

pub mod bus;
pub mod codec;
pub mod link;
pub mod router;
pub mod transport;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use link::{LinkDecoder, LinkError, encode_link_frame};
pub use router::{ChannelRouter, Handler, RouterCounters};
pub use transport::{ChannelTransport, InMemoryTransport, Transport};
