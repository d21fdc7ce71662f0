// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HDDS TCPROS Transport
//!
//! ROS1 topic and service traffic over plain TCP: the length-prefixed
//! `key=value` connection header, length-prefixed message frames and the
//! one-shot service exchange with its status byte.
//!
//! # Features
//!
//! - **Publications**: fan-out broadcast with per-subscriber failure
//!   isolation, optional latching
//! - **Subscriptions**: one ingestion task per publisher link feeding a
//!   drop-oldest buffer
//! - **Services**: one request per connection, callbacks run off the reactor
//! - **Probes**: reachability checks that exchange no payload
//!
//! # Quick Start
//!
//! ```no_run
//! use hdds_tcpros::msgs::StringMsg;
//! use hdds_tcpros::{Node, NodeConfig};
//!
//! # async fn run() -> hdds_tcpros::Result<()> {
//! let talker = Node::new(NodeConfig::named("/talker"))?;
//! let addr = talker.start().await?;
//! let chatter = talker.advertise::<StringMsg>("/chatter", true)?;
//!
//! let listener = Node::new(NodeConfig::named("/listener"))?;
//! let sub = listener.subscribe::<StringMsg>("/chatter", Some(10))?;
//! sub.connect("127.0.0.1", addr.port()).await?;
//!
//! chatter.publish(&StringMsg::new("hello")).await;
//! if let Some(msg) = sub.recv().await {
//!     println!("{}", msg.data);
//! }
//! # Ok(())
//! # }
//! ```

pub mod acceptor;
pub mod buffer;
pub mod client;
pub mod config;
pub mod error;
pub mod frame;
pub mod header;
pub mod message;
pub mod msgs;
pub mod node;
pub mod publication;
pub mod registry;
pub mod service;
pub mod subscription;

pub use acceptor::{Acceptor, ConnectionStream};
pub use buffer::MessageBuffer;
pub use client::ClientOptions;
pub use config::{ConfigError, NodeConfig};
pub use error::{Result, TcprosError};
pub use header::ConnectionHeader;
pub use message::{CodecError, RosMessage, RosService, WireReader, WireWriter};
pub use node::{Node, NodeState, NodeStatus};
pub use publication::{BrokenSocketRegistry, ConnectionId, Publication, Publisher, TopicType};
pub use registry::Registry;
pub use service::ServiceEntry;
pub use subscription::Subscription;
