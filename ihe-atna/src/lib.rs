//! # ihe-atna
//!
//! IHE ATNA audit transport with mutual-TLS node authentication.
//!
//! Builds DICOM-style audit records (RFC 3881 / DICOM PS3.15 `AuditMessage`
//! XML) and delivers them to an audit record repository over UDP, TCP or
//! TLS. Outbound sockets are opened under a node authentication policy:
//! each endpoint resolves to a security domain that supplies trust material,
//! an optional client identity and the allowed protocol versions.
//!
//! ## Features
//!
//! - **Audit records**: coded event, participant, source and object blocks
//!   with a fixed XML element order
//! - **Transports**: one datagram per record over UDP; RFC 5425
//!   octet-counted frames over TCP and TLS
//! - **Node authentication**: per-endpoint security domains, client alias
//!   selection, one-way and mutual TLS with rustls
//! - **Queues**: synchronous, pooled fire-and-forget, and a durable
//!   NATS JetStream queue behind the `events` feature
//! - **Configuration**: figment layering of defaults, TOML files and
//!   `ATNA_` environment variables
//!
//! ## Example
//!
//! ```rust,no_run
//! use ihe_atna::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load()?;
//!     init_tracing(&config)?;
//!
//!     let context = Context::from_config(config)?;
//!     let queue = build_queue(&context).await?;
//!
//!     let started = AuditEventMessage::application_activity(
//!         true,
//!         "pacs-01",
//!         "hospital-a",
//!         EventOutcome::Success,
//!     )?;
//!     queue.send_audit_event(started).await?;
//!
//!     shutdown_queue(&context, queue.as_ref()).await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod destination;
pub mod domain;
pub mod endpoint;
pub mod error;
pub mod observability;
pub mod queue;
pub mod record;
pub mod sender;
pub mod socket;

#[cfg(feature = "events")]
pub mod events;

pub use config::Config;
pub use context::Context;
pub use error::{Error, Result};

/// Common imports for audit nodes
pub mod prelude {
    pub use crate::config::{
        AuditRepositoryConfig, BrokerConfig, Config, NodeAuthConfig, QueueConfig, QueueStrategy,
        ServiceConfig,
    };
    pub use crate::context::{Context, ContextBuilder, ProvidesDomainRegistry, ProvidesSocketHandler};
    pub use crate::destination::{Destination, TransportKind};
    pub use crate::domain::{SecurityDomain, SecurityDomainRegistry};
    pub use crate::endpoint::{extract_host, EndpointPattern};
    pub use crate::error::{ConnectPhase, Error, Result};
    pub use crate::observability::{init_tracing, shutdown_tracing};
    pub use crate::queue::{
        build_queue, shutdown_queue, AuditQueue, BrokerAuditQueue, BrokerPublisher,
        PooledAuditQueue, QueueErrorHook, QueueFailure, SynchronousAuditQueue,
    };
    pub use crate::record::{
        ActiveParticipant, AuditEventMessage, AuditSourceIdentification, CodedValue,
        EventActionCode, EventIdentification, EventOutcome, NetworkAccessPointType,
        ParticipantObjectIdentification, ParticipantObjectType, VocabularyGroup,
    };
    pub use crate::sender::{AuditMessageSender, AuditSender, SendReport};
    pub use crate::socket::{
        AtnaStream, ConnectionSecurity, KeyStore, KeyType, SocketConfig, SocketHandler,
    };

    #[cfg(feature = "events")]
    pub use crate::events::{run_relay, NatsJetStreamPublisher};
}
