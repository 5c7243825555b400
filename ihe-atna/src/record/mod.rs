//! Audit record model and XML serialization
//!
//! An [`AuditEventMessage`] renders to the RFC 3881 / DICOM audit message
//! document. Blocks write their attributes in a fixed order and their
//! children after, so serialization is deterministic. No external XML crate
//! is used; the schema is small enough to generate directly.

pub mod coded;
pub mod event;
pub mod message;
pub mod participant;
pub mod vocabulary;
pub mod xml;

pub use coded::CodedValue;
pub use event::{
    format_event_date_time, EventActionCode, EventIdentification, EventOutcome,
    EVENT_DATE_TIME_FORMAT,
};
pub use message::AuditEventMessage;
pub use participant::{
    ActiveParticipant, AuditSourceIdentification, NetworkAccessPointType,
    ParticipantObjectIdentification, ParticipantObjectType,
};
pub use vocabulary::VocabularyGroup;
