//! The complete `<AuditMessage>` document

use serde::{Deserialize, Serialize};

use super::coded::CodedValue;
use super::event::{EventActionCode, EventIdentification, EventOutcome};
use super::participant::{
    ActiveParticipant, AuditSourceIdentification, ParticipantObjectIdentification,
};
use super::vocabulary::{self, VocabularyGroup};
use super::xml::XmlWriter;
use crate::error::{Error, Result};

/// One audit record: event identification plus its sibling blocks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEventMessage {
    event: EventIdentification,
    active_participants: Vec<ActiveParticipant>,
    audit_sources: Vec<AuditSourceIdentification>,
    participant_objects: Vec<ParticipantObjectIdentification>,
}

impl AuditEventMessage {
    pub fn new(event: EventIdentification) -> Self {
        Self {
            event,
            active_participants: Vec::new(),
            audit_sources: Vec::new(),
            participant_objects: Vec::new(),
        }
    }

    /// Application start or stop record (DCM 110100)
    pub fn application_activity(
        started: bool,
        application_id: impl Into<String>,
        audit_source_id: impl Into<String>,
        outcome: EventOutcome,
    ) -> Result<Self> {
        let event_type = if started { "application_start" } else { "application_stop" };
        let event = EventIdentification::new(
            required(VocabularyGroup::EventId, "application_activity")?,
            outcome,
        )
        .with_action(EventActionCode::Execute)
        .with_event_type(required(VocabularyGroup::SecurityEventType, event_type)?);

        Ok(Self::new(event)
            .with_participant(
                ActiveParticipant::new(application_id, false)
                    .with_role(required(VocabularyGroup::RoleId, "application")?),
            )
            .with_source(AuditSourceIdentification::new(audit_source_id)))
    }

    pub fn with_participant(mut self, participant: ActiveParticipant) -> Self {
        self.active_participants.push(participant);
        self
    }

    pub fn with_source(mut self, source: AuditSourceIdentification) -> Self {
        self.audit_sources.push(source);
        self
    }

    pub fn with_object(mut self, object: ParticipantObjectIdentification) -> Self {
        self.participant_objects.push(object);
        self
    }

    pub fn event(&self) -> &EventIdentification {
        &self.event
    }

    pub fn active_participants(&self) -> &[ActiveParticipant] {
        &self.active_participants
    }

    pub fn audit_sources(&self) -> &[AuditSourceIdentification] {
        &self.audit_sources
    }

    pub fn participant_objects(&self) -> &[ParticipantObjectIdentification] {
        &self.participant_objects
    }

    /// Serialize to a UTF-8 XML document
    ///
    /// Deterministic for a given message; fails with
    /// [`Error::Serialization`] when required content is missing.
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = XmlWriter::new();
        writer.declaration().start("AuditMessage", &[]);

        self.event.write_xml(&mut writer)?;
        for participant in &self.active_participants {
            participant.write_xml(&mut writer)?;
        }
        for source in &self.audit_sources {
            source.write_xml(&mut writer)?;
        }
        for object in &self.participant_objects {
            object.write_xml(&mut writer)?;
        }

        Ok(writer.finish())
    }

    /// Serialized document as bytes, ready for the wire
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.to_xml().map(String::into_bytes)
    }
}

fn required(group: VocabularyGroup, key: &str) -> Result<CodedValue> {
    vocabulary::lookup(group, key).ok_or_else(|| {
        Error::Serialization(format!("no {} vocabulary entry for '{}'", group, key))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::participant::ParticipantObjectType;
    use chrono::{FixedOffset, TimeZone};

    fn sample() -> AuditEventMessage {
        let when = FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2024, 1, 2, 3, 4, 5)
            .unwrap();
        AuditEventMessage::new(
            EventIdentification::new(CodedValue::new("110112", "DCM", "Query"), EventOutcome::Success)
                .with_action(EventActionCode::Execute)
                .with_event_type(vocabulary::transaction("ITI-18").unwrap())
                .with_date_time(when),
        )
        .with_object(
            ParticipantObjectIdentification::new(
                "urn:uuid:1",
                CodedValue::new("ITI-18", "IHE Transactions", "Registry Stored Query"),
            )
            .with_type(ParticipantObjectType::SystemObject, Some(24)),
        )
        .with_source(AuditSourceIdentification::new("node-1"))
        .with_participant(ActiveParticipant::new("consumer", true))
    }

    #[test]
    fn test_document_shape_and_block_order() {
        let xml = sample().to_xml().unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?><AuditMessage>"));
        assert!(xml.ends_with("</AuditMessage>"));

        let event = xml.find("<EventIdentification").unwrap();
        let participant = xml.find("<ActiveParticipant").unwrap();
        let source = xml.find("<AuditSourceIdentification").unwrap();
        let object = xml.find("<ParticipantObjectIdentification").unwrap();
        assert!(event < participant && participant < source && source < object);
    }

    #[test]
    fn test_serialization_is_deterministic() {
        let message = sample();
        assert_eq!(message.to_xml().unwrap(), message.to_xml().unwrap());
        assert_eq!(message.to_bytes().unwrap(), message.to_xml().unwrap().into_bytes());
    }

    #[test]
    fn test_invalid_block_fails_whole_message() {
        let message = sample().with_participant(ActiveParticipant::new("", false));
        assert!(matches!(message.to_xml(), Err(Error::Serialization(_))));
    }

    #[test]
    fn test_application_activity() {
        let message =
            AuditEventMessage::application_activity(true, "pix-manager", "node-1", EventOutcome::Success)
                .unwrap();
        let xml = message.to_xml().unwrap();
        assert!(xml.contains(r#"<EventID Code="110100""#));
        assert!(xml.contains(r#"<EventTypeCode Code="110120""#));
        assert!(xml.contains(r#"<RoleIDCode Code="110150""#));
        assert_eq!(message.event().action_code(), Some(EventActionCode::Execute));
    }
}
