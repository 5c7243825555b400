//! Closed vocabulary of coded values used in audit records
//!
//! Entries are data, not types: adding a transaction or object-id code is a
//! new row in [`TABLE`]. Lookups are by group and key; keys are the code
//! itself for transactions and numeric RFC 3881 codes, and a short snake-case
//! name for DICOM event and role codes.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::coded::CodedValue;

/// Vocabulary groups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VocabularyGroup {
    /// DICOM audit event IDs (EventID)
    EventId,
    /// IHE transaction codes (EventTypeCode)
    EventType,
    /// Active participant role IDs
    RoleId,
    /// Participant object ID type codes
    ParticipantObjectIdType,
    /// Audit source type codes
    AuditSourceType,
    /// Security alert / user authentication event type codes
    SecurityEventType,
}

impl fmt::Display for VocabularyGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EventId => write!(f, "event_id"),
            Self::EventType => write!(f, "event_type"),
            Self::RoleId => write!(f, "role_id"),
            Self::ParticipantObjectIdType => write!(f, "participant_object_id_type"),
            Self::AuditSourceType => write!(f, "audit_source_type"),
            Self::SecurityEventType => write!(f, "security_event_type"),
        }
    }
}

/// One row of the vocabulary table
#[derive(Debug, Clone, Copy)]
pub struct VocabularyEntry {
    pub group: VocabularyGroup,
    pub key: &'static str,
    pub code: &'static str,
    pub code_system_name: &'static str,
    pub display_name: &'static str,
}

impl VocabularyEntry {
    pub fn to_coded_value(&self) -> CodedValue {
        CodedValue::new(self.code, self.code_system_name, self.display_name)
    }
}

const fn entry(
    group: VocabularyGroup,
    key: &'static str,
    code: &'static str,
    code_system_name: &'static str,
    display_name: &'static str,
) -> VocabularyEntry {
    VocabularyEntry {
        group,
        key,
        code,
        code_system_name,
        display_name,
    }
}

use VocabularyGroup::*;

const DCM: &str = "DCM";
const IHE: &str = "IHE Transactions";
const RFC3881: &str = "RFC-3881";

/// The vocabulary table
pub static TABLE: &[VocabularyEntry] = &[
    // DICOM event IDs
    entry(EventId, "application_activity", "110100", DCM, "Application Activity"),
    entry(EventId, "audit_log_used", "110101", DCM, "Audit Log Used"),
    entry(EventId, "begin_transferring", "110102", DCM, "Begin Transferring DICOM Instances"),
    entry(EventId, "instances_accessed", "110103", DCM, "DICOM Instances Accessed"),
    entry(EventId, "instances_transferred", "110104", DCM, "DICOM Instances Transferred"),
    entry(EventId, "study_deleted", "110105", DCM, "DICOM Study Deleted"),
    entry(EventId, "export", "110106", DCM, "Export"),
    entry(EventId, "import", "110107", DCM, "Import"),
    entry(EventId, "network_entry", "110108", DCM, "Network Entry"),
    entry(EventId, "order_record", "110109", DCM, "Order Record"),
    entry(EventId, "patient_record", "110110", DCM, "Patient Record"),
    entry(EventId, "procedure_record", "110111", DCM, "Procedure Record"),
    entry(EventId, "query", "110112", DCM, "Query"),
    entry(EventId, "security_alert", "110113", DCM, "Security Alert"),
    entry(EventId, "user_authentication", "110114", DCM, "User Authentication"),
    // Application activity / authentication event types
    entry(SecurityEventType, "application_start", "110120", DCM, "Application Start"),
    entry(SecurityEventType, "application_stop", "110121", DCM, "Application Stop"),
    entry(SecurityEventType, "login", "110122", DCM, "Login"),
    entry(SecurityEventType, "logout", "110123", DCM, "Logout"),
    entry(SecurityEventType, "attach", "110124", DCM, "Attach"),
    entry(SecurityEventType, "detach", "110125", DCM, "Detach"),
    entry(SecurityEventType, "node_authentication", "110126", DCM, "Node Authentication"),
    entry(SecurityEventType, "emergency_override_started", "110127", DCM, "Emergency Override Started"),
    entry(SecurityEventType, "network_configuration", "110128", DCM, "Network Configuration"),
    entry(SecurityEventType, "security_configuration", "110129", DCM, "Security Configuration"),
    entry(SecurityEventType, "hardware_configuration", "110130", DCM, "Hardware Configuration"),
    entry(SecurityEventType, "software_configuration", "110131", DCM, "Software Configuration"),
    entry(SecurityEventType, "use_of_restricted_function", "110132", DCM, "Use of Restricted Function"),
    entry(SecurityEventType, "audit_recording_stopped", "110133", DCM, "Audit Recording Stopped"),
    entry(SecurityEventType, "audit_recording_started", "110134", DCM, "Audit Recording Started"),
    entry(SecurityEventType, "object_security_attributes_changed", "110135", DCM, "Object Security Attributes Changed"),
    entry(SecurityEventType, "security_roles_changed", "110136", DCM, "Security Roles Changed"),
    entry(SecurityEventType, "user_security_attributes_changed", "110137", DCM, "User Security Attributes Changed"),
    entry(SecurityEventType, "emergency_override_stopped", "110138", DCM, "Emergency Override Stopped"),
    entry(SecurityEventType, "remote_service_operation_started", "110139", DCM, "Remote Service Operation Started"),
    entry(SecurityEventType, "remote_service_operation_stopped", "110140", DCM, "Remote Service Operation Stopped"),
    entry(SecurityEventType, "local_service_operation_started", "110141", DCM, "Local Service Operation Started"),
    entry(SecurityEventType, "local_service_operation_stopped", "110142", DCM, "Local Service Operation Stopped"),
    // IHE transactions
    entry(EventType, "ITI-8", "ITI-8", IHE, "Patient Identity Feed"),
    entry(EventType, "ITI-9", "ITI-9", IHE, "PIX Query"),
    entry(EventType, "ITI-10", "ITI-10", IHE, "PIX Update Notification"),
    entry(EventType, "ITI-14", "ITI-14", IHE, "Register Document Set"),
    entry(EventType, "ITI-15", "ITI-15", IHE, "Provide and Register Document Set"),
    entry(EventType, "ITI-16", "ITI-16", IHE, "Query Registry"),
    entry(EventType, "ITI-17", "ITI-17", IHE, "Retrieve Document"),
    entry(EventType, "ITI-18", "ITI-18", IHE, "Registry Stored Query"),
    entry(EventType, "ITI-21", "ITI-21", IHE, "Patient Demographics Query"),
    entry(EventType, "ITI-22", "ITI-22", IHE, "Patient Demographics and Visit Query"),
    entry(EventType, "ITI-41", "ITI-41", IHE, "Provide and Register Document Set-b"),
    entry(EventType, "ITI-42", "ITI-42", IHE, "Register Document Set-b"),
    entry(EventType, "ITI-43", "ITI-43", IHE, "Retrieve Document Set"),
    entry(EventType, "ITI-44", "ITI-44", IHE, "Patient Identity Feed HL7v3"),
    entry(EventType, "ITI-45", "ITI-45", IHE, "PIX Query HL7v3"),
    entry(EventType, "ITI-46", "ITI-46", IHE, "PIX Update Notification HL7v3"),
    entry(EventType, "ITI-47", "ITI-47", IHE, "Patient Demographics Query HL7v3"),
    entry(EventType, "ITI-51", "ITI-51", IHE, "Multi-Patient Stored Query"),
    entry(EventType, "ITI-55", "ITI-55", IHE, "Cross Gateway Patient Discovery"),
    entry(EventType, "ITI-57", "ITI-57", IHE, "Update Document Set"),
    entry(EventType, "ITI-61", "ITI-61", IHE, "Register On-Demand Document Entry"),
    // Role IDs
    entry(RoleId, "application", "110150", DCM, "Application"),
    entry(RoleId, "application_launcher", "110151", DCM, "Application Launcher"),
    entry(RoleId, "destination", "110152", DCM, "Destination"),
    entry(RoleId, "source", "110153", DCM, "Source"),
    entry(RoleId, "destination_media", "110154", DCM, "Destination Media"),
    entry(RoleId, "source_media", "110155", DCM, "Source Media"),
    // Participant object ID types
    entry(ParticipantObjectIdType, "1", "1", RFC3881, "Medical Record Number"),
    entry(ParticipantObjectIdType, "2", "2", RFC3881, "Patient Number"),
    entry(ParticipantObjectIdType, "3", "3", RFC3881, "Encounter Number"),
    entry(ParticipantObjectIdType, "4", "4", RFC3881, "Enrollee Number"),
    entry(ParticipantObjectIdType, "5", "5", RFC3881, "Social Security Number"),
    entry(ParticipantObjectIdType, "6", "6", RFC3881, "Account Number"),
    entry(ParticipantObjectIdType, "7", "7", RFC3881, "Guarantor Number"),
    entry(ParticipantObjectIdType, "8", "8", RFC3881, "Report Name"),
    entry(ParticipantObjectIdType, "9", "9", RFC3881, "Report Number"),
    entry(ParticipantObjectIdType, "10", "10", RFC3881, "Search Criteria"),
    entry(ParticipantObjectIdType, "11", "11", RFC3881, "User Identifier"),
    entry(ParticipantObjectIdType, "12", "12", RFC3881, "URI"),
    entry(ParticipantObjectIdType, "submission_set", "urn:uuid:a54d6aa5-d40d-43f9-88c5-b4633d873bdd", "IHE XDS Metadata", "submission set classificationNode"),
    entry(ParticipantObjectIdType, "study_instance_uid", "110180", DCM, "Study Instance UID"),
    entry(ParticipantObjectIdType, "sop_class_uid", "110181", DCM, "SOP Class UID"),
    entry(ParticipantObjectIdType, "node_id", "110182", DCM, "Node ID"),
    // Audit source types
    entry(AuditSourceType, "1", "1", RFC3881, "End-user display device, diagnostic display"),
    entry(AuditSourceType, "2", "2", RFC3881, "Data acquisition device or instrument"),
    entry(AuditSourceType, "3", "3", RFC3881, "Web server process"),
    entry(AuditSourceType, "4", "4", RFC3881, "Application server process"),
    entry(AuditSourceType, "5", "5", RFC3881, "Database server process"),
    entry(AuditSourceType, "6", "6", RFC3881, "Security server"),
    entry(AuditSourceType, "7", "7", RFC3881, "ISO level 1-3 network component"),
    entry(AuditSourceType, "8", "8", RFC3881, "ISO level 4-6 operating software"),
    entry(AuditSourceType, "9", "9", RFC3881, "External source, other or unknown type"),
];

/// Look up a coded value by group and key
pub fn lookup(group: VocabularyGroup, key: &str) -> Option<CodedValue> {
    TABLE
        .iter()
        .find(|e| e.group == group && e.key == key)
        .map(VocabularyEntry::to_coded_value)
}

/// All entries of one group, in table order
pub fn entries(group: VocabularyGroup) -> impl Iterator<Item = &'static VocabularyEntry> {
    TABLE.iter().filter(move |e| e.group == group)
}

/// Shorthand for an IHE transaction event type code (`"ITI-18"`)
pub fn transaction(code: &str) -> Option<CodedValue> {
    lookup(EventType, code)
}
