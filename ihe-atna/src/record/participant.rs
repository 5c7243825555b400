//! Participant and source blocks of an audit message

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use super::coded::CodedValue;
use super::xml::XmlWriter;
use crate::error::{Error, Result};

/// How a participant's network access point is identified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkAccessPointType {
    MachineName,
    IpAddress,
    TelephoneNumber,
}

impl NetworkAccessPointType {
    pub fn as_code(&self) -> &'static str {
        match self {
            Self::MachineName => "1",
            Self::IpAddress => "2",
            Self::TelephoneNumber => "3",
        }
    }

    /// Classify an access point string: IP literals are `IpAddress`, anything
    /// else a machine name
    pub fn classify(access_point: &str) -> Self {
        let trimmed = access_point.trim_start_matches('[').trim_end_matches(']');
        if trimmed.parse::<std::net::IpAddr>().is_ok() {
            Self::IpAddress
        } else {
            Self::MachineName
        }
    }
}

/// A user or system taking part in the audited event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveParticipant {
    pub user_id: String,
    pub alternative_user_id: Option<String>,
    pub user_name: Option<String>,
    pub user_is_requestor: bool,
    pub network_access_point_id: Option<String>,
    pub network_access_point_type: Option<NetworkAccessPointType>,
    pub role_id_codes: Vec<CodedValue>,
}

impl ActiveParticipant {
    pub fn new(user_id: impl Into<String>, user_is_requestor: bool) -> Self {
        Self {
            user_id: user_id.into(),
            alternative_user_id: None,
            user_name: None,
            user_is_requestor,
            network_access_point_id: None,
            network_access_point_type: None,
            role_id_codes: Vec::new(),
        }
    }

    pub fn with_alternative_user_id(mut self, id: impl Into<String>) -> Self {
        self.alternative_user_id = Some(id.into());
        self
    }

    pub fn with_user_name(mut self, name: impl Into<String>) -> Self {
        self.user_name = Some(name.into());
        self
    }

    /// Set the access point; its type is inferred from the value
    pub fn with_network_access_point(mut self, access_point: impl Into<String>) -> Self {
        let access_point = access_point.into();
        self.network_access_point_type = Some(NetworkAccessPointType::classify(&access_point));
        self.network_access_point_id = Some(access_point);
        self
    }

    pub fn with_role(mut self, role: CodedValue) -> Self {
        self.role_id_codes.push(role);
        self
    }

    pub(crate) fn write_xml(&self, writer: &mut XmlWriter) -> Result<()> {
        if self.user_id.is_empty() {
            return Err(Error::Serialization(
                "ActiveParticipant requires a UserID".to_string(),
            ));
        }

        writer.start(
            "ActiveParticipant",
            &[
                ("UserID", Some(self.user_id.as_str())),
                ("AlternativeUserID", self.alternative_user_id.as_deref()),
                ("UserName", self.user_name.as_deref()),
                (
                    "UserIsRequestor",
                    Some(if self.user_is_requestor { "true" } else { "false" }),
                ),
                ("NetworkAccessPointID", self.network_access_point_id.as_deref()),
                (
                    "NetworkAccessPointTypeCode",
                    self.network_access_point_type.map(|t| t.as_code()),
                ),
            ],
        );
        for role in &self.role_id_codes {
            role.write_xml(writer, "RoleIDCode");
        }
        writer.end();
        Ok(())
    }
}

/// The system that detected the event and produced the record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSourceIdentification {
    pub audit_enterprise_site_id: Option<String>,
    pub audit_source_id: String,
    pub audit_source_type_codes: Vec<CodedValue>,
}

impl AuditSourceIdentification {
    pub fn new(audit_source_id: impl Into<String>) -> Self {
        Self {
            audit_enterprise_site_id: None,
            audit_source_id: audit_source_id.into(),
            audit_source_type_codes: Vec::new(),
        }
    }

    pub fn with_enterprise_site(mut self, site: impl Into<String>) -> Self {
        self.audit_enterprise_site_id = Some(site.into());
        self
    }

    pub fn with_source_type(mut self, code: CodedValue) -> Self {
        self.audit_source_type_codes.push(code);
        self
    }

    pub(crate) fn write_xml(&self, writer: &mut XmlWriter) -> Result<()> {
        if self.audit_source_id.is_empty() {
            return Err(Error::Serialization(
                "AuditSourceIdentification requires an AuditSourceID".to_string(),
            ));
        }

        writer.start(
            "AuditSourceIdentification",
            &[
                ("AuditEnterpriseSiteID", self.audit_enterprise_site_id.as_deref()),
                ("AuditSourceID", Some(self.audit_source_id.as_str())),
            ],
        );
        for code in &self.audit_source_type_codes {
            code.write_xml(writer, "AuditSourceTypeCode");
        }
        writer.end();
        Ok(())
    }
}

/// Category of a participant object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParticipantObjectType {
    Person,
    SystemObject,
    Organization,
    Other,
}

impl ParticipantObjectType {
    pub fn as_code(&self) -> &'static str {
        match self {
            Self::Person => "1",
            Self::SystemObject => "2",
            Self::Organization => "3",
            Self::Other => "4",
        }
    }
}

/// A patient, document, query or other object the event touched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantObjectIdentification {
    pub participant_object_id: String,
    pub type_code: Option<ParticipantObjectType>,
    /// RFC 3881 role code, 1..=24
    pub type_code_role: Option<u8>,
    pub data_life_cycle: Option<u8>,
    pub id_type_code: CodedValue,
    pub sensitivity: Option<String>,
    pub name: Option<String>,
    /// Raw query bytes, base64 on the wire
    pub query: Option<Vec<u8>>,
    /// `(type, value)` pairs; values are base64 on the wire
    pub details: Vec<(String, Vec<u8>)>,
}

impl ParticipantObjectIdentification {
    pub fn new(participant_object_id: impl Into<String>, id_type_code: CodedValue) -> Self {
        Self {
            participant_object_id: participant_object_id.into(),
            type_code: None,
            type_code_role: None,
            data_life_cycle: None,
            id_type_code,
            sensitivity: None,
            name: None,
            query: None,
            details: Vec::new(),
        }
    }

    pub fn with_type(mut self, type_code: ParticipantObjectType, role: Option<u8>) -> Self {
        self.type_code = Some(type_code);
        self.type_code_role = role;
        self
    }

    pub fn with_data_life_cycle(mut self, stage: u8) -> Self {
        self.data_life_cycle = Some(stage);
        self
    }

    pub fn with_sensitivity(mut self, sensitivity: impl Into<String>) -> Self {
        self.sensitivity = Some(sensitivity.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_query(mut self, query: impl Into<Vec<u8>>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_detail(mut self, detail_type: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.details.push((detail_type.into(), value.into()));
        self
    }

    pub(crate) fn write_xml(&self, writer: &mut XmlWriter) -> Result<()> {
        if self.participant_object_id.is_empty() {
            return Err(Error::Serialization(
                "ParticipantObjectIdentification requires a ParticipantObjectID".to_string(),
            ));
        }
        if let Some(role) = self.type_code_role {
            if !(1..=24).contains(&role) {
                return Err(Error::Serialization(format!(
                    "ParticipantObjectTypeCodeRole {} is outside 1..=24",
                    role
                )));
            }
        }

        let role = self.type_code_role.map(|r| r.to_string());
        let life_cycle = self.data_life_cycle.map(|l| l.to_string());
        writer.start(
            "ParticipantObjectIdentification",
            &[
                ("ParticipantObjectID", Some(self.participant_object_id.as_str())),
                ("ParticipantObjectTypeCode", self.type_code.map(|t| t.as_code())),
                ("ParticipantObjectTypeCodeRole", role.as_deref()),
                ("ParticipantObjectDataLifeCycle", life_cycle.as_deref()),
                ("ParticipantObjectSensitivity", self.sensitivity.as_deref()),
            ],
        );
        self.id_type_code.write_xml(writer, "ParticipantObjectIDTypeCode");
        if let Some(name) = &self.name {
            writer.text_element("ParticipantObjectName", name);
        }
        if let Some(query) = &self.query {
            writer.text_element("ParticipantObjectQuery", &STANDARD.encode(query));
        }
        for (detail_type, value) in &self.details {
            let encoded = STANDARD.encode(value);
            writer.empty(
                "ParticipantObjectDetail",
                &[("type", Some(detail_type.as_str())), ("value", Some(encoded.as_str()))],
            );
        }
        writer.end();
        Ok(())
    }
}
