//! RFC 3881 event identification block

use chrono::{DateTime, FixedOffset, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::coded::CodedValue;
use super::xml::XmlWriter;
use crate::error::{Error, Result};

/// Timestamp layout: `yyyy-MM-ddTHH:mm:ss.SSS±HH:mm`
///
/// `%:z` emits the offset with a colon, which the audit schema requires.
pub const EVENT_DATE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%:z";

/// Format an instant for the `EventDateTime` attribute
pub fn format_event_date_time(instant: &DateTime<FixedOffset>) -> String {
    instant.format(EVENT_DATE_TIME_FORMAT).to_string()
}

/// CRUD+Execute action performed by the event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventActionCode {
    Create,
    Read,
    Update,
    Delete,
    Execute,
}

impl EventActionCode {
    pub const ALL: [EventActionCode; 5] = [
        Self::Create,
        Self::Read,
        Self::Update,
        Self::Delete,
        Self::Execute,
    ];

    /// Single-letter wire code
    pub fn as_code(&self) -> &'static str {
        match self {
            Self::Create => "C",
            Self::Read => "R",
            Self::Update => "U",
            Self::Delete => "D",
            Self::Execute => "E",
        }
    }

    pub fn from_code(code: &str) -> Result<Self> {
        match code {
            "C" => Ok(Self::Create),
            "R" => Ok(Self::Read),
            "U" => Ok(Self::Update),
            "D" => Ok(Self::Delete),
            "E" => Ok(Self::Execute),
            other => Err(Error::Serialization(format!(
                "invalid EventActionCode '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for EventActionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

/// Event outcome indicator; only the four RFC 3881 values exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventOutcome {
    /// 0
    Success,
    /// 4
    MinorFailure,
    /// 8
    SeriousFailure,
    /// 12
    MajorFailure,
}

impl EventOutcome {
    pub const ALL: [EventOutcome; 4] = [
        Self::Success,
        Self::MinorFailure,
        Self::SeriousFailure,
        Self::MajorFailure,
    ];

    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Success => 0,
            Self::MinorFailure => 4,
            Self::SeriousFailure => 8,
            Self::MajorFailure => 12,
        }
    }
}

impl TryFrom<u8> for EventOutcome {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Success),
            4 => Ok(Self::MinorFailure),
            8 => Ok(Self::SeriousFailure),
            12 => Ok(Self::MajorFailure),
            other => Err(Error::Serialization(format!(
                "EventOutcomeIndicator {} is not one of 0, 4, 8, 12",
                other
            ))),
        }
    }
}

impl fmt::Display for EventOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// What happened, when, and how it turned out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventIdentification {
    event_id: CodedValue,
    event_type_codes: Vec<CodedValue>,
    action_code: Option<EventActionCode>,
    event_date_time: DateTime<FixedOffset>,
    outcome: EventOutcome,
    purposes_of_use: Vec<CodedValue>,
}

impl EventIdentification {
    /// New block stamped with the current local time
    pub fn new(event_id: CodedValue, outcome: EventOutcome) -> Self {
        Self {
            event_id,
            event_type_codes: Vec::new(),
            action_code: None,
            event_date_time: Local::now().fixed_offset(),
            outcome,
            purposes_of_use: Vec::new(),
        }
    }

    pub fn with_action(mut self, action: EventActionCode) -> Self {
        self.action_code = Some(action);
        self
    }

    pub fn with_event_type(mut self, code: CodedValue) -> Self {
        self.event_type_codes.push(code);
        self
    }

    pub fn with_purpose_of_use(mut self, code: CodedValue) -> Self {
        self.purposes_of_use.push(code);
        self
    }

    pub fn with_date_time(mut self, instant: DateTime<FixedOffset>) -> Self {
        self.event_date_time = instant;
        self
    }

    pub fn event_id(&self) -> &CodedValue {
        &self.event_id
    }

    pub fn event_type_codes(&self) -> &[CodedValue] {
        &self.event_type_codes
    }

    pub fn action_code(&self) -> Option<EventActionCode> {
        self.action_code
    }

    pub fn event_date_time(&self) -> &DateTime<FixedOffset> {
        &self.event_date_time
    }

    pub fn outcome(&self) -> EventOutcome {
        self.outcome
    }

    pub fn purposes_of_use(&self) -> &[CodedValue] {
        &self.purposes_of_use
    }

    /// Check required content before serialization
    pub fn validate(&self) -> Result<()> {
        if self.event_id.code().is_empty() {
            return Err(Error::Serialization(
                "EventID requires a non-empty code".to_string(),
            ));
        }
        Ok(())
    }

    /// Write the `EventIdentification` element
    ///
    /// Attribute order is action, date-time, outcome; children are EventID,
    /// then EventTypeCode and PurposeOfUse in insertion order.
    pub(crate) fn write_xml(&self, writer: &mut XmlWriter) -> Result<()> {
        self.validate()?;

        let date_time = format_event_date_time(&self.event_date_time);
        let outcome = self.outcome.to_string();
        writer.start(
            "EventIdentification",
            &[
                ("EventActionCode", self.action_code.map(|a| a.as_code())),
                ("EventDateTime", Some(date_time.as_str())),
                ("EventOutcomeIndicator", Some(outcome.as_str())),
            ],
        );
        self.event_id.write_xml(writer, "EventID");
        for code in &self.event_type_codes {
            code.write_xml(writer, "EventTypeCode");
        }
        for code in &self.purposes_of_use {
            code.write_xml(writer, "PurposeOfUse");
        }
        writer.end();
        Ok(())
    }

    /// Serialize this block alone
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = XmlWriter::new();
        self.write_xml(&mut writer)?;
        Ok(writer.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::xml::unescape_attr;
    use chrono::TimeZone;
    use regex::Regex;

    fn fixed_instant() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(5 * 3600 + 30 * 60)
            .unwrap()
            .with_ymd_and_hms(2024, 3, 7, 9, 5, 2)
            .unwrap()
            + chrono::Duration::milliseconds(45)
    }

    fn attr(xml: &str, name: &str) -> Option<String> {
        let re = Regex::new(&format!(r#"<EventIdentification[^>]* {}="([^"]*)""#, name)).unwrap();
        re.captures(xml).map(|c| unescape_attr(&c[1]))
    }

    #[test]
    fn test_timestamp_has_colon_in_offset() {
        assert_eq!(
            format_event_date_time(&fixed_instant()),
            "2024-03-07T09:05:02.045+05:30"
        );

        let west = FixedOffset::west_opt(8 * 3600)
            .unwrap()
            .with_ymd_and_hms(2023, 12, 31, 23, 59, 59)
            .unwrap();
        let formatted = format_event_date_time(&west);
        assert_eq!(formatted, "2023-12-31T23:59:59.000-08:00");

        let shape =
            Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.\d{3}[+-]\d{2}:\d{2}$").unwrap();
        assert!(shape.is_match(&formatted));
    }

    #[test]
    fn test_outcome_and_action_survive_reparse() {
        let actions: Vec<Option<EventActionCode>> = std::iter::once(None)
            .chain(EventActionCode::ALL.iter().copied().map(Some))
            .collect();

        for outcome in EventOutcome::ALL {
            for action in &actions {
                let mut block = EventIdentification::new(
                    CodedValue::new("110112", "DCM", "Query & <Search> \"x\" 'y'"),
                    outcome,
                )
                .with_date_time(fixed_instant());
                if let Some(a) = action {
                    block = block.with_action(*a);
                }

                let xml = block.to_xml().unwrap();

                let parsed_outcome: u8 = attr(&xml, "EventOutcomeIndicator")
                    .unwrap()
                    .parse()
                    .unwrap();
                assert_eq!(EventOutcome::try_from(parsed_outcome).unwrap(), outcome);

                let parsed_action = attr(&xml, "EventActionCode")
                    .map(|c| EventActionCode::from_code(&c).unwrap());
                assert_eq!(parsed_action, *action);

                assert_eq!(
                    attr(&xml, "EventDateTime").unwrap(),
                    "2024-03-07T09:05:02.045+05:30"
                );

                let display = Regex::new(r#"<EventID [^>]*DisplayName="([^"]*)""#)
                    .unwrap()
                    .captures(&xml)
                    .map(|c| unescape_attr(&c[1]))
                    .unwrap();
                assert_eq!(display, "Query & <Search> \"x\" 'y'");
                assert!(xml.contains("&amp;") && xml.contains("&lt;") && xml.contains("&quot;") && xml.contains("&apos;"));
            }
        }
    }

    #[test]
    fn test_child_order_is_fixed() {
        let xml = EventIdentification::new(
            CodedValue::new("110112", "DCM", "Query"),
            EventOutcome::Success,
        )
        .with_purpose_of_use(CodedValue::new("TREAT", "v3-PurposeOfUse", "Treatment"))
        .with_event_type(CodedValue::new("ITI-18", "IHE Transactions", "Registry Stored Query"))
        .with_event_type(CodedValue::new("ITI-55", "IHE Transactions", "XCPD"))
        .with_purpose_of_use(CodedValue::new("ETREAT", "v3-PurposeOfUse", "Emergency"))
        .with_date_time(fixed_instant())
        .to_xml()
        .unwrap();

        let event_id = xml.find("<EventID ").unwrap();
        let iti18 = xml.find("ITI-18").unwrap();
        let iti55 = xml.find("ITI-55").unwrap();
        let treat = xml.find("\"TREAT\"").unwrap();
        let etreat = xml.find("\"ETREAT\"").unwrap();
        assert!(event_id < iti18 && iti18 < iti55 && iti55 < treat && treat < etreat);
        assert!(!xml.contains("EventActionCode"));
        assert!(xml.starts_with(
            r#"<EventIdentification EventDateTime="2024-03-07T09:05:02.045+05:30" EventOutcomeIndicator="0">"#
        ));
        assert!(xml.ends_with("</EventIdentification>"));
    }

    #[test]
    fn test_attribute_order() {
        let xml = EventIdentification::new(
            CodedValue::new("110106", "DCM", "Export"),
            EventOutcome::MajorFailure,
        )
        .with_action(EventActionCode::Read)
        .with_date_time(fixed_instant())
        .to_xml()
        .unwrap();
        assert!(xml.starts_with(
            r#"<EventIdentification EventActionCode="R" EventDateTime="2024-03-07T09:05:02.045+05:30" EventOutcomeIndicator="12">"#
        ));
    }

    #[test]
    fn test_out_of_range_outcome_rejected() {
        for bad in [1u8, 2, 5, 13, 255] {
            assert!(matches!(
                EventOutcome::try_from(bad),
                Err(Error::Serialization(_))
            ));
        }
    }

    #[test]
    fn test_empty_event_id_rejected() {
        let block = EventIdentification::new(CodedValue::new("", "DCM", ""), EventOutcome::Success);
        assert!(matches!(block.to_xml(), Err(Error::Serialization(_))));
        assert!(EventActionCode::from_code("X").is_err());
    }
}
