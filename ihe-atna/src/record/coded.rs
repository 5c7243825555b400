//! Coded vocabulary values

use serde::{Deserialize, Serialize};
use std::fmt;

use super::xml::XmlWriter;

/// A `(code, code system, display text)` triple
///
/// Equality compares all three fields; [`CodedValue::key`] is the identity
/// pair used for vocabulary lookups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodedValue {
    code: String,
    code_system_name: String,
    display_name: String,
}

impl CodedValue {
    pub fn new(
        code: impl Into<String>,
        code_system_name: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            code_system_name: code_system_name.into(),
            display_name: display_name.into(),
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn code_system_name(&self) -> &str {
        &self.code_system_name
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Identity pair `(code_system_name, code)`
    pub fn key(&self) -> (&str, &str) {
        (&self.code_system_name, &self.code)
    }

    /// Write as an empty element carrying `Code`, `CodeSystemName`, `DisplayName`
    pub(crate) fn write_xml(&self, writer: &mut XmlWriter, element: &'static str) {
        writer.empty(
            element,
            &[
                ("Code", Some(self.code.as_str())),
                ("CodeSystemName", Some(self.code_system_name.as_str())),
                ("DisplayName", Some(self.display_name.as_str())),
            ],
        );
    }
}

impl fmt::Display for CodedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}^{}^{}",
            self.code, self.display_name, self.code_system_name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_uses_all_fields() {
        let a = CodedValue::new("110112", "DCM", "Query");
        let b = CodedValue::new("110112", "DCM", "Query");
        let c = CodedValue::new("110112", "DCM", "Other display");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.key(), c.key());
    }

    #[test]
    fn test_write_xml() {
        let mut w = XmlWriter::new();
        CodedValue::new("ITI-18", "IHE Transactions", "Registry Stored Query")
            .write_xml(&mut w, "EventTypeCode");
        assert_eq!(
            w.finish(),
            r#"<EventTypeCode Code="ITI-18" CodeSystemName="IHE Transactions" DisplayName="Registry Stored Query"/>"#
        );
    }

    #[test]
    fn test_display() {
        let v = CodedValue::new("110100", "DCM", "Application Activity");
        assert_eq!(v.to_string(), "110100^Application Activity^DCM");
    }
}
