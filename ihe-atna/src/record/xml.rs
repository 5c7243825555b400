//! Minimal XML writer for audit records
//!
//! Only what the audit message needs: elements with ordered attributes,
//! empty elements, nesting, and XML 1.0 attribute escaping.

use std::fmt::Write;

/// Escape `& < > " '` for use in an attribute value
pub fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Reverse of [`escape_attr`] for the five predefined entities
pub fn unescape_attr(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Append-only XML builder
#[derive(Debug, Default)]
pub struct XmlWriter {
    buf: String,
    open: Vec<&'static str>,
}

impl XmlWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write the `<?xml ...?>` declaration
    pub fn declaration(&mut self) -> &mut Self {
        self.buf
            .push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
        self
    }

    /// Open an element; `None` attributes are skipped
    pub fn start(&mut self, name: &'static str, attrs: &[(&str, Option<&str>)]) -> &mut Self {
        self.write_tag(name, attrs);
        self.buf.push('>');
        self.open.push(name);
        self
    }

    /// Write a self-closing element
    pub fn empty(&mut self, name: &'static str, attrs: &[(&str, Option<&str>)]) -> &mut Self {
        self.write_tag(name, attrs);
        self.buf.push_str("/>");
        self
    }

    /// Write an element whose only content is escaped text
    pub fn text_element(&mut self, name: &'static str, text: &str) -> &mut Self {
        let _ = write!(self.buf, "<{}>{}</{}>", name, escape_attr(text), name);
        self
    }

    /// Close the most recently opened element
    pub fn end(&mut self) -> &mut Self {
        if let Some(name) = self.open.pop() {
            let _ = write!(self.buf, "</{}>", name);
        }
        self
    }

    /// Close any open elements and return the document
    pub fn finish(mut self) -> String {
        while !self.open.is_empty() {
            self.end();
        }
        self.buf
    }

    fn write_tag(&mut self, name: &str, attrs: &[(&str, Option<&str>)]) {
        let _ = write!(self.buf, "<{}", name);
        for (key, value) in attrs {
            if let Some(value) = value {
                let _ = write!(self.buf, " {}=\"{}\"", key, escape_attr(value));
            }
        }
    }
}
