// message/envelope.rs - Transport Envelope
//
//! FIPA message envelope for HTTP-MTP transport.
//!
//! The envelope wraps an ACL payload with delivery metadata and travels as
//! the first part of the multipart body, serialized as XML. The schema is
//! small and fixed, so the reader here is a hand-rolled scanner that
//! tolerates unknown elements, attribute-style received stamps and missing
//! optional fields, the way peer platforms actually emit them.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::aid::AgentIdentifier;

/// Standard name of the string ACL representation carried in part two
pub const ACL_STRING_REPRESENTATION: &str = "fipa.acl.rep.string.std";

/// Errors from decoding envelope XML
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("missing required envelope element: {0}")]
    MissingField(&'static str),

    #[error("unparseable envelope date: {0}")]
    BadDate(String),
}

/// Delivery stamp added by a receiving agent communication channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceivedStamp {
    /// Address of the ACC that received the message
    pub by: String,
    pub date: Option<DateTime<Utc>>,
    pub id: Option<String>,
    pub via: Option<String>,
}

/// Transport metadata wrapping an ACL message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Destination agents; non-empty for outbound sends
    pub to: Vec<AgentIdentifier>,

    /// Originating agent
    pub from: AgentIdentifier,

    /// Envelope creation time
    pub date: DateTime<Utc>,

    /// Name of the ACL encoding used for the payload part
    pub acl_representation: String,

    /// Length of the ACL payload in bytes
    pub payload_length: Option<u64>,

    /// Character encoding hint for the payload part
    pub payload_encoding: Option<String>,

    /// Agents the delivering ACC should hand the message to
    pub intended_receiver: Vec<AgentIdentifier>,

    /// Free-form comments
    pub comments: Option<String>,

    /// Stamp added by a forwarding ACC, when present
    pub received: Option<ReceivedStamp>,
}

impl Envelope {
    /// Create an envelope dated now, with intended receivers mirroring `to`
    pub fn new(from: AgentIdentifier, to: Vec<AgentIdentifier>) -> Self {
        let intended_receiver = to.clone();
        Self {
            to,
            from,
            date: Utc::now(),
            acl_representation: ACL_STRING_REPRESENTATION.to_string(),
            payload_length: None,
            payload_encoding: None,
            intended_receiver,
            comments: None,
            received: None,
        }
    }

    /// Set the payload length
    pub fn with_payload_length(mut self, len: u64) -> Self {
        self.payload_length = Some(len);
        self
    }

    /// Set the payload encoding hint
    pub fn with_payload_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.payload_encoding = Some(encoding.into());
        self
    }

    /// Set the comments field
    pub fn with_comments(mut self, comments: impl Into<String>) -> Self {
        self.comments = Some(comments.into());
        self
    }

    /// Attach a received stamp
    pub fn with_received(mut self, stamp: ReceivedStamp) -> Self {
        self.received = Some(stamp);
        self
    }

    /// Serialize to envelope XML
    pub fn to_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        xml.push_str("<envelope>\n");
        xml.push_str("  <params index=\"1\">\n");

        for aid in &self.to {
            push_aid_elem(&mut xml, "to", aid);
        }
        push_aid_elem(&mut xml, "from", &self.from);

        xml.push_str(&format!(
            "    <acl-representation>{}</acl-representation>\n",
            xml_escape(&self.acl_representation)
        ));
        if let Some(len) = self.payload_length {
            xml.push_str(&format!("    <payload-length>{len}</payload-length>\n"));
        }
        if let Some(encoding) = &self.payload_encoding {
            xml.push_str(&format!(
                "    <payload-encoding>{}</payload-encoding>\n",
                xml_escape(encoding)
            ));
        }
        xml.push_str(&format!(
            "    <date>{}</date>\n",
            format_envelope_date(&self.date)
        ));
        for aid in &self.intended_receiver {
            push_aid_elem(&mut xml, "intended-receiver", aid);
        }
        if let Some(comments) = &self.comments {
            xml.push_str(&format!(
                "    <comments>{}</comments>\n",
                xml_escape(comments)
            ));
        }
        if let Some(stamp) = &self.received {
            xml.push_str("    <received>\n");
            xml.push_str(&format!(
                "      <received-by value=\"{}\"/>\n",
                xml_escape(&stamp.by)
            ));
            if let Some(date) = &stamp.date {
                xml.push_str(&format!(
                    "      <received-date value=\"{}\"/>\n",
                    format_envelope_date(date)
                ));
            }
            if let Some(id) = &stamp.id {
                xml.push_str(&format!("      <received-id value=\"{}\"/>\n", xml_escape(id)));
            }
            if let Some(via) = &stamp.via {
                xml.push_str(&format!(
                    "      <received-via value=\"{}\"/>\n",
                    xml_escape(via)
                ));
            }
            xml.push_str("    </received>\n");
        }

        xml.push_str("  </params>\n");
        xml.push_str("</envelope>\n");
        xml
    }

    /// Decode envelope XML.
    ///
    /// Requires `to`, `from` and `date`; everything else is optional and
    /// unknown elements are skipped.
    pub fn from_xml(xml: &str) -> Result<Envelope, EnvelopeError> {
        let envelope =
            first_block(xml, "envelope").ok_or(EnvelopeError::MissingField("envelope"))?;
        // Some emitters skip the <params> wrapper; scan the whole element then.
        let params = first_block(envelope, "params").unwrap_or(envelope);

        let mut to = Vec::new();
        for block in inner_blocks(params, "to") {
            to.extend(aids_in(block));
        }
        if to.is_empty() {
            return Err(EnvelopeError::MissingField("to"));
        }

        let from = inner_blocks(params, "from")
            .into_iter()
            .flat_map(aids_in)
            .next()
            .ok_or(EnvelopeError::MissingField("from"))?;

        let raw_date = text_of(params, "date").ok_or(EnvelopeError::MissingField("date"))?;
        let date = parse_envelope_date(&raw_date).ok_or(EnvelopeError::BadDate(raw_date))?;

        let acl_representation =
            text_of(params, "acl-representation").unwrap_or_else(|| ACL_STRING_REPRESENTATION.to_string());
        let payload_length = text_of(params, "payload-length").and_then(|t| t.parse().ok());
        let payload_encoding = text_of(params, "payload-encoding");
        let comments = text_of(params, "comments");

        let mut intended_receiver = Vec::new();
        for block in inner_blocks(params, "intended-receiver") {
            intended_receiver.extend(aids_in(block));
        }

        let received = first_block(params, "received").map(|block| ReceivedStamp {
            by: attr_of(block, "received-by", "value").unwrap_or_default(),
            date: attr_of(block, "received-date", "value").and_then(|d| parse_envelope_date(&d)),
            id: attr_of(block, "received-id", "value"),
            via: attr_of(block, "received-via", "value"),
        });

        Ok(Envelope {
            to,
            from,
            date,
            acl_representation,
            payload_length,
            payload_encoding,
            intended_receiver,
            comments,
            received,
        })
    }
}

/// Render a date in the FIPA envelope form, `YYYYMMDD Z HHMMSS` plus millis
pub(crate) fn format_envelope_date(date: &DateTime<Utc>) -> String {
    date.format("%Y%m%dZ%H%M%S%3f").to_string()
}

/// Parse an envelope date, accepting milli-, micro- and second precision
pub(crate) fn parse_envelope_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    for format in ["%Y%m%dZ%H%M%S%3f", "%Y%m%dZ%H%M%S%6f", "%Y%m%dZ%H%M%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    None
}

fn push_aid_elem(xml: &mut String, tag: &str, aid: &AgentIdentifier) {
    xml.push_str(&format!("    <{tag}>\n"));
    xml.push_str("      <agent-identifier>\n");
    xml.push_str(&format!(
        "        <name>{}</name>\n",
        xml_escape(&aid.name)
    ));
    if !aid.addresses.is_empty() {
        xml.push_str("        <addresses>\n");
        for url in &aid.addresses {
            xml.push_str(&format!("          <url>{}</url>\n", xml_escape(url)));
        }
        xml.push_str("        </addresses>\n");
    }
    xml.push_str("      </agent-identifier>\n");
    xml.push_str(&format!("    </{tag}>\n"));
}

/// Every `<tag>...</tag>` inner region, in document order.
///
/// Self-closing occurrences contribute an empty region. Tag names that
/// merely share a prefix (`<received-by` vs `<received`) do not match.
fn inner_blocks<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let mut out = Vec::new();
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let mut search = 0;
    while let Some(rel) = xml[search..].find(&open) {
        let after_name = search + rel + open.len();
        let Some(gt_rel) = xml[after_name..].find('>') else {
            break;
        };
        let head_rest = &xml[after_name..after_name + gt_rel];
        if !(head_rest.is_empty() || head_rest.starts_with(|c: char| c.is_whitespace())) {
            search = after_name;
            continue;
        }
        if head_rest.trim_end().ends_with('/') {
            out.push("");
            search = after_name + gt_rel + 1;
            continue;
        }
        let content_start = after_name + gt_rel + 1;
        let Some(close_rel) = xml[content_start..].find(&close) else {
            break;
        };
        out.push(&xml[content_start..content_start + close_rel]);
        search = content_start + close_rel + close.len();
    }
    out
}

fn first_block<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    inner_blocks(xml, tag).into_iter().next()
}

fn text_of(xml: &str, tag: &str) -> Option<String> {
    first_block(xml, tag).map(|block| xml_unescape(block.trim()))
}

/// Value of `attr` on the first `<tag .../>` occurrence, if any
fn attr_of(xml: &str, tag: &str, attr: &str) -> Option<String> {
    let open = format!("<{tag}");
    let start = xml.find(&open)?;
    let rest = &xml[start + open.len()..];
    if !rest.starts_with(|c: char| c.is_whitespace() || c == '>' || c == '/') {
        return None;
    }
    let head = &rest[..rest.find('>')?];
    let key = format!("{attr}=\"");
    let value_start = head.find(&key)? + key.len();
    let value_len = head[value_start..].find('"')?;
    Some(xml_unescape(&head[value_start..value_start + value_len]))
}

fn aids_in(block: &str) -> Vec<AgentIdentifier> {
    inner_blocks(block, "agent-identifier")
        .into_iter()
        .map(|inner| {
            let mut aid = AgentIdentifier::new(text_of(inner, "name").unwrap_or_default());
            if let Some(addresses) = first_block(inner, "addresses") {
                for url in inner_blocks(addresses, "url") {
                    let url = url.trim();
                    if !url.is_empty() {
                        aid.addresses.push(xml_unescape(url));
                    }
                }
            }
            aid
        })
        .collect()
}

fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

fn xml_unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(idx) = rest.find('&') {
        out.push_str(&rest[..idx]);
        rest = &rest[idx..];
        let (replacement, consumed) = if rest.starts_with("&amp;") {
            ("&", 5)
        } else if rest.starts_with("&lt;") {
            ("<", 4)
        } else if rest.starts_with("&gt;") {
            (">", 4)
        } else if rest.starts_with("&quot;") {
            ("\"", 6)
        } else if rest.starts_with("&apos;") {
            ("'", 6)
        } else {
            ("&", 1)
        };
        out.push_str(replacement);
        rest = &rest[consumed..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_envelope() -> Envelope {
        let from = AgentIdentifier::new("ping@local:7777/acc").with_address("http://10.0.0.1:7777/acc");
        let to = vec![
            AgentIdentifier::new("df@remote:7778/acc").with_address("http://10.0.0.2:7778/acc"),
            AgentIdentifier::new("log@remote:7778/acc"),
        ];
        let mut env = Envelope::new(from, to).with_payload_length(128);
        env.date = Utc.with_ymd_and_hms(2026, 8, 25, 10, 15, 30).unwrap();
        env
    }

    #[test]
    fn test_xml_round_trip() {
        let env = sample_envelope();
        let decoded = Envelope::from_xml(&env.to_xml()).unwrap();

        assert_eq!(decoded.from.name, "ping@local:7777/acc");
        assert_eq!(decoded.from.addresses, vec!["http://10.0.0.1:7777/acc"]);
        assert_eq!(decoded.to.len(), 2);
        assert_eq!(decoded.to[0].name, "df@remote:7778/acc");
        assert_eq!(decoded.to[0].addresses, vec!["http://10.0.0.2:7778/acc"]);
        assert_eq!(decoded.to[1].addresses, Vec::<String>::new());
        assert_eq!(decoded.date, env.date);
        assert_eq!(decoded.payload_length, Some(128));
        assert_eq!(decoded.acl_representation, ACL_STRING_REPRESENTATION);
        assert_eq!(decoded.intended_receiver.len(), 2);
    }

    #[test]
    fn test_date_format() {
        let date = Utc.with_ymd_and_hms(2026, 8, 25, 10, 15, 30).unwrap();
        assert_eq!(format_envelope_date(&date), "20260825Z101530000");
        assert_eq!(parse_envelope_date("20260825Z101530000"), Some(date));
        assert_eq!(parse_envelope_date("20260825Z101530"), Some(date));
        // microsecond emitters keep the sub-second part
        let micro = parse_envelope_date("20260825Z101530000123").unwrap();
        assert_eq!(micro.timestamp(), date.timestamp());
        assert_eq!(micro.timestamp_subsec_micros(), 123);
        assert_eq!(parse_envelope_date("not-a-date"), None);
    }

    #[test]
    fn test_lenient_parse_of_foreign_envelope() {
        let xml = r#"<?xml version="1.0"?>
<envelope>
  <params index="1">
    <to><agent-identifier><name>echo@platform:1099/JADE</name>
      <addresses><url>http://host:7778/acc</url></addresses>
    </agent-identifier></to>
    <from><agent-identifier><name>df@platform:1099/JADE</name></agent-identifier></from>
    <acl-representation>fipa.acl.rep.string.std</acl-representation>
    <payload-length>42</payload-length>
    <date>20260825Z101530123</date>
    <encrypted>false</encrypted>
    <received>
      <received-by value="http://host:7778/acc"/>
      <received-id value="abc-123"/>
    </received>
  </params>
</envelope>"#;

        let env = Envelope::from_xml(xml).unwrap();
        assert_eq!(env.to[0].name, "echo@platform:1099/JADE");
        assert_eq!(env.to[0].addresses, vec!["http://host:7778/acc"]);
        assert_eq!(env.from.name, "df@platform:1099/JADE");
        assert_eq!(env.payload_length, Some(42));
        let stamp = env.received.unwrap();
        assert_eq!(stamp.by, "http://host:7778/acc");
        assert_eq!(stamp.id.as_deref(), Some("abc-123"));
        assert_eq!(stamp.date, None);
    }

    #[test]
    fn test_missing_from_is_rejected() {
        let xml = r#"<envelope><params index="1">
            <to><agent-identifier><name>a</name></agent-identifier></to>
            <date>20260825Z101530000</date>
        </params></envelope>"#;
        let err = Envelope::from_xml(xml).unwrap_err();
        assert!(matches!(err, EnvelopeError::MissingField("from")));
    }

    #[test]
    fn test_escaping_round_trips() {
        let from = AgentIdentifier::new("a&b<c>@p").with_address("http://h/acc?x=\"1\"");
        let mut env = Envelope::new(from, vec![AgentIdentifier::new("peer@p")]);
        env.date = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();

        let decoded = Envelope::from_xml(&env.to_xml()).unwrap();
        assert_eq!(decoded.from.name, "a&b<c>@p");
        assert_eq!(decoded.from.addresses, vec!["http://h/acc?x=\"1\""]);
    }
}
