// codec/acl_text.rs - ACL String Codec
//
//! Parser and serializer for the FIPA ACL string representation,
//! `(performative :slot value ...)`.
//!
//! Parsing is tolerant about what peers put into slot values: bare words
//! or quoted strings, `(set ...)` wrappers or lone AIDs, several reply-by
//! date shapes. Serialization is deterministic: a fixed slot order,
//! quoted strings for text-valued slots, and `content` embedded verbatim
//! when it already is one balanced parenthesized expression (the
//! conventional way nested ACL/SL content travels between platforms).
//!
//! The two directions form a round trip: `parse(dumps(m))` returns a
//! message field-equal to `m` for any message built from representable
//! values.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use super::sexpr::{
    collection_items, is_balanced_list, keyword_of, needs_quoting, SExpr, SexprParser,
};
use super::ParseError;
use crate::message::{AclMessage, AgentIdentifier, Performative};

/// Parse the ACL string representation into a message
pub fn parse(input: &str) -> Result<AclMessage, ParseError> {
    let mut p = SexprParser::new(input);
    p.skip_whitespace();
    p.expect_char('(')?;
    p.skip_whitespace();

    if p.peek_char() == ')' {
        return Err(ParseError::Syntax {
            position: p.pos,
            message: "missing performative".to_string(),
        });
    }
    let at = p.pos;
    let performative = match p.parse_node()? {
        SExpr::Symbol(word) if !word.starts_with(':') => Performative::from_text(&word),
        _ => {
            return Err(ParseError::Syntax {
                position: at,
                message: "expected performative".to_string(),
            });
        }
    };

    let mut msg = AclMessage::new(performative);

    loop {
        p.skip_whitespace();
        if p.at_end() {
            return Err(ParseError::UnexpectedEnd {
                position: p.pos,
                message: "unterminated message".to_string(),
            });
        }
        if p.peek_char() == ')' {
            p.next_char();
            break;
        }

        let key_at = p.pos;
        let key = match p.parse_node()? {
            SExpr::Symbol(word) if word.len() > 1 && word.starts_with(':') => {
                word[1..].to_string()
            }
            _ => {
                return Err(ParseError::Syntax {
                    position: key_at,
                    message: "expected slot keyword".to_string(),
                });
            }
        };

        p.skip_whitespace();
        let value_at = p.pos;
        match key.to_ascii_lowercase().as_str() {
            "sender" => {
                let node = p.parse_node()?;
                msg.sender = Some(aid_from_sexpr(&node, value_at)?);
            }
            "receiver" => {
                let node = p.parse_node()?;
                msg.receivers = aid_set_from_sexpr(&node, value_at)?;
            }
            "reply-to" => {
                let node = p.parse_node()?;
                msg.reply_to = aid_set_from_sexpr(&node, value_at)?;
            }
            "content" => msg.content = Some(parse_opaque_value(&mut p)?),
            "language" => msg.language = Some(parse_text_value(&mut p, "language")?),
            "encoding" => msg.encoding = Some(parse_text_value(&mut p, "encoding")?),
            "ontology" => msg.ontology = Some(parse_text_value(&mut p, "ontology")?),
            "protocol" => msg.protocol = Some(parse_text_value(&mut p, "protocol")?),
            "conversation-id" => {
                msg.conversation_id = Some(parse_text_value(&mut p, "conversation-id")?)
            }
            "reply-with" => msg.reply_with = Some(parse_text_value(&mut p, "reply-with")?),
            "in-reply-to" => msg.in_reply_to = Some(parse_text_value(&mut p, "in-reply-to")?),
            "reply-by" => {
                // Lenient: a deadline we cannot read is treated as unset
                // rather than failing the whole message.
                let raw = parse_text_value(&mut p, "reply-by")?;
                msg.reply_by = parse_reply_by(&raw);
            }
            _ => {
                let value = parse_opaque_value(&mut p)?;
                msg.user_params.insert(key, value);
            }
        }
    }

    p.skip_whitespace();
    if !p.at_end() {
        return Err(ParseError::Syntax {
            position: p.pos,
            message: "trailing characters after message".to_string(),
        });
    }
    Ok(msg)
}

/// Serialize a message to the ACL string representation.
///
/// Slot order is fixed: sender, receiver, content, reply-with,
/// in-reply-to, reply-to, language, encoding, ontology, protocol,
/// conversation-id, reply-by, then user parameters sorted by key. Unset
/// slots are omitted.
pub fn dumps(msg: &AclMessage) -> String {
    let mut out = String::new();
    out.push('(');
    out.push_str(msg.performative.as_str());

    if let Some(sender) = &msg.sender {
        out.push_str(" :sender ");
        push_aid(&mut out, sender);
    }
    if !msg.receivers.is_empty() {
        out.push_str(" :receiver ");
        push_aid_set(&mut out, &msg.receivers);
    }
    if let Some(content) = &msg.content {
        out.push_str(" :content ");
        if is_balanced_list(content) {
            out.push_str(content);
        } else {
            push_quoted(&mut out, content);
        }
    }
    if let Some(reply_with) = &msg.reply_with {
        out.push_str(" :reply-with ");
        push_quoted(&mut out, reply_with);
    }
    if let Some(in_reply_to) = &msg.in_reply_to {
        out.push_str(" :in-reply-to ");
        push_quoted(&mut out, in_reply_to);
    }
    if !msg.reply_to.is_empty() {
        out.push_str(" :reply-to ");
        push_aid_set(&mut out, &msg.reply_to);
    }
    for (slot, value) in [
        ("language", &msg.language),
        ("encoding", &msg.encoding),
        ("ontology", &msg.ontology),
        ("protocol", &msg.protocol),
        ("conversation-id", &msg.conversation_id),
    ] {
        if let Some(value) = value {
            out.push_str(" :");
            out.push_str(slot);
            out.push(' ');
            push_quoted(&mut out, value);
        }
    }
    if let Some(reply_by) = &msg.reply_by {
        out.push_str(" :reply-by ");
        out.push_str(&format_reply_by(reply_by));
    }
    for (key, value) in &msg.user_params {
        out.push_str(" :");
        out.push_str(key);
        out.push(' ');
        push_quoted(&mut out, value);
    }
    out.push(')');
    out
}

/// Render a reply-by deadline, `YYYYMMDD T HHMMSS` plus millis
pub(crate) fn format_reply_by(date: &DateTime<Utc>) -> String {
    date.format("%Y%m%dT%H%M%S%3f").to_string()
}

fn parse_reply_by(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim().trim_end_matches(['Z', 'z']);
    for format in [
        "%Y%m%dT%H%M%S%3f",
        "%Y%m%dT%H%M%S",
        "%Y%m%dZ%H%M%S%3f",
        "%Y%m%dZ%H%M%S",
        "%Y-%m-%dT%H:%M:%S",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    // bare date, midnight
    if let Ok(day) = NaiveDate::parse_from_str(raw, "%Y%m%d") {
        return day.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    None
}

/// Capture a slot value as text without interpreting it: a quoted string
/// is unescaped, anything else is the verbatim source span of the value.
fn parse_opaque_value(p: &mut SexprParser<'_>) -> Result<String, ParseError> {
    p.skip_whitespace();
    let start = p.pos;
    if p.peek_char() == '"' {
        p.parse_string()
    } else {
        p.parse_node()?;
        Ok(p.input[start..p.pos].to_string())
    }
}

fn parse_text_value(p: &mut SexprParser<'_>, slot: &str) -> Result<String, ParseError> {
    p.skip_whitespace();
    let at = p.pos;
    match p.parse_node()? {
        SExpr::Str(s) | SExpr::Symbol(s) => Ok(s),
        SExpr::Int(i) => Ok(i.to_string()),
        SExpr::Float(x) => Ok(format!("{x:?}")),
        SExpr::List(_) => Err(ParseError::Syntax {
            position: at,
            message: format!("expected atom for :{slot}"),
        }),
    }
}

/// Project an AST node into an AID.
///
/// Accepts the full `(agent-identifier :name .. :addresses (sequence ..))`
/// form, a lone atom naming the agent, and skips unknown slots. `at` is
/// the source offset of the node, used for error positions.
pub(crate) fn aid_from_sexpr(node: &SExpr, at: usize) -> Result<AgentIdentifier, ParseError> {
    if let Some(text) = node.atom_text() {
        return Ok(AgentIdentifier::new(text));
    }
    let items = match (node.as_list(), node.head()) {
        (Some(items), Some(head)) if head.eq_ignore_ascii_case("agent-identifier") => &items[1..],
        _ => {
            return Err(ParseError::Syntax {
                position: at,
                message: "expected agent-identifier".to_string(),
            });
        }
    };

    let mut name = None;
    let mut addresses = Vec::new();
    let mut resolvers = Vec::new();
    let mut iter = items.iter();
    while let Some(key_node) = iter.next() {
        let Some(key) = keyword_of(key_node) else {
            continue;
        };
        let Some(value) = iter.next() else {
            break;
        };
        match key {
            "name" => name = value.atom_text(),
            "addresses" => {
                addresses = collection_items(value)
                    .into_iter()
                    .filter_map(SExpr::atom_text)
                    .collect();
            }
            "resolvers" => {
                resolvers = collection_items(value)
                    .into_iter()
                    .filter_map(|item| aid_from_sexpr(item, at).ok())
                    .collect();
            }
            _ => {}
        }
    }

    let name = name.ok_or_else(|| ParseError::Syntax {
        position: at,
        message: "agent-identifier without :name".to_string(),
    })?;
    Ok(AgentIdentifier {
        name,
        addresses,
        resolvers,
    })
}

fn aid_set_from_sexpr(node: &SExpr, at: usize) -> Result<Vec<AgentIdentifier>, ParseError> {
    if let (Some(items), Some(head)) = (node.as_list(), node.head()) {
        if head.eq_ignore_ascii_case("set") {
            return items[1..]
                .iter()
                .map(|item| aid_from_sexpr(item, at))
                .collect();
        }
    }
    Ok(vec![aid_from_sexpr(node, at)?])
}

/// Render an AID in canonical form; the address sequence is always
/// present, resolvers only when non-empty
pub(crate) fn push_aid(out: &mut String, aid: &AgentIdentifier) {
    out.push_str("(agent-identifier :name ");
    push_atom(out, &aid.name);
    out.push_str(" :addresses (sequence");
    for url in &aid.addresses {
        out.push(' ');
        push_atom(out, url);
    }
    out.push(')');
    if !aid.resolvers.is_empty() {
        out.push_str(" :resolvers (sequence");
        for resolver in &aid.resolvers {
            out.push(' ');
            push_aid(out, resolver);
        }
        out.push(')');
    }
    out.push(')');
}

fn push_aid_set(out: &mut String, aids: &[AgentIdentifier]) {
    out.push_str("(set");
    for aid in aids {
        out.push(' ');
        push_aid(out, aid);
    }
    out.push(')');
}

/// Emit as a bare word when safe, quoted otherwise
pub(crate) fn push_atom(out: &mut String, text: &str) {
    if needs_quoting(text) {
        push_quoted(out, text);
    } else {
        out.push_str(text);
    }
}

pub(crate) fn push_quoted(out: &mut String, text: &str) {
    out.push('"');
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            _ => out.push(ch),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    #[test]
    fn test_parse_platform_style_request() {
        let input = "(REQUEST\n \
            :sender (agent-identifier :name client@lap:1099/JADE :addresses (sequence http://lap:7778/acc))\n \
            :receiver (set (agent-identifier :name df@lap:1099/JADE :addresses (sequence http://lap:7778/acc)))\n \
            :content \"((action x))\"\n \
            :language fipa-sl0 :ontology FIPA-Agent-Management :protocol fipa-request\n \
            :conversation-id client@lap-00ff :reply-with client@lap-00ff.req)";

        let msg = parse(input).unwrap();
        assert_eq!(msg.performative, Performative::Request);
        assert_eq!(msg.sender.as_ref().unwrap().name, "client@lap:1099/JADE");
        assert_eq!(
            msg.sender.as_ref().unwrap().addresses,
            vec!["http://lap:7778/acc"]
        );
        assert_eq!(msg.receivers.len(), 1);
        assert_eq!(msg.receivers[0].name, "df@lap:1099/JADE");
        assert_eq!(msg.content.as_deref(), Some("((action x))"));
        assert_eq!(msg.language.as_deref(), Some("fipa-sl0"));
        assert_eq!(msg.ontology.as_deref(), Some("FIPA-Agent-Management"));
        assert_eq!(msg.conversation_id.as_deref(), Some("client@lap-00ff"));
        assert_eq!(msg.reply_with.as_deref(), Some("client@lap-00ff.req"));
    }

    #[test]
    fn test_unterminated_message_fails() {
        let err = parse("(inform :content").unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedEnd { .. }));
    }

    #[test]
    fn test_empty_list_is_not_a_message() {
        let err = parse("()").unwrap_err();
        assert!(matches!(err, ParseError::Syntax { .. }));
    }

    #[test]
    fn test_lone_receiver_without_set() {
        let msg = parse("(inform :receiver (agent-identifier :name a@p :addresses (sequence)))")
            .unwrap();
        assert_eq!(msg.receivers.len(), 1);
        assert_eq!(msg.receivers[0].name, "a@p");
    }

    #[test]
    fn test_unknown_slots_become_user_params() {
        let msg = parse("(inform :x-custom 42 :X-Envelope-Id abc :content \"hi\")").unwrap();
        assert_eq!(msg.user_params.get("x-custom").map(String::as_str), Some("42"));
        assert_eq!(
            msg.user_params.get("X-Envelope-Id").map(String::as_str),
            Some("abc")
        );
        assert_eq!(msg.content.as_deref(), Some("hi"));
    }

    #[test]
    fn test_content_span_is_verbatim() {
        let msg = parse("(inform :content (result  (action x)\n (set)))").unwrap();
        assert_eq!(msg.content.as_deref(), Some("(result  (action x)\n (set))"));
    }

    #[test]
    fn test_reply_by_formats() {
        for raw in [
            "20260825T101530123",
            "20260825T101530",
            "\"2026-08-25T10:15:30\"",
            "20260825T101530Z",
        ] {
            let msg = parse(&format!("(inform :reply-by {raw})")).unwrap();
            let deadline = msg.reply_by.expect(raw);
            assert_eq!(
                deadline.date_naive(),
                Utc.with_ymd_and_hms(2026, 8, 25, 10, 15, 30).unwrap().date_naive()
            );
        }
        // bare date reads as midnight
        let msg = parse("(inform :reply-by 20260825)").unwrap();
        assert_eq!(
            msg.reply_by,
            Some(Utc.with_ymd_and_hms(2026, 8, 25, 0, 0, 0).unwrap())
        );
        // unreadable deadline is dropped, not fatal
        let msg = parse("(inform :reply-by soon)").unwrap();
        assert_eq!(msg.reply_by, None);
    }

    #[test]
    fn test_dumps_slot_order() {
        let msg = AclMessage::new(Performative::Request)
            .with_sender(AgentIdentifier::new("a@p").with_address("http://a/acc"))
            .with_receiver(AgentIdentifier::new("b@p"))
            .with_content("((action x))")
            .with_reply_with("rw-1")
            .with_language("fipa-sl0")
            .with_protocol("fipa-request")
            .with_conversation_id("c-1")
            .with_user_param("x-a", "1")
            .with_user_param("x-b", "2");

        assert_eq!(
            dumps(&msg),
            "(REQUEST \
             :sender (agent-identifier :name a@p :addresses (sequence http://a/acc)) \
             :receiver (set (agent-identifier :name b@p :addresses (sequence))) \
             :content ((action x)) \
             :reply-with \"rw-1\" \
             :language \"fipa-sl0\" \
             :protocol \"fipa-request\" \
             :conversation-id \"c-1\" \
             :x-a \"1\" \
             :x-b \"2\")"
        );
    }

    #[test]
    fn test_unbalanced_content_is_quoted() {
        let msg = AclMessage::new(Performative::Inform).with_content("half (open");
        let text = dumps(&msg);
        assert!(text.contains(":content \"half (open\""));
        assert_eq!(parse(&text).unwrap().content.as_deref(), Some("half (open"));
    }

    #[test]
    fn test_round_trip_field_equality() {
        let resolver = AgentIdentifier::new("resolver@p").with_address("http://r/acc");
        let msg = AclMessage::new(Performative::Custom("X-SYNC".to_string()))
            .with_sender(
                AgentIdentifier::new("007agent")
                    .with_address("http://s/acc")
                    .with_resolver(resolver),
            )
            .with_receiver(AgentIdentifier::new("b@p").with_address("http://b1/acc"))
            .with_receiver(AgentIdentifier::new("c d e").with_address("http://b2/acc"))
            .with_reply_to(AgentIdentifier::new("mailbox@p"))
            .with_content("plain text with \"quotes\" and \\ slashes")
            .with_language("fipa-sl0")
            .with_encoding("US-ASCII")
            .with_ontology("Weather")
            .with_protocol("fipa-request")
            .with_conversation_id("007agent-aa11")
            .with_reply_with("007agent-aa11.req")
            .with_in_reply_to("prev.req")
            .with_reply_by(Utc.with_ymd_and_hms(2026, 8, 25, 10, 15, 30).unwrap())
            .with_user_param("x-hop", "3");

        let parsed = parse(&dumps(&msg)).unwrap();
        assert_eq!(parsed, msg);
        // AID equality is by name; check the rest of the identifiers too
        let sender = parsed.sender.as_ref().unwrap();
        assert_eq!(sender.addresses, vec!["http://s/acc"]);
        assert_eq!(sender.resolvers.len(), 1);
        assert_eq!(sender.resolvers[0].addresses, vec!["http://r/acc"]);
        assert_eq!(parsed.receivers[1].addresses, vec!["http://b2/acc"]);
    }

    // -- property: parse(dumps(m)) == m ---------------------------------- //

    fn arb_word() -> impl Strategy<Value = String> {
        "[a-zA-Z_][a-zA-Z0-9@:/._-]{0,16}"
    }

    fn arb_text() -> impl Strategy<Value = String> {
        // printable ascii, covering quotes, backslashes and parens
        "[ -~]{0,32}"
    }

    fn arb_aid() -> impl Strategy<Value = AgentIdentifier> {
        (arb_word(), prop::collection::vec(arb_text(), 0..3)).prop_map(|(name, addresses)| {
            AgentIdentifier {
                name,
                addresses,
                resolvers: Vec::new(),
            }
        })
    }

    fn arb_performative() -> impl Strategy<Value = Performative> {
        prop_oneof![
            Just(Performative::Inform),
            Just(Performative::Request),
            Just(Performative::Agree),
            Just(Performative::Failure),
            "X-[A-Z]{1,6}".prop_map(Performative::Custom),
        ]
    }

    fn arb_reply_by() -> impl Strategy<Value = DateTime<Utc>> {
        (0i64..4_000_000_000, 0u32..1000).prop_map(|(secs, millis)| {
            Utc.timestamp_opt(secs, millis * 1_000_000).unwrap()
        })
    }

    fn arb_content() -> impl Strategy<Value = String> {
        prop_oneof![
            arb_text(),
            Just("((action (agent-identifier :name df@p) (register (df-agent-description))))"
                .to_string()),
        ]
    }

    prop_compose! {
        fn arb_message()(
            performative in arb_performative(),
            sender in prop::option::of(arb_aid()),
            receivers in prop::collection::vec(arb_aid(), 0..3),
            reply_to in prop::collection::vec(arb_aid(), 0..2),
            content in prop::option::of(arb_content()),
            language in prop::option::of(arb_text()),
            ontology in prop::option::of(arb_text()),
            protocol in prop::option::of(arb_text()),
            conversation_id in prop::option::of(arb_text()),
            reply_with in prop::option::of(arb_text()),
            in_reply_to in prop::option::of(arb_text()),
            reply_by in prop::option::of(arb_reply_by()),
            user_params in prop::collection::btree_map("x-[a-z]{1,6}", arb_text(), 0..3),
        ) -> AclMessage {
            let mut msg = AclMessage::new(performative);
            msg.sender = sender;
            msg.receivers = receivers;
            msg.reply_to = reply_to;
            msg.content = content;
            msg.language = language;
            msg.ontology = ontology;
            msg.protocol = protocol;
            msg.conversation_id = conversation_id;
            msg.reply_with = reply_with;
            msg.in_reply_to = in_reply_to;
            msg.reply_by = reply_by;
            msg.user_params = user_params;
            msg
        }
    }

    fn all_addresses(msg: &AclMessage) -> Vec<&[String]> {
        msg.sender
            .iter()
            .chain(msg.receivers.iter())
            .chain(msg.reply_to.iter())
            .map(|aid| aid.addresses.as_slice())
            .collect()
    }

    proptest! {
        #[test]
        fn prop_parse_inverts_dumps(msg in arb_message()) {
            let text = dumps(&msg);
            let parsed = parse(&text).unwrap();
            prop_assert_eq!(&parsed, &msg, "text: {}", text);
            prop_assert_eq!(all_addresses(&parsed), all_addresses(&msg));
        }
    }
}
