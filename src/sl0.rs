// sl0.rs - SL0 Agent-Management Content
//
//! Builders and projections for the SL0 subset used by directory
//! facilitator (DF) interactions in the FIPA-Agent-Management ontology.
//!
//! Outbound content is rendered as a content-element list, the
//! double-parenthesized form JADE expects:
//!
//! ```text
//! ((action <df-aid> (register <df-agent-description>)))
//! ((action <df-aid> (search <df-agent-description> (search-constraints :max-results N))))
//! ```
//!
//! Inbound projections are lenient the way DF peers require: `set` and
//! `sequence` heads are optional, unknown slots are skipped, and atoms may
//! arrive bare or quoted.

use serde::{Deserialize, Serialize};

use crate::codec::acl_text::{aid_from_sexpr, push_aid, push_atom};
use crate::codec::sexpr::{collection_items, keyword_of};
use crate::codec::SExpr;
use crate::message::AgentIdentifier;

/// One service offered by an agent, `(service-description ...)`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescription {
    pub name: Option<String>,
    pub service_type: Option<String>,
    pub languages: Vec<String>,
    pub ontologies: Vec<String>,
    pub protocols: Vec<String>,
    /// Arbitrary DF properties as (name, value) pairs
    pub properties: Vec<(String, String)>,
}

impl ServiceDescription {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_type(mut self, service_type: impl Into<String>) -> Self {
        self.service_type = Some(service_type.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.languages.push(language.into());
        self
    }

    pub fn with_ontology(mut self, ontology: impl Into<String>) -> Self {
        self.ontologies.push(ontology.into());
        self
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.push((name.into(), value.into()));
        self
    }
}

/// A DF registration entry or search template, `(df-agent-description ...)`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DfAgentDescription {
    pub name: Option<AgentIdentifier>,
    pub languages: Vec<String>,
    pub ontologies: Vec<String>,
    pub protocols: Vec<String>,
    pub ownership: Vec<String>,
    pub services: Vec<ServiceDescription>,
}

impl DfAgentDescription {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, aid: AgentIdentifier) -> Self {
        self.name = Some(aid);
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.languages.push(language.into());
        self
    }

    pub fn with_ontology(mut self, ontology: impl Into<String>) -> Self {
        self.ontologies.push(ontology.into());
        self
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    pub fn with_ownership(mut self, owner: impl Into<String>) -> Self {
        self.ownership.push(owner.into());
        self
    }

    pub fn with_service(mut self, service: ServiceDescription) -> Self {
        self.services.push(service);
        self
    }
}

/// Bounds on a DF search; JADE requires the constraints slot, with
/// `-1` meaning unbounded
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchConstraints {
    pub max_results: Option<i64>,
}

impl SearchConstraints {
    pub fn with_max_results(max_results: i64) -> Self {
        Self {
            max_results: Some(max_results),
        }
    }
}

// ------------------------------------------------------------------ //
// content builders
// ------------------------------------------------------------------ //

pub fn register_content(df: &AgentIdentifier, description: &DfAgentDescription) -> String {
    action_content(df, "register", description, None)
}

pub fn deregister_content(df: &AgentIdentifier, description: &DfAgentDescription) -> String {
    action_content(df, "deregister", description, None)
}

pub fn modify_content(df: &AgentIdentifier, description: &DfAgentDescription) -> String {
    action_content(df, "modify", description, None)
}

pub fn search_content(
    df: &AgentIdentifier,
    template: &DfAgentDescription,
    constraints: &SearchConstraints,
) -> String {
    action_content(df, "search", template, Some(constraints))
}

fn action_content(
    df: &AgentIdentifier,
    verb: &str,
    description: &DfAgentDescription,
    constraints: Option<&SearchConstraints>,
) -> String {
    let mut out = String::new();
    out.push_str("((action ");
    push_aid(&mut out, df);
    out.push_str(" (");
    out.push_str(verb);
    out.push(' ');
    push_df_agent_description(&mut out, description);
    if let Some(constraints) = constraints {
        let max_results = constraints.max_results.unwrap_or(-1);
        out.push_str(&format!(" (search-constraints :max-results {max_results})"));
    }
    out.push_str(")))");
    out
}

fn push_df_agent_description(out: &mut String, dfad: &DfAgentDescription) {
    out.push_str("(df-agent-description");
    if let Some(name) = &dfad.name {
        out.push_str(" :name ");
        push_aid(out, name);
    }
    push_string_set(out, "languages", &dfad.languages);
    push_string_set(out, "ontologies", &dfad.ontologies);
    push_string_set(out, "protocols", &dfad.protocols);
    push_string_set(out, "ownership", &dfad.ownership);
    if !dfad.services.is_empty() {
        out.push_str(" :services (set");
        for service in &dfad.services {
            out.push(' ');
            push_service_description(out, service);
        }
        out.push(')');
    }
    out.push(')');
}

fn push_service_description(out: &mut String, sd: &ServiceDescription) {
    out.push_str("(service-description");
    if let Some(name) = &sd.name {
        out.push_str(" :name ");
        push_atom(out, name);
    }
    if let Some(service_type) = &sd.service_type {
        out.push_str(" :type ");
        push_atom(out, service_type);
    }
    push_string_set(out, "languages", &sd.languages);
    push_string_set(out, "ontologies", &sd.ontologies);
    push_string_set(out, "protocols", &sd.protocols);
    if !sd.properties.is_empty() {
        out.push_str(" :properties (set");
        for (name, value) in &sd.properties {
            out.push_str(" (property :name ");
            push_atom(out, name);
            out.push_str(" :value ");
            push_atom(out, value);
            out.push(')');
        }
        out.push(')');
    }
    out.push(')');
}

fn push_string_set(out: &mut String, slot: &str, values: &[String]) {
    if values.is_empty() {
        return;
    }
    out.push_str(" :");
    out.push_str(slot);
    out.push_str(" (set");
    for value in values {
        out.push(' ');
        push_atom(out, value);
    }
    out.push(')');
}

// ------------------------------------------------------------------ //
// projections
// ------------------------------------------------------------------ //

/// Project a `(df-agent-description ...)` node; `None` when the head
/// does not match
pub(crate) fn df_agent_description_from_sexpr(node: &SExpr) -> Option<DfAgentDescription> {
    let items = headed_items(node, "df-agent-description")?;
    let mut dfad = DfAgentDescription::new();
    let mut iter = items.iter();
    while let Some(key_node) = iter.next() {
        let Some(key) = keyword_of(key_node) else {
            continue;
        };
        let Some(value) = iter.next() else {
            break;
        };
        match key.to_ascii_lowercase().as_str() {
            "name" => dfad.name = aid_from_sexpr(value, 0).ok(),
            "languages" => dfad.languages = string_items(value),
            "ontologies" => dfad.ontologies = string_items(value),
            "protocols" => dfad.protocols = string_items(value),
            "ownership" => dfad.ownership = string_items(value),
            "services" => dfad.services = service_items(value),
            _ => {}
        }
    }
    Some(dfad)
}

/// Project a `(service-description ...)` node; `None` when the head
/// does not match
pub(crate) fn service_description_from_sexpr(node: &SExpr) -> Option<ServiceDescription> {
    let items = headed_items(node, "service-description")?;
    let mut sd = ServiceDescription::new();
    let mut iter = items.iter();
    while let Some(key_node) = iter.next() {
        let Some(key) = keyword_of(key_node) else {
            continue;
        };
        let Some(value) = iter.next() else {
            break;
        };
        match key.to_ascii_lowercase().as_str() {
            "name" => sd.name = value.atom_text(),
            "type" => sd.service_type = value.atom_text(),
            "languages" => sd.languages = string_items(value),
            "ontologies" => sd.ontologies = string_items(value),
            "protocols" => sd.protocols = string_items(value),
            "properties" => sd.properties = property_items(value),
            _ => {}
        }
    }
    Some(sd)
}

fn headed_items<'a>(node: &'a SExpr, head: &str) -> Option<&'a [SExpr]> {
    match (node.as_list(), node.head()) {
        (Some(items), Some(h)) if h.eq_ignore_ascii_case(head) => Some(&items[1..]),
        _ => None,
    }
}

fn string_items(node: &SExpr) -> Vec<String> {
    collection_items(node)
        .into_iter()
        .filter_map(SExpr::atom_text)
        .collect()
}

/// A services slot is normally `(set (service-description ...) ...)` but
/// some peers send a single bare description
fn service_items(node: &SExpr) -> Vec<ServiceDescription> {
    if let Some(service) = service_description_from_sexpr(node) {
        return vec![service];
    }
    collection_items(node)
        .into_iter()
        .filter_map(service_description_from_sexpr)
        .collect()
}

fn property_items(node: &SExpr) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for item in collection_items(node) {
        let Some(items) = headed_items(item, "property") else {
            continue;
        };
        let mut name = String::new();
        let mut value = String::new();
        let mut iter = items.iter();
        while let Some(key_node) = iter.next() {
            let Some(key) = keyword_of(key_node) else {
                continue;
            };
            let Some(val) = iter.next() else {
                break;
            };
            match key.to_ascii_lowercase().as_str() {
                "name" => name = val.atom_text().unwrap_or_default(),
                "value" => value = val.atom_text().unwrap_or_default(),
                _ => {}
            }
        }
        out.push((name, value));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::parse_sexpr;
    use crate::codec::sexpr::unwrap_singletons;

    fn df_aid() -> AgentIdentifier {
        AgentIdentifier::new("df@platform").with_address("http://platform:7778/acc")
    }

    #[test]
    fn test_register_content_shape() {
        let description = DfAgentDescription::new()
            .with_name(AgentIdentifier::new("me@platform").with_address("http://me:7778/acc"))
            .with_service(ServiceDescription::new().with_name("echo").with_type("utility"));

        assert_eq!(
            register_content(&df_aid(), &description),
            "((action \
             (agent-identifier :name df@platform :addresses (sequence http://platform:7778/acc)) \
             (register (df-agent-description \
             :name (agent-identifier :name me@platform :addresses (sequence http://me:7778/acc)) \
             :services (set (service-description :name echo :type utility))))))"
        );
    }

    #[test]
    fn test_search_content_defaults_to_unbounded() {
        let content = search_content(&df_aid(), &DfAgentDescription::new(), &SearchConstraints::default());
        assert!(content.starts_with("((action "));
        assert!(content.contains("(search (df-agent-description)"));
        assert!(content.ends_with("(search-constraints :max-results -1))))"));
    }

    #[test]
    fn test_search_content_with_limit() {
        let content = search_content(
            &df_aid(),
            &DfAgentDescription::new()
                .with_service(ServiceDescription::new().with_type("utility")),
            &SearchConstraints::with_max_results(10),
        );
        assert!(content.contains("(service-description :type utility)"));
        assert!(content.contains("(search-constraints :max-results 10)"));
    }

    #[test]
    fn test_df_agent_description_round_trip() {
        let description = DfAgentDescription::new()
            .with_name(AgentIdentifier::new("me@platform").with_address("http://me:7778/acc"))
            .with_language("fipa-sl0")
            .with_protocol("fipa-request")
            .with_ownership("lab")
            .with_service(
                ServiceDescription::new()
                    .with_name("weather report")
                    .with_type("info")
                    .with_ontology("Weather")
                    .with_property("region", "north"),
            );

        let content = register_content(&df_aid(), &description);
        let root = parse_sexpr(&content).unwrap();
        let action = unwrap_singletons(&root).as_list().unwrap();
        let register = action[2].as_list().unwrap();
        let parsed = df_agent_description_from_sexpr(&register[1]).unwrap();

        assert_eq!(parsed, description);
        assert_eq!(
            parsed.name.as_ref().unwrap().addresses,
            vec!["http://me:7778/acc"]
        );
    }

    #[test]
    fn test_service_description_projection_skips_unknown_slots() {
        let node = parse_sexpr(
            "(service-description :name \"echo\" :type utility :x-load 3 :protocols (set fipa-request))",
        )
        .unwrap();
        let sd = service_description_from_sexpr(&node).unwrap();
        assert_eq!(sd.name.as_deref(), Some("echo"));
        assert_eq!(sd.service_type.as_deref(), Some("utility"));
        assert_eq!(sd.protocols, vec!["fipa-request"]);
        assert!(sd.properties.is_empty());
    }

    #[test]
    fn test_sets_without_head_symbol() {
        let node = parse_sexpr(
            "(df-agent-description :name agent1 :languages (fipa-sl0 fipa-sl1) :ownership lab)",
        )
        .unwrap();
        let dfad = df_agent_description_from_sexpr(&node).unwrap();
        assert_eq!(dfad.name.as_ref().unwrap().name, "agent1");
        assert_eq!(dfad.languages, vec!["fipa-sl0", "fipa-sl1"]);
        assert_eq!(dfad.ownership, vec!["lab"]);
    }

    #[test]
    fn test_bare_service_where_set_expected() {
        let node = parse_sexpr(
            "(df-agent-description :name agent1 :services (service-description :type utility))",
        )
        .unwrap();
        let dfad = df_agent_description_from_sexpr(&node).unwrap();
        assert_eq!(dfad.services.len(), 1);
        assert_eq!(dfad.services[0].service_type.as_deref(), Some("utility"));
    }

    #[test]
    fn test_properties_projection() {
        let node = parse_sexpr(
            "(service-description :properties (set (property :name cost :value 3) (property :name tier :value \"gold plan\")))",
        )
        .unwrap();
        let sd = service_description_from_sexpr(&node).unwrap();
        assert_eq!(
            sd.properties,
            vec![
                ("cost".to_string(), "3".to_string()),
                ("tier".to_string(), "gold plan".to_string()),
            ]
        );
    }

    #[test]
    fn test_wrong_head_is_rejected() {
        let node = parse_sexpr("(agent-identifier :name a)").unwrap();
        assert!(df_agent_description_from_sexpr(&node).is_none());
        assert!(service_description_from_sexpr(&node).is_none());
    }
}
