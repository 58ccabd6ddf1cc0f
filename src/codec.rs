//! Identifier grammars.
//!
//! Scene node names double as domain identifiers and encode structure for
//! contacts (`RIALbyRIAR`), synapses (`URYVRundefinedRMDDR&IL1VR~A_pre`) and
//! cphate nodes (`ADAL_RIFL-i14/26-c8/45-s2178`). Every decoder here is pure
//! and returns a typed [`CodecError`] for malformed input. The only lenient
//! path is [`DecodePolicy::ZeroFill`] for cphate metadata, which replaces
//! malformed or missing counters with zero and logs what it dropped.

use thiserror::Error;

use crate::models::{SynapsePosition, SynapseType};

const CONTACT_MARKER: &str = "by";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("empty identifier")]
    Empty,
    #[error("contact '{0}' has no 'by' marker")]
    MissingContactMarker(String),
    #[error("contact '{0}' has more than one 'by' marker")]
    AmbiguousContactMarker(String),
    #[error("contact '{0}' has an empty side")]
    EmptyContactSide(String),
    #[error("synapse '{0}' has no type marker (chemical, electrical, undefined)")]
    MissingSynapseType(String),
    #[error("synapse '{0}' has no pre-synaptic neuron")]
    EmptyPreNeuron(String),
    #[error("synapse '{0}' has no post-synaptic neurons")]
    EmptyPostNeurons(String),
    #[error("cphate node '{0}' has no metadata segment")]
    MissingCphateMetadata(String),
    #[error("cphate node '{0}' lists no neurons")]
    EmptyNeuronList(String),
    #[error("'{name}': malformed integer in '{token}'")]
    MalformedInteger { name: String, token: String },
    #[error("cphate node '{name}': unknown metadata token '{token}'")]
    UnknownToken { name: String, token: String },
}

/// Whether malformed cphate counters abort the decode or become zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodePolicy {
    Strict,
    #[default]
    ZeroFill,
}

/// Neuron, nerve ring and scale names are used verbatim.
pub fn plain_uid(raw: &str) -> Result<&str, CodecError> {
    if raw.trim().is_empty() {
        return Err(CodecError::Empty);
    }
    Ok(raw)
}

// ── Contacts ────────────────────────────────────────────────────────────

/// The two neuron UIDs a contact joins.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContactSides {
    pub before: String,
    pub after: String,
}

impl ContactSides {
    /// Lenient decode: a name without a usable marker yields empty sides,
    /// which callers must treat as unresolved.
    pub fn from_uid(raw: &str) -> Self {
        parse_contact(raw).unwrap_or_default()
    }

    pub fn is_resolved(&self) -> bool {
        !self.before.is_empty() && !self.after.is_empty()
    }
}

pub fn parse_contact(raw: &str) -> Result<ContactSides, CodecError> {
    if raw.is_empty() {
        return Err(CodecError::Empty);
    }
    let (before, after) = raw
        .split_once(CONTACT_MARKER)
        .ok_or_else(|| CodecError::MissingContactMarker(raw.to_string()))?;
    if after.contains(CONTACT_MARKER) {
        return Err(CodecError::AmbiguousContactMarker(raw.to_string()));
    }
    if before.is_empty() || after.is_empty() {
        return Err(CodecError::EmptyContactSide(raw.to_string()));
    }
    Ok(ContactSides {
        before: before.to_string(),
        after: after.to_string(),
    })
}

// ── Synapses ────────────────────────────────────────────────────────────

/// Section/position/site triple from a descriptor such as `A_post4`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PositionDescriptor {
    pub section: Option<String>,
    pub position: Option<SynapsePosition>,
    pub site: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynapseName {
    pub synapse_type: SynapseType,
    pub pre: String,
    pub post: Vec<String>,
    pub descriptor: PositionDescriptor,
}

/// First type marker present in the name, checked in
/// [`SynapseType::MARKERS`] order.
pub fn synapse_type(raw: &str) -> Option<SynapseType> {
    SynapseType::MARKERS
        .into_iter()
        .find(|t| raw.contains(t.as_str()))
}

pub fn parse_synapse(raw: &str) -> Result<SynapseName, CodecError> {
    if raw.is_empty() {
        return Err(CodecError::Empty);
    }
    let synapse_type =
        synapse_type(raw).ok_or_else(|| CodecError::MissingSynapseType(raw.to_string()))?;

    let (pre, rest) = raw
        .split_once(synapse_type.as_str())
        .ok_or_else(|| CodecError::MissingSynapseType(raw.to_string()))?;
    if pre.is_empty() {
        return Err(CodecError::EmptyPreNeuron(raw.to_string()));
    }

    let (neuron_list, descriptor) = match rest.split_once('~') {
        Some((list, desc)) => (list, parse_position(raw, desc)?),
        None => (rest, PositionDescriptor::default()),
    };

    let post: Vec<String> = neuron_list
        .split('&')
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect();
    if post.is_empty() {
        return Err(CodecError::EmptyPostNeurons(raw.to_string()));
    }

    Ok(SynapseName {
        synapse_type,
        pre: pre.to_string(),
        post,
        descriptor,
    })
}

/// Decode a position descriptor. `name` is only used for error context.
pub fn parse_position(name: &str, descriptor: &str) -> Result<PositionDescriptor, CodecError> {
    let section = descriptor
        .split_once('_')
        .map(|(s, _)| s.to_uppercase())
        .filter(|s| !s.is_empty());

    let digits_start = descriptor
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i);
    let site = match digits_start {
        Some(i) => descriptor[i..]
            .parse::<u32>()
            .map_err(|_| CodecError::MalformedInteger {
                name: name.to_string(),
                token: descriptor.to_string(),
            })?,
        None => 0,
    };

    let position = if descriptor.contains("pre") {
        Some(SynapsePosition::Pre)
    } else if descriptor.contains("post") {
        Some(SynapsePosition::Post)
    } else {
        None
    };

    Ok(PositionDescriptor {
        section,
        position,
        site,
    })
}

// ── Cphate nodes ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CphateNodeName {
    pub neurons: Vec<String>,
    pub iteration: u32,
    pub iteration_count: u32,
    pub cluster: u32,
    pub cluster_count: u32,
    pub serial: u32,
}

pub fn parse_cphate_node(raw: &str, policy: DecodePolicy) -> Result<CphateNodeName, CodecError> {
    if raw.is_empty() {
        return Err(CodecError::Empty);
    }
    let (neuron_list, metadata) = raw
        .split_once('-')
        .ok_or_else(|| CodecError::MissingCphateMetadata(raw.to_string()))?;

    let neurons: Vec<String> = neuron_list
        .split('_')
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect();
    if neurons.is_empty() {
        return Err(CodecError::EmptyNeuronList(raw.to_string()));
    }

    let mut node = CphateNodeName {
        neurons,
        ..Default::default()
    };

    for token in metadata.split('-') {
        let mut chars = token.chars();
        let prefix = chars.next();
        let body = chars.as_str();
        let decoded = match prefix {
            Some('i') => fraction(raw, token, body).map(|(n, d)| {
                node.iteration = n;
                node.iteration_count = d;
            }),
            Some('c') => fraction(raw, token, body).map(|(n, d)| {
                node.cluster = n;
                node.cluster_count = d;
            }),
            Some('s') => integer(raw, token, body).map(|n| node.serial = n),
            _ => Err(CodecError::UnknownToken {
                name: raw.to_string(),
                token: token.to_string(),
            }),
        };

        if let Err(err) = decoded {
            match policy {
                DecodePolicy::Strict => return Err(err),
                DecodePolicy::ZeroFill => {
                    tracing::warn!(node = raw, token, error = %err, "cphate token ignored");
                }
            }
        }
    }

    Ok(node)
}

fn integer(name: &str, token: &str, s: &str) -> Result<u32, CodecError> {
    s.parse::<u32>().map_err(|_| CodecError::MalformedInteger {
        name: name.to_string(),
        token: token.to_string(),
    })
}

/// `n` or `n/d`; a missing denominator is zero.
fn fraction(name: &str, token: &str, s: &str) -> Result<(u32, u32), CodecError> {
    match s.split_once('/') {
        Some((n, d)) => Ok((integer(name, token, n)?, integer(name, token, d)?)),
        None => Ok((integer(name, token, s)?, 0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contact_with_marker() {
        let sides = parse_contact("RIALbyRIAR").unwrap();
        assert_eq!(sides.before, "RIAL");
        assert_eq!(sides.after, "RIAR");
        assert!(sides.is_resolved());
    }

    #[test]
    fn contact_without_marker_has_empty_sides() {
        assert_eq!(
            parse_contact("RIALplusRIAR"),
            Err(CodecError::MissingContactMarker("RIALplusRIAR".into()))
        );
        let sides = ContactSides::from_uid("RIALplusRIAR");
        assert_eq!(sides.before, "");
        assert_eq!(sides.after, "");
        assert!(!sides.is_resolved());
    }

    #[test]
    fn contact_with_empty_or_repeated_side() {
        assert!(matches!(
            parse_contact("byRIAR"),
            Err(CodecError::EmptyContactSide(_))
        ));
        assert!(matches!(
            parse_contact("AbyBbyC"),
            Err(CodecError::AmbiguousContactMarker(_))
        ));
    }

    #[test]
    fn synapse_full_grammar() {
        let s = parse_synapse("URYVRundefinedRMDDR&IL1VR~A_pre").unwrap();
        assert_eq!(s.synapse_type, SynapseType::Undefined);
        assert_eq!(s.pre, "URYVR");
        assert_eq!(s.post, vec!["RMDDR".to_string(), "IL1VR".to_string()]);
        assert_eq!(s.descriptor.section.as_deref(), Some("A"));
        assert_eq!(s.descriptor.position, Some(SynapsePosition::Pre));
        assert_eq!(s.descriptor.site, 0);
    }

    #[test]
    fn synapse_without_descriptor() {
        let s = parse_synapse("ADALchemicalRIAL").unwrap();
        assert_eq!(s.synapse_type, SynapseType::Chemical);
        assert_eq!(s.pre, "ADAL");
        assert_eq!(s.post, vec!["RIAL".to_string()]);
        assert_eq!(s.descriptor, PositionDescriptor::default());
    }

    #[test]
    fn synapse_marker_order() {
        // chemical is checked first even when another marker also appears
        let s = parse_synapse("AelectricalBchemicalC").unwrap();
        assert_eq!(s.synapse_type, SynapseType::Chemical);
        assert_eq!(s.pre, "AelectricalB");
    }

    #[test]
    fn synapse_without_type_marker() {
        assert_eq!(
            parse_synapse("URYVRRMDDR~A_pre"),
            Err(CodecError::MissingSynapseType("URYVRRMDDR~A_pre".into()))
        );
        assert_eq!(synapse_type("nothing"), None);
    }

    #[test]
    fn synapse_missing_sides() {
        assert!(matches!(
            parse_synapse("electricalRIAL"),
            Err(CodecError::EmptyPreNeuron(_))
        ));
        assert!(matches!(
            parse_synapse("RIALelectrical~b_post2"),
            Err(CodecError::EmptyPostNeurons(_))
        ));
    }

    #[test]
    fn position_descriptors() {
        let d = parse_position("x", "b_post4").unwrap();
        assert_eq!(d.section.as_deref(), Some("B"));
        assert_eq!(d.position, Some(SynapsePosition::Post));
        assert_eq!(d.site, 4);

        let d = parse_position("x", "post12").unwrap();
        assert_eq!(d.section, None);
        assert_eq!(d.site, 12);

        let d = parse_position("x", "").unwrap();
        assert_eq!(d, PositionDescriptor::default());
    }

    #[test]
    fn cphate_single_neuron() {
        let n = parse_cphate_node("ADAL-i11/26-c11/172-s1780", DecodePolicy::Strict).unwrap();
        assert_eq!(n.neurons, vec!["ADAL".to_string()]);
        assert_eq!(n.iteration, 11);
        assert_eq!(n.iteration_count, 26);
        assert_eq!(n.cluster, 11);
        assert_eq!(n.cluster_count, 172);
        assert_eq!(n.serial, 1780);
    }

    #[test]
    fn cphate_tokens_in_any_order_or_absent() {
        let n =
            parse_cphate_node("ADAL_RIFL_SIBVL-s2178-c8/45", DecodePolicy::Strict).unwrap();
        assert_eq!(n.neurons.len(), 3);
        assert_eq!(n.serial, 2178);
        assert_eq!((n.cluster, n.cluster_count), (8, 45));
        assert_eq!((n.iteration, n.iteration_count), (0, 0));
    }

    #[test]
    fn cphate_malformed_integer_policies() {
        let raw = "ADAL-ix/26-c3-s7";
        assert!(matches!(
            parse_cphate_node(raw, DecodePolicy::Strict),
            Err(CodecError::MalformedInteger { .. })
        ));
        let n = parse_cphate_node(raw, DecodePolicy::ZeroFill).unwrap();
        assert_eq!((n.iteration, n.iteration_count), (0, 0));
        assert_eq!((n.cluster, n.cluster_count), (3, 0));
        assert_eq!(n.serial, 7);
    }

    #[test]
    fn cphate_unknown_token_policies() {
        assert!(matches!(
            parse_cphate_node("ADAL-x9", DecodePolicy::Strict),
            Err(CodecError::UnknownToken { .. })
        ));
        let n = parse_cphate_node("ADAL-x9-s1", DecodePolicy::ZeroFill).unwrap();
        assert_eq!(n.serial, 1);
    }

    #[test]
    fn cphate_structural_errors_ignore_policy() {
        assert!(matches!(
            parse_cphate_node("ADAL", DecodePolicy::ZeroFill),
            Err(CodecError::MissingCphateMetadata(_))
        ));
        assert!(matches!(
            parse_cphate_node("-i1/2", DecodePolicy::ZeroFill),
            Err(CodecError::EmptyNeuronList(_))
        ));
    }

    #[test]
    fn plain_names_pass_through() {
        assert_eq!(plain_uid("SVV_RIAL"), Ok("SVV_RIAL"));
        assert_eq!(plain_uid("  "), Err(CodecError::Empty));
    }
}
