//! Basic types shared by the resolver, the record manager and recovery

use crate::error::{DnsError, DnsResult};
use hickory_proto::op::Query;
use hickory_proto::rr::{DNSClass, RecordType};
use std::str::FromStr;

pub const TYPE_A: u16 = 1;
pub const TYPE_NS: u16 = 2;
pub const TYPE_CNAME: u16 = 5;
pub const TYPE_SOA: u16 = 6;
pub const TYPE_PTR: u16 = 12;
pub const TYPE_MX: u16 = 15;
pub const TYPE_TXT: u16 = 16;
pub const TYPE_AAAA: u16 = 28;
pub const TYPE_SRV: u16 = 33;

pub const CLASS_INET: u16 = 1;
pub const CLASS_CHAOS: u16 = 3;
pub const CLASS_HESIOD: u16 = 4;
pub const CLASS_NONE: u16 = 254;
pub const CLASS_ANY: u16 = 255;

/// Response section a cache field belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Section {
    Answer,
    Ns,
    Extra,
}

impl Section {
    pub const ALL: [Section; 3] = [Section::Answer, Section::Ns, Section::Extra];

    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Answer => "Answer",
            Section::Ns => "Ns",
            Section::Extra => "Extra",
        }
    }

    /// Field key for the record at `index`, e.g. `Answer-0`.
    pub fn field(&self, index: usize) -> String {
        format!("{}-{}", self.as_str(), index)
    }
}

/// Parsed cache field key. Unparseable suffixes sort after every numbered field.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FieldKey {
    pub section: Section,
    pub index: u32,
}

impl FieldKey {
    pub fn parse(field: &str) -> Option<Self> {
        Section::ALL.iter().find_map(|section| {
            let rest = field.strip_prefix(section.as_str())?;
            let index = rest.trim_start_matches('-').parse().unwrap_or(u32::MAX);
            Some(FieldKey { section: *section, index })
        })
    }
}

/// A DNS question: (name, type, class). Doubles as the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Question {
    pub name: String,
    pub qtype: u16,
    pub qclass: u16,
}

impl Question {
    pub fn new(name: &str, qtype: u16, qclass: u16) -> Self {
        Self { name: to_fqdn(name), qtype, qclass }
    }

    pub fn from_query(query: &Query) -> Self {
        Self::new(
            &query.name().to_string(),
            u16::from(query.query_type()),
            u16::from(query.query_class()),
        )
    }

    /// Same name and class, asking for AAAA.
    pub fn as_aaaa(&self) -> Self {
        Self { name: self.name.clone(), qtype: TYPE_AAAA, qclass: self.qclass }
    }

    /// Canonical string form used as the cache key: `;name\tCLASS\t TYPE`.
    pub fn cache_key(&self) -> String {
        format!(
            ";{}\t{}\t {}",
            self.name.to_ascii_lowercase(),
            class_name(self.qclass),
            type_name(self.qtype)
        )
    }
}

impl std::fmt::Display for Question {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.name, class_name(self.qclass), type_name(self.qtype))
    }
}

/// Trailing-dot terminated form of a domain name.
pub fn to_fqdn(name: &str) -> String {
    let trimmed = name.strip_suffix('.').unwrap_or(name);
    format!("{}.", trimmed)
}

pub fn type_name(code: u16) -> String {
    match RecordType::from(code) {
        RecordType::Unknown(c) => format!("TYPE{}", c),
        t => t.to_string(),
    }
}

pub fn parse_type(s: &str) -> DnsResult<u16> {
    let upper = s.to_ascii_uppercase();
    if let Some(code) = upper.strip_prefix("TYPE") {
        return code
            .parse()
            .map_err(|_| DnsError::Decode(format!("invalid record type '{}'", s)));
    }
    match RecordType::from_str(&upper) {
        Ok(t) => Ok(u16::from(t)),
        Err(_) => Err(DnsError::Decode(format!("unknown record type '{}'", s))),
    }
}

pub fn class_name(code: u16) -> String {
    match code {
        CLASS_INET => "IN".to_string(),
        CLASS_CHAOS => "CH".to_string(),
        CLASS_HESIOD => "HS".to_string(),
        CLASS_NONE => "NONE".to_string(),
        CLASS_ANY => "ANY".to_string(),
        other => format!("CLASS{}", other),
    }
}

/// Accepts both the presentation mnemonics and the long names used by the API.
pub fn parse_class(s: &str) -> Option<u16> {
    match s.to_ascii_uppercase().as_str() {
        "IN" | "INET" => Some(CLASS_INET),
        "CH" | "CHAOS" => Some(CLASS_CHAOS),
        "HS" | "HESIOD" => Some(CLASS_HESIOD),
        "NONE" => Some(CLASS_NONE),
        "ANY" => Some(CLASS_ANY),
        _ => None,
    }
}

pub fn dns_class(code: u16) -> DnsResult<DNSClass> {
    match code {
        CLASS_INET => Ok(DNSClass::IN),
        CLASS_CHAOS => Ok(DNSClass::CH),
        CLASS_HESIOD => Ok(DNSClass::HS),
        CLASS_NONE => Ok(DNSClass::NONE),
        CLASS_ANY => Ok(DNSClass::ANY),
        other => Err(DnsError::Decode(format!("unsupported class {}", other))),
    }
}
