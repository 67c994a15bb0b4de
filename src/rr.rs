//! Resource records and their presentation (zone file) text form.
//!
//! The text form is what gets persisted in the record store and in the cache:
//! `name<TAB>ttl<TAB>class<TAB>type<TAB>rdata`. Parsing is more lenient: any
//! whitespace separates tokens, TTL and class are optional and may come in
//! either order, and relative names are qualified at the root.

use crate::error::{DnsError, DnsResult};
use crate::types::*;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

const DEFAULT_TTL: u32 = 3600;
const SUPPRESSION_RETRY: u32 = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RrHeader {
    pub name: String,
    pub rr_type: u16,
    pub class: u16,
    pub ttl: u32,
}

impl RrHeader {
    pub fn question(&self) -> Question {
        Question::new(&self.name, self.rr_type, self.class)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordData {
    A(Ipv4Addr),
    AAAA(Ipv6Addr),
    CNAME(String),
    NS(String),
    PTR(String),
    MX { preference: u16, exchange: String },
    TXT(Vec<String>),
    SOA { mname: String, rname: String, serial: u32, refresh: u32, retry: u32, expire: u32, minimum: u32 },
    SRV { priority: u16, weight: u16, port: u16, target: String },
    /// RFC 3597 opaque rdata, used for every type without a dedicated variant.
    Unknown(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    pub header: RrHeader,
    pub data: RecordData,
}

impl ResourceRecord {
    pub fn new(name: &str, class: u16, ttl: u32, data: RecordData) -> DnsResult<Self> {
        let rr_type = data.natural_type().ok_or_else(|| {
            DnsError::InvalidRequest("opaque rdata needs an explicit record type".to_string())
        })?;
        Ok(Self { header: RrHeader { name: to_fqdn(name), rr_type, class, ttl }, data })
    }

    pub fn question(&self) -> Question {
        self.header.question()
    }

    /// Synthetic SOA standing in for a missing AAAA answer, derived from the
    /// header of the record that owns the name.
    pub fn suppression_soa(source: &RrHeader) -> Self {
        let ttl = source.ttl;
        Self {
            header: RrHeader { rr_type: TYPE_SOA, ..source.clone() },
            data: RecordData::SOA {
                mname: source.name.clone(),
                rname: source.name.clone(),
                serial: 0,
                refresh: ttl,
                retry: SUPPRESSION_RETRY,
                expire: ttl,
                minimum: ttl,
            },
        }
    }

    pub fn rdata_text(&self) -> String {
        self.data.to_string()
    }
}

impl RecordData {
    /// The record type implied by the variant, `None` for opaque data.
    pub fn natural_type(&self) -> Option<u16> {
        Some(match self {
            RecordData::A(_) => TYPE_A,
            RecordData::AAAA(_) => TYPE_AAAA,
            RecordData::CNAME(_) => TYPE_CNAME,
            RecordData::NS(_) => TYPE_NS,
            RecordData::PTR(_) => TYPE_PTR,
            RecordData::MX { .. } => TYPE_MX,
            RecordData::TXT(_) => TYPE_TXT,
            RecordData::SOA { .. } => TYPE_SOA,
            RecordData::SRV { .. } => TYPE_SRV,
            RecordData::Unknown(_) => return None,
        })
    }

    fn parse(rr_type: u16, tokens: &[String]) -> DnsResult<Self> {
        if tokens.first().map(String::as_str) == Some("\\#") {
            return parse_generic(tokens);
        }
        let data = match rr_type {
            TYPE_A => RecordData::A(parse_field(tokens, 0, "address")?),
            TYPE_AAAA => RecordData::AAAA(parse_field(tokens, 0, "address")?),
            TYPE_CNAME => RecordData::CNAME(name_field(tokens, 0)?),
            TYPE_NS => RecordData::NS(name_field(tokens, 0)?),
            TYPE_PTR => RecordData::PTR(name_field(tokens, 0)?),
            TYPE_MX => RecordData::MX {
                preference: parse_field(tokens, 0, "preference")?,
                exchange: name_field(tokens, 1)?,
            },
            TYPE_TXT => {
                if tokens.is_empty() {
                    return Err(DnsError::Decode("TXT record without strings".to_string()));
                }
                RecordData::TXT(tokens.to_vec())
            }
            TYPE_SOA => RecordData::SOA {
                mname: name_field(tokens, 0)?,
                rname: name_field(tokens, 1)?,
                serial: parse_field(tokens, 2, "serial")?,
                refresh: parse_field(tokens, 3, "refresh")?,
                retry: parse_field(tokens, 4, "retry")?,
                expire: parse_field(tokens, 5, "expire")?,
                minimum: parse_field(tokens, 6, "minimum")?,
            },
            TYPE_SRV => RecordData::SRV {
                priority: parse_field(tokens, 0, "priority")?,
                weight: parse_field(tokens, 1, "weight")?,
                port: parse_field(tokens, 2, "port")?,
                target: name_field(tokens, 3)?,
            },
            other => {
                return Err(DnsError::Decode(format!(
                    "no presentation format for {}, use \\# generic rdata",
                    type_name(other)
                )))
            }
        };
        Ok(data)
    }
}

impl fmt::Display for RecordData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordData::A(addr) => write!(f, "{}", addr),
            RecordData::AAAA(addr) => write!(f, "{}", addr),
            RecordData::CNAME(name) | RecordData::NS(name) | RecordData::PTR(name) => {
                write!(f, "{}", name)
            }
            RecordData::MX { preference, exchange } => write!(f, "{} {}", preference, exchange),
            RecordData::TXT(strings) => {
                let quoted: Vec<String> = strings.iter().map(|s| quote(s)).collect();
                write!(f, "{}", quoted.join(" "))
            }
            RecordData::SOA { mname, rname, serial, refresh, retry, expire, minimum } => write!(
                f,
                "{} {} {} {} {} {} {}",
                mname, rname, serial, refresh, retry, expire, minimum
            ),
            RecordData::SRV { priority, weight, port, target } => {
                write!(f, "{} {} {} {}", priority, weight, port, target)
            }
            RecordData::Unknown(bytes) if bytes.is_empty() => write!(f, "\\# 0"),
            RecordData::Unknown(bytes) => write!(f, "\\# {} {}", bytes.len(), hex::encode(bytes)),
        }
    }
}

impl fmt::Display for ResourceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}",
            self.header.name,
            self.header.ttl,
            class_name(self.header.class),
            type_name(self.header.rr_type),
            self.data
        )
    }
}

impl FromStr for ResourceRecord {
    type Err = DnsError;

    fn from_str(s: &str) -> DnsResult<Self> {
        let tokens = tokenize(s)?;
        let mut iter = tokens.into_iter();
        let name = iter
            .next()
            .ok_or_else(|| DnsError::Decode("empty record".to_string()))?;

        let mut ttl = None;
        let mut class = None;
        let rr_type = loop {
            let tok = iter
                .next()
                .ok_or_else(|| DnsError::Decode(format!("missing record type in '{}'", s)))?;
            if ttl.is_none() {
                if let Ok(v) = tok.parse::<u32>() {
                    ttl = Some(v);
                    continue;
                }
            }
            if class.is_none() {
                if let Some(c) = parse_class(&tok) {
                    class = Some(c);
                    continue;
                }
            }
            break parse_type(&tok)?;
        };

        let rest: Vec<String> = iter.collect();
        let data = RecordData::parse(rr_type, &rest)?;
        Ok(Self {
            header: RrHeader {
                name: to_fqdn(&name),
                rr_type,
                class: class.unwrap_or(CLASS_INET),
                ttl: ttl.unwrap_or(DEFAULT_TTL),
            },
            data,
        })
    }
}

fn parse_field<T: FromStr>(tokens: &[String], idx: usize, what: &str) -> DnsResult<T> {
    let tok = tokens
        .get(idx)
        .ok_or_else(|| DnsError::Decode(format!("missing {}", what)))?;
    tok.parse()
        .map_err(|_| DnsError::Decode(format!("invalid {} '{}'", what, tok)))
}

fn name_field(tokens: &[String], idx: usize) -> DnsResult<String> {
    tokens
        .get(idx)
        .map(|t| to_fqdn(t))
        .ok_or_else(|| DnsError::Decode("missing domain name".to_string()))
}

fn parse_generic(tokens: &[String]) -> DnsResult<RecordData> {
    let len: usize = parse_field(tokens, 1, "rdata length")?;
    let hex_str: String = tokens[2.min(tokens.len())..].concat();
    let bytes = hex::decode(&hex_str)
        .map_err(|e| DnsError::Decode(format!("invalid generic rdata: {}", e)))?;
    if bytes.len() != len {
        return Err(DnsError::Decode(format!(
            "generic rdata length mismatch: declared {}, found {}",
            len,
            bytes.len()
        )));
    }
    Ok(RecordData::Unknown(bytes))
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Splits on whitespace, keeping double-quoted strings (with `\` escapes) whole.
fn tokenize(input: &str) -> DnsResult<Vec<String>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '"' {
            chars.next();
            let mut s = String::new();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            s.push(escaped);
                        }
                    }
                    '"' => {
                        closed = true;
                        break;
                    }
                    _ => s.push(c),
                }
            }
            if !closed {
                return Err(DnsError::Decode(format!("unterminated string in '{}'", input)));
            }
            tokens.push(s);
        } else {
            let mut s = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                s.push(c);
                chars.next();
            }
            tokens.push(s);
        }
    }
    Ok(tokens)
}
