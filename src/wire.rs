//! Conversions between our records and hickory-proto wire types.

use crate::error::{DnsError, DnsResult};
use crate::rr::{RecordData, ResourceRecord, RrHeader};
use crate::types::dns_class;
use hickory_proto::op::{Message, MessageType};
use hickory_proto::rr::rdata::{A, AAAA, CNAME, MX, NS, NULL, PTR, SOA, SRV, TXT};
use hickory_proto::rr::{Name, RData, Record, RecordType};
use hickory_proto::serialize::binary::BinEncodable;
use std::str::FromStr;

/// Largest UDP payload we answer with before setting TC.
pub const MAX_UDP_PAYLOAD: usize = 1232;

pub fn to_wire(rr: &ResourceRecord) -> DnsResult<Record> {
    let name = parse_name(&rr.header.name)?;
    let rdata = match &rr.data {
        RecordData::A(addr) => RData::A(A(*addr)),
        RecordData::AAAA(addr) => RData::AAAA(AAAA(*addr)),
        RecordData::CNAME(target) => RData::CNAME(CNAME(parse_name(target)?)),
        RecordData::NS(target) => RData::NS(NS(parse_name(target)?)),
        RecordData::PTR(target) => RData::PTR(PTR(parse_name(target)?)),
        RecordData::MX { preference, exchange } => {
            RData::MX(MX::new(*preference, parse_name(exchange)?))
        }
        RecordData::TXT(strings) => RData::TXT(TXT::new(strings.clone())),
        RecordData::SOA { mname, rname, serial, refresh, retry, expire, minimum } => {
            RData::SOA(SOA::new(
                parse_name(mname)?,
                parse_name(rname)?,
                *serial,
                *refresh as i32,
                *retry as i32,
                *expire as i32,
                *minimum,
            ))
        }
        RecordData::SRV { priority, weight, port, target } => {
            RData::SRV(SRV::new(*priority, *weight, *port, parse_name(target)?))
        }
        RecordData::Unknown(bytes) => RData::Unknown {
            code: RecordType::from(rr.header.rr_type),
            rdata: NULL::with(bytes.clone()),
        },
    };

    let mut record = Record::from_rdata(name, rr.header.ttl, rdata);
    record.set_dns_class(dns_class(rr.header.class)?);
    Ok(record)
}

pub fn from_wire(record: &Record) -> DnsResult<ResourceRecord> {
    let header = RrHeader {
        name: record.name().to_string(),
        rr_type: u16::from(record.record_type()),
        class: u16::from(record.dns_class()),
        ttl: record.ttl(),
    };
    // rejects classes we cannot round-trip
    dns_class(header.class)?;

    let data = match record.data() {
        RData::A(a) => RecordData::A(a.0),
        RData::AAAA(aaaa) => RecordData::AAAA(aaaa.0),
        RData::CNAME(cname) => RecordData::CNAME(cname.0.to_string()),
        RData::NS(ns) => RecordData::NS(ns.0.to_string()),
        RData::PTR(ptr) => RecordData::PTR(ptr.0.to_string()),
        RData::MX(mx) => RecordData::MX {
            preference: mx.preference(),
            exchange: mx.exchange().to_string(),
        },
        RData::TXT(txt) => RecordData::TXT(
            txt.txt_data()
                .iter()
                .map(|s| String::from_utf8_lossy(s).into_owned())
                .collect(),
        ),
        RData::SOA(soa) => RecordData::SOA {
            mname: soa.mname().to_string(),
            rname: soa.rname().to_string(),
            serial: soa.serial(),
            refresh: soa.refresh() as u32,
            retry: soa.retry() as u32,
            expire: soa.expire() as u32,
            minimum: soa.minimum(),
        },
        RData::SRV(srv) => RecordData::SRV {
            priority: srv.priority(),
            weight: srv.weight(),
            port: srv.port(),
            target: srv.target().to_string(),
        },
        other => RecordData::Unknown(
            other
                .to_bytes()
                .map_err(|e| DnsError::Decode(format!("failed to encode rdata: {}", e)))?,
        ),
    };

    Ok(ResourceRecord { header, data })
}

/// Empty reply to `request`: same id, opcode, RD flag and question.
pub fn reply_to(request: &Message) -> Message {
    let mut resp = Message::new();
    resp.set_id(request.id());
    resp.set_message_type(MessageType::Response);
    resp.set_op_code(request.op_code());
    resp.set_recursion_desired(request.recursion_desired());
    resp.set_recursion_available(true);
    resp.set_checking_disabled(request.checking_disabled());
    for query in request.queries() {
        resp.add_query(query.clone());
    }
    resp
}

pub fn has_records(msg: &Message) -> bool {
    !msg.answers().is_empty() || !msg.name_servers().is_empty() || !msg.additionals().is_empty()
}

/// Encodes a response for UDP, dropping the sections and setting TC when it does not fit.
pub fn encode_udp(resp: &mut Message) -> DnsResult<Vec<u8>> {
    let bytes = encode(resp)?;
    if bytes.len() <= MAX_UDP_PAYLOAD {
        return Ok(bytes);
    }
    resp.take_answers();
    resp.take_name_servers();
    resp.take_additionals();
    resp.set_truncated(true);
    encode(resp)
}

pub fn encode(msg: &Message) -> DnsResult<Vec<u8>> {
    msg.to_vec()
        .map_err(|e| DnsError::Decode(format!("failed to encode message: {}", e)))
}

pub fn decode(bytes: &[u8]) -> DnsResult<Message> {
    Message::from_vec(bytes).map_err(|e| DnsError::Decode(format!("failed to parse message: {}", e)))
}

fn parse_name(name: &str) -> DnsResult<Name> {
    Name::from_str(name).map_err(|e| DnsError::Decode(format!("invalid name '{}': {}", name, e)))
}
