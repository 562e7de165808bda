use crate::archival::DnsAnswer;
use crate::dns::types::{RecordType, ResponseCode};
use crate::failure::NetError;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Raw DNS packet codec, RFC 1035.
///
/// The probe only builds single-question queries and reads back the answer
/// section; authority and additional records are never looked at.

#[derive(Debug, Clone)]
pub struct DnsHeader {
    pub id: u16,
    pub qr: bool,
    pub rcode: ResponseCode,
    pub ancount: u16,
}

#[derive(Debug, Clone)]
pub struct DnsQuestion {
    pub name: String,
    pub qtype: RecordType,
}

#[derive(Debug, Clone)]
pub struct DnsRecord {
    pub rtype: RecordType,
    pub ttl: u32,
    pub rdata: Vec<u8>,
    /// rdataのパケット内開始オフセット (圧縮ポインタ解決用)
    pub rdata_offset: usize,
}

#[derive(Debug, Clone)]
pub struct DnsPacket {
    pub header: DnsHeader,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<DnsRecord>,
    pub raw: Vec<u8>,
}

impl fmt::Display for DnsPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.questions.first() {
            Some(q) => write!(
                f,
                "#{} {} {} rcode={} answers={}",
                self.header.id,
                q.name,
                q.qtype.name(),
                self.header.rcode.to_u8(),
                self.header.ancount
            ),
            None => write!(f, "#{} without question", self.header.id),
        }
    }
}

/// Bounds-checked cursor over a wire message
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    fn take(&mut self, n: usize, what: &str) -> anyhow::Result<&'a [u8]> {
        let end = self.pos + n;
        let bytes = self
            .data
            .get(self.pos..end)
            .ok_or_else(|| anyhow::anyhow!("dns: {} truncated at offset {}", what, self.pos))?;
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self, what: &str) -> anyhow::Result<u8> {
        Ok(self.take(1, what)?[0])
    }

    fn u16(&mut self, what: &str) -> anyhow::Result<u16> {
        let b = self.take(2, what)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self, what: &str) -> anyhow::Result<u32> {
        let b = self.take(4, what)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a possibly compressed name (RFC 1035 4.1.4). After a pointer the
    /// cursor resumes right after the pointer, not after the target.
    fn name(&mut self) -> anyhow::Result<String> {
        const MAX_POINTERS: usize = 16;
        let mut labels: Vec<String> = Vec::new();
        let mut resume = None;
        let mut pointers = 0;
        loop {
            let len = self.u8("name")?;
            match len & 0xC0 {
                0xC0 => {
                    let low = self.u8("name pointer")?;
                    pointers += 1;
                    if pointers > MAX_POINTERS {
                        anyhow::bail!("dns: compression loop in name");
                    }
                    resume.get_or_insert(self.pos);
                    self.pos = (((len & 0x3F) as usize) << 8) | low as usize;
                }
                0x00 if len == 0 => break,
                0x00 => {
                    let label = self.take(len as usize, "label")?;
                    labels.push(String::from_utf8_lossy(label).into_owned());
                }
                _ => anyhow::bail!("dns: unsupported label type {:#x}", len),
            }
        }
        if let Some(pos) = resume {
            self.pos = pos;
        }
        Ok(labels.join("."))
    }
}

/// Name at `offset`, which is updated to point past it.
pub fn parse_name(data: &[u8], offset: &mut usize) -> anyhow::Result<String> {
    let mut reader = Reader::new(data, *offset);
    let name = reader.name()?;
    *offset = reader.pos;
    Ok(name)
}

/// Header, questions and answer section of a message
pub fn parse_packet(data: &[u8]) -> anyhow::Result<DnsPacket> {
    let mut r = Reader::new(data, 0);
    let id = r.u16("header")?;
    let flags = r.u16("header")?;
    let qdcount = r.u16("header")?;
    let ancount = r.u16("header")?;
    // authority and additional counts
    r.take(4, "header")?;

    let header = DnsHeader {
        id,
        qr: flags & 0x8000 != 0,
        rcode: ResponseCode::from((flags & 0x000F) as u8),
        ancount,
    };

    let questions = (0..qdcount)
        .map(|_| {
            let name = r.name()?;
            let qtype = RecordType::from(r.u16("question")?);
            r.u16("question")?;
            Ok(DnsQuestion { name, qtype })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let answers = (0..ancount)
        .map(|_| {
            r.name()?;
            let rtype = RecordType::from(r.u16("record")?);
            r.u16("record")?;
            let ttl = r.u32("record")?;
            let rdlength = r.u16("record")? as usize;
            let rdata_offset = r.pos;
            let rdata = r.take(rdlength, "rdata")?.to_vec();
            Ok(DnsRecord { rtype, ttl, rdata, rdata_offset })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(DnsPacket { header, questions, answers, raw: data.to_vec() })
}

const MAX_LABEL_LEN: usize = 63;
const MAX_NAME_LEN: usize = 255;

/// Wire form of `name`; a trailing dot is optional
pub fn encode_name(name: &str) -> Result<Vec<u8>, NetError> {
    let mut out = Vec::with_capacity(name.len() + 2);
    for label in name.split('.').filter(|label| !label.is_empty()) {
        if label.len() > MAX_LABEL_LEN {
            return Err(NetError::Unknown(format!("dns: label too long in {}", name)));
        }
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
    if out.len() > MAX_NAME_LEN {
        return Err(NetError::Unknown(format!("dns: name too long: {}", name)));
    }
    Ok(out)
}

/// Single-question query with recursion desired
pub fn build_query(id: u16, name: &str, qtype: RecordType) -> Result<Vec<u8>, NetError> {
    const CLASS_IN: u16 = 1;
    // id, flags (RD), qdcount, ancount, nscount, arcount
    let header = [id, 0x0100, 1, 0, 0, 0];
    let mut query: Vec<u8> = header.iter().flat_map(|w| w.to_be_bytes()).collect();
    query.extend(encode_name(name)?);
    query.extend(qtype.to_u16().to_be_bytes());
    query.extend(CLASS_IN.to_be_bytes());
    Ok(query)
}

fn rdata_to_ip(rtype: RecordType, rdata: &[u8]) -> Option<IpAddr> {
    match rtype {
        RecordType::A => {
            let octets: [u8; 4] = rdata.try_into().ok()?;
            Some(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        RecordType::AAAA => {
            let octets: [u8; 16] = rdata.try_into().ok()?;
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}

/// Maps the response onto archival answers or onto a failure.
///
/// A NOERROR response without any record of the requested type is `dns_no_answer`.
pub fn lookup_answers(packet: &DnsPacket, qtype: RecordType) -> Result<Vec<DnsAnswer>, NetError> {
    match packet.header.rcode {
        ResponseCode::NoError => {}
        ResponseCode::NxDomain => return Err(NetError::DnsNxdomain),
        ResponseCode::Refused => return Err(NetError::DnsRefused),
        ResponseCode::ServFail => return Err(NetError::DnsServfail),
        other => return Err(NetError::Unknown(format!("dns: rcode {}", other.to_u8()))),
    }

    let mut answers = Vec::new();
    let mut found = false;
    for record in &packet.answers {
        match record.rtype {
            RecordType::A | RecordType::AAAA => {
                if let Some(ip) = rdata_to_ip(record.rtype, &record.rdata) {
                    found |= record.rtype == qtype;
                    answers.push(DnsAnswer::from_ip(ip, Some(record.ttl)));
                }
            }
            RecordType::CNAME => {
                let mut offset = record.rdata_offset;
                if let Ok(target) = parse_name(&packet.raw, &mut offset) {
                    answers.push(DnsAnswer::cname(&target, Some(record.ttl)));
                }
            }
            RecordType::Unknown(_) => {}
        }
    }
    if !found {
        return Err(NetError::DnsNoAnswer);
    }
    Ok(answers)
}

/// Validates that `data` answers the query we sent.
pub fn parse_response(data: &[u8], id: u16) -> Result<DnsPacket, NetError> {
    let packet = parse_packet(data).map_err(|e| NetError::Unknown(e.to_string()))?;
    if !packet.header.qr || packet.header.id != id {
        return Err(NetError::Unknown("dns: response does not match query".to_string()));
    }
    Ok(packet)
}

/// Builds a response to `query` carrying the given addresses (test fixtures).
#[cfg(test)]
pub fn build_response(query: &[u8], rcode: ResponseCode, addrs: &[IpAddr], ttl: u32) -> Vec<u8> {
    let mut response = query.to_vec();
    response[2] |= 0x80; // QR=1
    response[3] = (response[3] & 0xF0) | rcode.to_u8();
    response[6..8].copy_from_slice(&(addrs.len() as u16).to_be_bytes());
    for addr in addrs {
        response.extend_from_slice(&[0xC0, 0x0C]); // pointer to the question name
        let (rtype, rdata) = match addr {
            IpAddr::V4(v4) => (RecordType::A, v4.octets().to_vec()),
            IpAddr::V6(v6) => (RecordType::AAAA, v6.octets().to_vec()),
        };
        response.extend_from_slice(&rtype.to_u16().to_be_bytes());
        response.extend_from_slice(&1u16.to_be_bytes());
        response.extend_from_slice(&ttl.to_be_bytes());
        response.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
        response.extend_from_slice(&rdata);
    }
    response
}
