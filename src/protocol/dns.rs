use crate::utils::{NetworkError, Result};

pub const HEADER_LEN: usize = 12;

pub const QTYPE_A: u16 = 1;
pub const QCLASS_IN: u16 = 1;

const FLAG_QR: u16 = 0x8000;
const FLAG_RD: u16 = 0x0100;
const FLAG_RA: u16 = 0x0080;
const RCODE_MASK: u16 = 0x000F;

const MAX_LABEL_LEN: usize = 63;
const MAX_NAME_LEN: usize = 255;

/// The fixed 12-byte DNS header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DnsHeader {
    pub id: u16,
    pub flags: u16,
    pub qd_count: u16,
    pub an_count: u16,
    pub ns_count: u16,
    pub ar_count: u16,
}

impl DnsHeader {
    pub fn query(id: u16, recursion_desired: bool) -> Self {
        Self {
            id,
            flags: if recursion_desired { FLAG_RD } else { 0 },
            qd_count: 1,
            ..Default::default()
        }
    }

    pub fn is_response(&self) -> bool {
        self.flags & FLAG_QR != 0
    }

    pub fn recursion_desired(&self) -> bool {
        self.flags & FLAG_RD != 0
    }

    pub fn recursion_available(&self) -> bool {
        self.flags & FLAG_RA != 0
    }

    pub fn rcode(&self) -> u8 {
        (self.flags & RCODE_MASK) as u8
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        for field in [
            self.id,
            self.flags,
            self.qd_count,
            self.an_count,
            self.ns_count,
            self.ar_count,
        ] {
            out.extend_from_slice(&field.to_be_bytes());
        }
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_LEN {
            return None;
        }
        let word = |i: usize| u16::from_be_bytes([buf[i], buf[i + 1]]);
        Some(Self {
            id: word(0),
            flags: word(2),
            qd_count: word(4),
            an_count: word(6),
            ns_count: word(8),
            ar_count: word(10),
        })
    }
}

/// Encodes a dotted name as length-prefixed labels terminated by a zero byte.
pub fn encode_qname(name: &str, out: &mut Vec<u8>) -> Result<()> {
    let name = name.trim_end_matches('.');
    if name.is_empty() {
        return Err(NetworkError::Configuration("query name must not be empty".to_string()));
    }

    let start = out.len();
    for label in name.split('.') {
        if label.is_empty() || label.len() > MAX_LABEL_LEN {
            return Err(NetworkError::Configuration(format!(
                "invalid label {:?} in {}",
                label, name
            )));
        }
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);

    if out.len() - start > MAX_NAME_LEN {
        return Err(NetworkError::Configuration(format!("name too long: {}", name)));
    }
    Ok(())
}

/// Builds a complete single-question query message.
pub fn build_query(id: u16, name: &str, qtype: u16, recursion_desired: bool) -> Result<Vec<u8>> {
    let mut packet = Vec::with_capacity(HEADER_LEN + name.len() + 6);
    DnsHeader::query(id, recursion_desired).encode(&mut packet);
    encode_qname(name, &mut packet)?;
    packet.extend_from_slice(&qtype.to_be_bytes());
    packet.extend_from_slice(&QCLASS_IN.to_be_bytes());
    Ok(packet)
}

/// Open-resolver test on a raw reply.
///
/// True only when the reply is longer than three bytes, has RA set and
/// carries RCODE 0 (NOERROR).
pub fn recursion_available(reply: &[u8]) -> bool {
    if reply.len() <= 3 {
        return false;
    }
    let flags = u16::from_be_bytes([reply[2], reply[3]]);
    flags & FLAG_RA != 0 && flags & RCODE_MASK == 0
}
