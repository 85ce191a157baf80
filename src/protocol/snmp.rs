//! Just enough BER to produce one SNMPv1 GetRequest.

const TAG_INTEGER: u8 = 0x02;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_NULL: u8 = 0x05;
const TAG_OID: u8 = 0x06;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_GET_REQUEST: u8 = 0xA0;

const SNMP_V1: i32 = 0;

/// sysDescr.0
pub const SYS_DESCR_OID: &[u32] = &[1, 3, 6, 1, 2, 1, 1, 1, 0];

/// `GetRequest(sysDescr.0)`, community `public`, request-id 1.
pub const GET_SYS_DESCR_PUBLIC: [u8; 40] = [
    0x30, 0x26, // Message
    0x02, 0x01, 0x00, // version: 1
    0x04, 0x06, b'p', b'u', b'b', b'l', b'i', b'c', // community
    0xA0, 0x19, // GetRequest-PDU
    0x02, 0x01, 0x01, // request-id
    0x02, 0x01, 0x00, // error-status
    0x02, 0x01, 0x00, // error-index
    0x30, 0x0E, // VarBindList
    0x30, 0x0C, // VarBind
    0x06, 0x08, 0x2B, 0x06, 0x01, 0x02, 0x01, 0x01, 0x01, 0x00, // name
    0x05, 0x00, // value: NULL
];

fn push_length(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes = len.to_be_bytes();
        let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
        out.push(0x80 | (bytes.len() - first) as u8);
        out.extend_from_slice(&bytes[first..]);
    }
}

fn tlv(tag: u8, value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len() + 4);
    out.push(tag);
    push_length(&mut out, value.len());
    out.extend_from_slice(value);
    out
}

fn integer(value: i32) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    // Drop redundant leading sign bytes.
    let mut start = 0;
    while start < 3 {
        let (b, next) = (bytes[start], bytes[start + 1]);
        if (b == 0x00 && next & 0x80 == 0) || (b == 0xFF && next & 0x80 != 0) {
            start += 1;
        } else {
            break;
        }
    }
    tlv(TAG_INTEGER, &bytes[start..])
}

fn oid(arcs: &[u32]) -> Vec<u8> {
    let mut body = Vec::new();
    if arcs.len() >= 2 {
        body.push((arcs[0] * 40 + arcs[1]) as u8);
    }
    for &arc in arcs.iter().skip(2) {
        let mut chunk = Vec::new();
        let mut v = arc;
        chunk.push((v & 0x7F) as u8);
        v >>= 7;
        while v > 0 {
            chunk.push(0x80 | (v & 0x7F) as u8);
            v >>= 7;
        }
        chunk.reverse();
        body.extend_from_slice(&chunk);
    }
    tlv(TAG_OID, &body)
}

/// Encodes a v1 GetRequest for a single OID with a NULL value.
pub fn encode_get_request(community: &str, request_id: i32, name: &[u32]) -> Vec<u8> {
    let varbind = tlv(TAG_SEQUENCE, &[oid(name), tlv(TAG_NULL, &[])].concat());
    let varbind_list = tlv(TAG_SEQUENCE, &varbind);
    let pdu = tlv(
        TAG_GET_REQUEST,
        &[integer(request_id), integer(0), integer(0), varbind_list].concat(),
    );
    tlv(
        TAG_SEQUENCE,
        &[
            integer(SNMP_V1),
            tlv(TAG_OCTET_STRING, community.as_bytes()),
            pdu,
        ]
        .concat(),
    )
}
