//! Minimal BER codec for SNMP v1/v2c messages
//!
//! Only what discovery needs: a GetRequest with one variable binding, and
//! enough of the response to match it to its request.

/// `sysDescr.0`
pub const SYS_DESCR: &[u32] = &[1, 3, 6, 1, 2, 1, 1, 1, 0];

/// GetRequest PDU tag
pub const GET_REQUEST: u8 = 0xa0;
/// GetResponse PDU tag
pub const GET_RESPONSE: u8 = 0xa2;

const INTEGER: u8 = 0x02;
const OCTET_STRING: u8 = 0x04;
const NULL: u8 = 0x05;
const OBJECT_IDENTIFIER: u8 = 0x06;
const SEQUENCE: u8 = 0x30;

/// Value of a variable binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// ASN.1 NULL, used in requests
    Null,
    /// OCTET STRING
    OctetString(Vec<u8>),
    /// Any other type, kept raw
    Other(u8, Vec<u8>),
}

/// A decoded SNMP message with a single variable binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Wire version: 0 = v1, 1 = v2c
    pub version: i64,
    /// Community string
    pub community: String,
    /// PDU tag, e.g. [`GET_RESPONSE`]
    pub pdu: u8,
    /// Request identifier
    pub request_id: i64,
    /// Error status of the PDU
    pub error_status: i64,
    /// Object identifier of the first binding
    pub oid: Vec<u32>,
    /// Value of the first binding
    pub value: Value,
}

impl Message {
    /// GetRequest for `oid`
    pub fn get_request(version: i64, community: &str, request_id: i64, oid: &[u32]) -> Self {
        Self {
            version,
            community: community.to_string(),
            pdu: GET_REQUEST,
            request_id,
            error_status: 0,
            oid: oid.to_vec(),
            value: Value::Null,
        }
    }

    /// Encode the message
    pub fn encode(&self) -> Vec<u8> {
        let value = match &self.value {
            Value::Null => tlv(NULL, &[]),
            Value::OctetString(bytes) => tlv(OCTET_STRING, bytes),
            Value::Other(tag, bytes) => tlv(*tag, bytes),
        };
        let binding = tlv(SEQUENCE, &[encode_oid(&self.oid), value].concat());
        let bindings = tlv(SEQUENCE, &binding);
        let pdu = tlv(
            self.pdu,
            &[
                encode_integer(self.request_id),
                encode_integer(self.error_status),
                encode_integer(0),
                bindings,
            ]
            .concat(),
        );

        tlv(
            SEQUENCE,
            &[
                encode_integer(self.version),
                tlv(OCTET_STRING, self.community.as_bytes()),
                pdu,
            ]
            .concat(),
        )
    }

    /// Decode a message; `None` when the bytes are not a well-formed message
    pub fn decode(data: &[u8]) -> Option<Self> {
        let mut outer = Reader::new(Reader::new(data).read(SEQUENCE)?);
        let version = decode_integer(outer.read(INTEGER)?)?;
        let community = String::from_utf8_lossy(outer.read(OCTET_STRING)?).into_owned();

        let (pdu, body) = outer.next_tlv()?;
        let mut body = Reader::new(body);
        let request_id = decode_integer(body.read(INTEGER)?)?;
        let error_status = decode_integer(body.read(INTEGER)?)?;
        let _error_index = decode_integer(body.read(INTEGER)?)?;

        let mut bindings = Reader::new(body.read(SEQUENCE)?);
        let mut binding = Reader::new(bindings.read(SEQUENCE)?);
        let oid = decode_oid(binding.read(OBJECT_IDENTIFIER)?)?;
        let value = match binding.next_tlv()? {
            (NULL, _) => Value::Null,
            (OCTET_STRING, bytes) => Value::OctetString(bytes.to_vec()),
            (tag, bytes) => Value::Other(tag, bytes.to_vec()),
        };

        Some(Self {
            version,
            community,
            pdu,
            request_id,
            error_status,
            oid,
            value,
        })
    }
}

fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 4);
    out.push(tag);
    let len = content.len();
    if len < 0x80 {
        out.push(len as u8);
    } else if len <= 0xff {
        out.extend_from_slice(&[0x81, len as u8]);
    } else {
        out.extend_from_slice(&[0x82, (len >> 8) as u8, len as u8]);
    }
    out.extend_from_slice(content);
    out
}

fn encode_integer(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    // Drop leading bytes that only repeat the sign
    let mut start = 0;
    while start < bytes.len() - 1 {
        let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
            || (bytes[start] == 0xff && bytes[start + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    tlv(INTEGER, &bytes[start..])
}

fn decode_integer(bytes: &[u8]) -> Option<i64> {
    if bytes.is_empty() || bytes.len() > 8 {
        return None;
    }
    let mut value: i64 = if bytes[0] & 0x80 != 0 { -1 } else { 0 };
    for &b in bytes {
        value = (value << 8) | i64::from(b);
    }
    Some(value)
}

fn encode_oid(oid: &[u32]) -> Vec<u8> {
    let mut content = Vec::new();
    if let [first, second, rest @ ..] = oid {
        content.push((first * 40 + second) as u8);
        for &arc in rest {
            let mut chunk = vec![(arc & 0x7f) as u8];
            let mut arc = arc >> 7;
            while arc > 0 {
                chunk.push((arc & 0x7f) as u8 | 0x80);
                arc >>= 7;
            }
            content.extend(chunk.iter().rev());
        }
    }
    tlv(OBJECT_IDENTIFIER, &content)
}

fn decode_oid(bytes: &[u8]) -> Option<Vec<u32>> {
    let (&first, rest) = bytes.split_first()?;
    let mut oid = vec![u32::from(first / 40), u32::from(first % 40)];
    let mut arc: u32 = 0;
    for &b in rest {
        arc = arc.checked_mul(128)? | u32::from(b & 0x7f);
        if b & 0x80 == 0 {
            oid.push(arc);
            arc = 0;
        }
    }
    Some(oid)
}

struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn next_tlv(&mut self) -> Option<(u8, &'a [u8])> {
        let (&tag, rest) = self.data.split_first()?;
        let (&first, rest) = rest.split_first()?;
        let (len, rest) = match first {
            0x00..=0x7f => (usize::from(first), rest),
            0x81 => {
                let (&l, rest) = rest.split_first()?;
                (usize::from(l), rest)
            }
            0x82 => {
                let (l, rest) = rest.split_at_checked(2)?;
                ((usize::from(l[0]) << 8) | usize::from(l[1]), rest)
            }
            _ => return None,
        };
        let (content, rest) = rest.split_at_checked(len)?;
        self.data = rest;
        Some((tag, content))
    }

    fn read(&mut self, tag: u8) -> Option<&'a [u8]> {
        match self.next_tlv()? {
            (t, content) if t == tag => Some(content),
            _ => None,
        }
    }
}
