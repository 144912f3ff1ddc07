//! Order-preserving tuple key encoding.
//!
//! Keys are tuples of typed components packed into byte strings such that
//! byte-lexicographic order of the encodings matches the semantic order of
//! the tuples (strings lexical, integers numeric, equal prefixes before
//! their extensions). This is what lets the time index be scanned in due
//! order and lets a partial tuple turn into a starts-with range.
//!
//! Encoding per component: a tag byte followed by the payload. Variable
//! length payloads (bytes, strings) are zero-terminated with embedded
//! `0x00` escaped as `0x00 0xFF`; integers are big-endian with the sign
//! bit flipped so negative values sort first; uuids are their 16 raw bytes.

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use uuid::Uuid;

use crate::error::{Error, Result};

const TAG_BYTES: u8 = 0x01;
const TAG_STR: u8 = 0x02;
const TAG_I64: u8 = 0x11;
const TAG_UUID: u8 = 0x30;

/// Byte that no encoded component starts with; appending it to a packed
/// prefix gives an exclusive upper bound for all extensions of that prefix.
const RANGE_TERMINATOR: u8 = 0xFF;

/// A single typed component of a key tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Element {
    /// Arbitrary bytes, ordered lexically.
    Bytes(Vec<u8>),
    /// UTF-8 string, ordered lexically.
    Str(String),
    /// Signed 64-bit integer (also used for unix-millisecond timestamps),
    /// ordered numerically.
    I64(i64),
    /// 128-bit surrogate id, ordered by raw bytes.
    Uuid(Uuid),
}

impl Element {
    fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            Element::Bytes(b) => {
                buf.push(TAG_BYTES);
                encode_terminated(b, buf);
            }
            Element::Str(s) => {
                buf.push(TAG_STR);
                encode_terminated(s.as_bytes(), buf);
            }
            Element::I64(v) => {
                buf.push(TAG_I64);
                // Sign-bit flip keeps numeric order under byte comparison.
                buf.write_u64::<BigEndian>((*v as u64) ^ (1u64 << 63))
                    .expect("write to Vec cannot fail");
            }
            Element::Uuid(id) => {
                buf.push(TAG_UUID);
                buf.extend_from_slice(id.as_bytes());
            }
        }
    }
}

fn encode_terminated(payload: &[u8], buf: &mut Vec<u8>) {
    for &b in payload {
        buf.push(b);
        if b == 0x00 {
            buf.push(0xFF);
        }
    }
    buf.push(0x00);
}

/// Decode a zero-terminated payload, returning it and the bytes consumed.
fn decode_terminated(buf: &[u8]) -> Result<(Vec<u8>, usize)> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < buf.len() {
        if buf[i] == 0x00 {
            if buf.get(i + 1) == Some(&0xFF) {
                out.push(0x00);
                i += 2;
            } else {
                return Ok((out, i + 1));
            }
        } else {
            out.push(buf[i]);
            i += 1;
        }
    }
    Err(Error::Corrupted {
        reason: "unterminated variable-length key component".to_string(),
    })
}

/// Pack a tuple of elements into an order-preserving byte key.
pub fn pack(elements: &[Element]) -> Vec<u8> {
    let mut buf = Vec::new();
    for element in elements {
        element.encode(&mut buf);
    }
    buf
}

/// Decode a packed key back into its tuple of elements.
///
/// Exact inverse of [`pack`]; fails with `Corrupted` on unknown tags or
/// truncated payloads.
pub fn unpack(mut buf: &[u8]) -> Result<Vec<Element>> {
    let mut elements = Vec::new();
    while let Some((&tag, rest)) = buf.split_first() {
        match tag {
            TAG_BYTES => {
                let (payload, used) = decode_terminated(rest)?;
                elements.push(Element::Bytes(payload));
                buf = &rest[used..];
            }
            TAG_STR => {
                let (payload, used) = decode_terminated(rest)?;
                let s = String::from_utf8(payload).map_err(|_| Error::Corrupted {
                    reason: "key component is not valid UTF-8".to_string(),
                })?;
                elements.push(Element::Str(s));
                buf = &rest[used..];
            }
            TAG_I64 => {
                if rest.len() < 8 {
                    return Err(Error::Corrupted {
                        reason: "truncated integer key component".to_string(),
                    });
                }
                let transformed = BigEndian::read_u64(rest);
                elements.push(Element::I64((transformed ^ (1u64 << 63)) as i64));
                buf = &rest[8..];
            }
            TAG_UUID => {
                if rest.len() < 16 {
                    return Err(Error::Corrupted {
                        reason: "truncated uuid key component".to_string(),
                    });
                }
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(&rest[..16]);
                elements.push(Element::Uuid(Uuid::from_bytes(bytes)));
                buf = &rest[16..];
            }
            other => {
                return Err(Error::Corrupted {
                    reason: format!("unknown key tag 0x{other:02x}"),
                });
            }
        }
    }
    Ok(elements)
}

/// Half-open key range `[begin, end)` for ascending range reads and clears.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    /// Inclusive lower bound.
    pub begin: Vec<u8>,
    /// Exclusive upper bound.
    pub end: Vec<u8>,
}

impl KeyRange {
    /// Range covering `begin_key` itself and every key extending it.
    pub fn starts_with(begin_key: &[u8]) -> Self {
        let mut end = begin_key.to_vec();
        end.push(RANGE_TERMINATOR);
        KeyRange {
            begin: begin_key.to_vec(),
            end,
        }
    }

    /// Range between two explicit packed keys.
    pub fn between(begin: Vec<u8>, end: Vec<u8>) -> Self {
        KeyRange { begin, end }
    }

    /// Whether a key falls inside the range.
    pub fn contains(&self, key: &[u8]) -> bool {
        key >= self.begin.as_slice() && key < self.end.as_slice()
    }
}

/// A reserved namespace inside the flat keyspace.
///
/// All keys produced through a subspace carry its encoded name as prefix,
/// so sagas and timeouts never collide even when both live in the same
/// underlying store. The name is encoded as a terminated string component,
/// which makes distinct namespaces prefix-free.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subspace {
    prefix: Vec<u8>,
}

impl Subspace {
    /// Create a subspace for the given namespace name.
    pub fn new(name: &str) -> Self {
        Subspace {
            prefix: pack(&[Element::Str(name.to_string())]),
        }
    }

    /// Pack a tuple under this subspace's prefix.
    pub fn pack(&self, elements: &[Element]) -> Vec<u8> {
        let mut key = self.prefix.clone();
        for element in elements {
            element.encode(&mut key);
        }
        key
    }

    /// Starts-with range for a partial tuple under this subspace.
    pub fn range(&self, elements: &[Element]) -> KeyRange {
        KeyRange::starts_with(&self.pack(elements))
    }

    /// Range covering every key in this subspace.
    pub fn all(&self) -> KeyRange {
        KeyRange::starts_with(&self.prefix)
    }

    /// Decode a key from this subspace back into its tuple.
    ///
    /// Fails with `Corrupted` if the key does not carry this subspace's
    /// prefix.
    pub fn unpack(&self, key: &[u8]) -> Result<Vec<Element>> {
        let rest = key
            .strip_prefix(self.prefix.as_slice())
            .ok_or_else(|| Error::Corrupted {
                reason: "key does not belong to this subspace".to_string(),
            })?;
        unpack(rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_roundtrip() {
        let elements = vec![
            Element::Str("OrderSaga".to_string()),
            Element::Uuid(Uuid::new_v4()),
            Element::I64(-42),
            Element::Bytes(vec![1, 0, 2, 0, 0, 3]),
        ];
        let packed = pack(&elements);
        assert_eq!(unpack(&packed).expect("unpack"), elements);
    }

    #[test]
    fn string_order_matches_byte_order() {
        let a = pack(&[Element::Str("a".to_string())]);
        let ab = pack(&[Element::Str("ab".to_string())]);
        let b = pack(&[Element::Str("b".to_string())]);
        assert!(a < ab);
        assert!(ab < b);
    }

    #[test]
    fn integer_order_matches_byte_order() {
        let values = [i64::MIN, -1_000, -1, 0, 1, 1_000, i64::MAX];
        let mut packed: Vec<Vec<u8>> = values
            .iter()
            .map(|v| pack(&[Element::I64(*v)]))
            .collect();
        let semantic_order = packed.clone();
        packed.sort();
        assert_eq!(packed, semantic_order);
    }

    #[test]
    fn tuple_order_is_componentwise() {
        // Same first component: second component decides.
        let early = pack(&[
            Element::Str("ByTime".to_string()),
            Element::I64(100),
            Element::Str("zzz".to_string()),
        ]);
        let late = pack(&[
            Element::Str("ByTime".to_string()),
            Element::I64(200),
            Element::Str("aaa".to_string()),
        ]);
        assert!(early < late);

        // Equal times: id breaks the tie.
        let id1 = pack(&[Element::I64(100), Element::Str("1".to_string())]);
        let id2 = pack(&[Element::I64(100), Element::Str("2".to_string())]);
        assert!(id1 < id2);
    }

    #[test]
    fn embedded_zero_bytes_survive_and_order() {
        let zero = pack(&[Element::Bytes(vec![0])]);
        let zero_one = pack(&[Element::Bytes(vec![0, 1])]);
        let one = pack(&[Element::Bytes(vec![1])]);
        assert!(zero < zero_one);
        assert!(zero_one < one);
        assert_eq!(
            unpack(&zero_one).expect("unpack"),
            vec![Element::Bytes(vec![0, 1])]
        );
    }

    #[test]
    fn starts_with_range_covers_prefix_and_extensions() {
        let subspace = Subspace::new("Sagas");
        let id = Uuid::new_v4();
        let id_key = subspace.pack(&[Element::Str("S".to_string()), Element::Uuid(id)]);
        let version_key = {
            let mut key = id_key.clone();
            Element::Str("version".to_string()).encode(&mut key);
            key
        };

        let range = KeyRange::starts_with(&id_key);
        assert!(range.contains(&id_key));
        assert!(range.contains(&version_key));

        let other = subspace.pack(&[Element::Str("S".to_string()), Element::Uuid(Uuid::new_v4())]);
        assert!(!range.contains(&other));
    }

    #[test]
    fn subspaces_are_prefix_free() {
        let sagas = Subspace::new("Sagas");
        let sagas_x = Subspace::new("SagasX");
        let key = sagas_x.pack(&[Element::I64(1)]);
        assert!(!sagas.all().contains(&key));
        assert!(sagas.unpack(&key).is_err());
    }

    #[test]
    fn subspace_unpack_strips_prefix() {
        let subspace = Subspace::new("Timeouts");
        let key = subspace.pack(&[
            Element::Str("ByTime".to_string()),
            Element::I64(123_456),
            Element::Str("t-1".to_string()),
        ]);
        let elements = subspace.unpack(&key).expect("unpack");
        assert_eq!(elements[1], Element::I64(123_456));
        assert_eq!(elements[2], Element::Str("t-1".to_string()));
    }

    #[test]
    fn unpack_rejects_garbage() {
        assert!(unpack(&[0x77, 1, 2, 3]).is_err());
        assert!(unpack(&[TAG_I64, 1, 2]).is_err());
        assert!(unpack(&[TAG_STR, b'a', b'b']).is_err());
    }
}
