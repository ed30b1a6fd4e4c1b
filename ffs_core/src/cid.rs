//! Content identifiers.
//!
//! A `Cid` is kept as its raw binary form; equality and ordering are by
//! bytes. Two string forms are accepted when parsing:
//!
//! - CIDv0: 46 base58btc characters starting with `Qm`, no multibase prefix
//! - CIDv1: any multibase string whose decoded form starts with version `0x01`
//!
//! The canonical string form is base58btc for v0 and base32-lower
//! multibase for v1, matching what IPFS tooling prints.

use serde::{Deserialize, Deserializer, Serialize, Serializer, ser::SerializeMap};
use std::fmt;
use std::str::FromStr;

const CID_V1: u8 = 0x01;
const CODEC_RAW: u8 = 0x55;
const MULTIHASH_SHA2_256: u8 = 0x12;
const MULTIHASH_BLAKE3: u8 = 0x1e;
const DIGEST_LEN_32: u8 = 0x20;

#[derive(thiserror::Error, Debug)]
pub enum CidError {
    #[error("invalid multibase string: {0}")]
    Multibase(#[from] multibase::Error),
    #[error("invalid length: expected at least {0} bytes, got {1}")]
    InvalidLength(usize, usize),
    #[error("invalid CIDv0 multihash header: {0:#x} {1:#x}")]
    InvalidV0Header(u8, u8),
    #[error("unsupported CID version: {0:#x}")]
    UnsupportedVersion(u8),
}

/// Opaque content identifier.
#[derive(Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cid {
    bytes: Box<[u8]>,
}

impl Cid {
    pub fn parse(s: &str) -> Result<Self, CidError> {
        if s.len() == 46 && s.starts_with("Qm") {
            let bytes = multibase::Base::Base58Btc.decode(s)?;
            if bytes.len() != 34 {
                return Err(CidError::InvalidLength(34, bytes.len()));
            }
            if bytes[0] != MULTIHASH_SHA2_256 || bytes[1] != DIGEST_LEN_32 {
                return Err(CidError::InvalidV0Header(bytes[0], bytes[1]));
            }
            return Ok(Self {
                bytes: bytes.into_boxed_slice(),
            });
        }

        let (_, bytes) = multibase::decode(s)?;
        // version, codec, multihash code, digest length
        if bytes.len() < 4 {
            return Err(CidError::InvalidLength(4, bytes.len()));
        }
        if bytes[0] != CID_V1 {
            return Err(CidError::UnsupportedVersion(bytes[0]));
        }
        Ok(Self {
            bytes: bytes.into_boxed_slice(),
        })
    }

    /// Builds a CIDv1 with the raw codec over the blake3 digest of `data`.
    pub fn raw_blake3(data: impl AsRef<[u8]>) -> Self {
        let digest = blake3::hash(data.as_ref());
        let mut bytes = Vec::with_capacity(36);
        bytes.extend_from_slice(&[CID_V1, CODEC_RAW, MULTIHASH_BLAKE3, DIGEST_LEN_32]);
        bytes.extend_from_slice(digest.as_bytes());
        Self {
            bytes: bytes.into_boxed_slice(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_v0(&self) -> bool {
        self.bytes.len() == 34
            && self.bytes[0] == MULTIHASH_SHA2_256
            && self.bytes[1] == DIGEST_LEN_32
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_v0() {
            f.write_str(&multibase::Base::Base58Btc.encode(&self.bytes))
        } else {
            f.write_str(&multibase::encode(
                multibase::Base::Base32Lower,
                &self.bytes,
            ))
        }
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Cid").field(&self.to_string()).finish()
    }
}

impl FromStr for Cid {
    type Err = CidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Cid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("/", &self.to_string())?;
        map.end()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CidRepr {
    Link {
        #[serde(rename = "/")]
        link: String,
    },
    Plain(String),
}

impl<'de> Deserialize<'de> for Cid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = match CidRepr::deserialize(deserializer)? {
            CidRepr::Link { link } => link,
            CidRepr::Plain(s) => s,
        };
        Cid::parse(&s).map_err(serde::de::Error::custom)
    }
}
