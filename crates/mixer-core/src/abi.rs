//! minimal solidity abi support for the calls and logs the client touches

use num_bigint::BigUint;
use sha3::{Digest, Keccak256};

use crate::error::{MixerError, Result};

pub type Address = [u8; 20];
pub type Word = [u8; 32];

pub const ZERO_ADDRESS: Address = [0u8; 20];

pub fn keccak256(data: &[u8]) -> Word {
    Keccak256::digest(data).into()
}

pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// topic0 of an event, 0x-prefixed
pub fn event_topic(signature: &str) -> String {
    format!("0x{}", hex::encode(keccak256(signature.as_bytes())))
}

/// parse a 0x-prefixed 20 byte address, any case
pub fn parse_address(s: &str) -> Result<Address> {
    let body = strip_0x(s);
    if body.len() != 40 {
        return Err(MixerError::Validation(format!("invalid address: {}", s)));
    }
    let bytes = hex::decode(body)
        .map_err(|_| MixerError::Validation(format!("invalid address: {}", s)))?;
    let mut out = [0u8; 20];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// EIP-55 mixed-case rendering
pub fn to_checksum(address: &Address) -> String {
    let lower = hex::encode(address);
    let hash = keccak256(lower.as_bytes());
    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let nibble = (hash[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// 0x + 40 hex; mixed-case input must carry a valid EIP-55 checksum
pub fn is_valid_address(s: &str) -> bool {
    if !s.starts_with("0x") && !s.starts_with("0X") {
        return false;
    }
    let Ok(address) = parse_address(s) else {
        return false;
    };
    let body = &s[2..];
    let all_lower = body.chars().all(|c| !c.is_ascii_uppercase());
    let all_upper = body.chars().all(|c| !c.is_ascii_lowercase());
    if all_lower || all_upper {
        return true;
    }
    to_checksum(&address)[2..] == *body
}

pub fn strip_0x(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

pub fn parse_word(s: &str) -> Result<Word> {
    let body = strip_0x(s);
    if body.len() > 64 {
        return Err(MixerError::Validation(format!("value exceeds 32 bytes: {}", s)));
    }
    let padded = format!("{:0>64}", body);
    let bytes =
        hex::decode(padded).map_err(|_| MixerError::Validation(format!("invalid hex: {}", s)))?;
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

pub fn word_hex(word: &Word) -> String {
    format!("0x{}", hex::encode(word))
}

pub fn address_word(address: &Address) -> Word {
    let mut out = [0u8; 32];
    out[12..].copy_from_slice(address);
    out
}

pub fn u64_word(value: u64) -> Word {
    let mut out = [0u8; 32];
    out[24..].copy_from_slice(&value.to_be_bytes());
    out
}

pub fn uint_word(value: &BigUint) -> Result<Word> {
    let bytes = value.to_bytes_be();
    if bytes.len() > 32 {
        return Err(MixerError::Validation("uint256 overflow".into()));
    }
    let mut out = [0u8; 32];
    out[32 - bytes.len()..].copy_from_slice(&bytes);
    Ok(out)
}

/// 0x-prefixed hex of `value` left-padded to `len` bytes
pub fn to_hex_padded(value: &BigUint, len: usize) -> String {
    let hex = value.to_str_radix(16);
    format!("0x{:0>width$}", hex, width = len * 2)
}

/// argument value for [`encode`]
#[derive(Clone, Debug)]
pub enum Token {
    Word(Word),
    Bytes(Vec<u8>),
    String(String),
    WordArray(Vec<Word>),
    StringArray(Vec<String>),
}

impl Token {
    fn is_dynamic(&self) -> bool {
        !matches!(self, Token::Word(_))
    }

    fn tail(&self) -> Vec<u8> {
        match self {
            Token::Word(w) => w.to_vec(),
            Token::Bytes(b) => encode_bytes(b),
            Token::String(s) => encode_bytes(s.as_bytes()),
            Token::WordArray(words) => {
                let mut out = u64_word(words.len() as u64).to_vec();
                for w in words {
                    out.extend_from_slice(w);
                }
                out
            }
            Token::StringArray(items) => {
                let tokens: Vec<Token> = items.iter().cloned().map(Token::String).collect();
                let mut out = u64_word(items.len() as u64).to_vec();
                out.extend(encode(&tokens));
                out
            }
        }
    }
}

fn encode_bytes(data: &[u8]) -> Vec<u8> {
    let mut out = u64_word(data.len() as u64).to_vec();
    out.extend_from_slice(data);
    let pad = (32 - data.len() % 32) % 32;
    out.extend(std::iter::repeat(0u8).take(pad));
    out
}

/// head/tail encoding of a parameter tuple
pub fn encode(tokens: &[Token]) -> Vec<u8> {
    let head_len = tokens.len() * 32;
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();
    for token in tokens {
        if token.is_dynamic() {
            head.extend_from_slice(&u64_word((head_len + tail.len()) as u64));
            tail.extend(token.tail());
        } else {
            head.extend(token.tail());
        }
    }
    head.extend(tail);
    head
}

pub fn encode_call(signature: &str, tokens: &[Token]) -> Vec<u8> {
    let mut out = selector(signature).to_vec();
    out.extend(encode(tokens));
    out
}

fn offset(base: usize, delta: usize) -> Result<usize> {
    base.checked_add(delta)
        .ok_or_else(|| MixerError::Serialization("abi offset overflow".into()))
}

pub fn read_word(data: &[u8], at: usize) -> Result<Word> {
    let end = offset(at, 32)?;
    let slice = data
        .get(at..end)
        .ok_or_else(|| MixerError::Serialization(format!("abi data too short at {}", at)))?;
    let mut out = [0u8; 32];
    out.copy_from_slice(slice);
    Ok(out)
}

pub fn read_usize(data: &[u8], at: usize) -> Result<usize> {
    let word = read_word(data, at)?;
    if word[..24].iter().any(|b| *b != 0) {
        return Err(MixerError::Serialization(format!("abi offset too large at {}", at)));
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&word[24..]);
    usize::try_from(u64::from_be_bytes(buf))
        .map_err(|_| MixerError::Serialization("abi offset too large".into()))
}

pub fn read_bool(data: &[u8], at: usize) -> Result<bool> {
    Ok(read_word(data, at)?[31] != 0)
}

pub fn read_uint(data: &[u8], at: usize) -> Result<BigUint> {
    Ok(BigUint::from_bytes_be(&read_word(data, at)?))
}

pub fn read_address(data: &[u8], at: usize) -> Result<Address> {
    let word = read_word(data, at)?;
    let mut out = [0u8; 20];
    out.copy_from_slice(&word[12..]);
    Ok(out)
}

/// string stored at `at` (length word followed by bytes)
pub fn read_string(data: &[u8], at: usize) -> Result<String> {
    let len = read_usize(data, at)?;
    let start = offset(at, 32)?;
    let bytes = data
        .get(start..offset(start, len)?)
        .ok_or_else(|| MixerError::Serialization("abi string out of bounds".into()))?;
    String::from_utf8(bytes.to_vec())
        .map_err(|e| MixerError::Serialization(format!("abi string not utf-8: {}", e)))
}

/// per-relayer state returned by the aggregator's `relayersData`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayerData {
    pub owner: Address,
    pub balance: BigUint,
    pub is_registered: bool,
    pub records: Vec<String>,
}

/// number of text records per relayer in `relayersData`
pub const RELAYER_RECORDS: usize = 20;

pub const RELAYERS_DATA_SIG: &str = "relayersData(bytes32[],string[])";

/// decode `(address,uint256,bool,string[20])[]`
pub fn decode_relayers_data(data: &[u8]) -> Result<Vec<RelayerData>> {
    let array = read_usize(data, 0)?;
    let count = read_usize(data, array)?;
    let base = offset(array, 32)?;
    if count > data.len() / 32 {
        return Err(MixerError::Serialization(format!(
            "abi array length {} exceeds data",
            count
        )));
    }

    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let head = offset(base, 32 * i)?;
        let tuple = offset(base, read_usize(data, head)?)?;
        let owner = read_address(data, tuple)?;
        let balance = read_uint(data, offset(tuple, 32)?)?;
        let is_registered = read_bool(data, offset(tuple, 64)?)?;
        let records_at = offset(tuple, read_usize(data, offset(tuple, 96)?)?)?;

        let mut records = Vec::with_capacity(RELAYER_RECORDS);
        for j in 0..RELAYER_RECORDS {
            let at = offset(records_at, read_usize(data, offset(records_at, 32 * j)?)?)?;
            records.push(read_string(data, at)?);
        }

        out.push(RelayerData {
            owner,
            balance,
            is_registered,
            records,
        });
    }
    Ok(out)
}

pub const IS_KNOWN_ROOT_SIG: &str = "isKnownRoot(bytes32)";
pub const IS_SPENT_SIG: &str = "isSpent(bytes32)";
pub const PROXY_WITHDRAW_SIG: &str =
    "withdraw(address,bytes,bytes32,bytes32,address,address,uint256,uint256)";

/// calldata for the proxy's `withdraw(pool, proof, root, nullifierHash, recipient, relayer, fee, refund)`
pub fn encode_proxy_withdraw(pool: &str, proof: &str, args: &[String; 6]) -> Result<Vec<u8>> {
    let proof = hex::decode(strip_0x(proof))
        .map_err(|e| MixerError::Prover(format!("proof is not hex: {}", e)))?;
    let mut tokens = vec![
        Token::Word(address_word(&parse_address(pool)?)),
        Token::Bytes(proof),
    ];
    for arg in args {
        tokens.push(Token::Word(parse_word(arg)?));
    }
    Ok(encode_call(PROXY_WITHDRAW_SIG, &tokens))
}
