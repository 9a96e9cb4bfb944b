//! NTLMv2 client messages.
//!
//! The portal sits behind IIS integrated authentication. Only the client side
//! of the handshake is implemented: build a Negotiate message, read the
//! server's Challenge, answer with an Authenticate message carrying an
//! NTLMv2 response. No signing or sealing is negotiated.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use md4::{Digest, Md4};
use md5::Md5;

use crate::error::{SyncError, SyncResult};

const SIGNATURE: &[u8; 8] = b"NTLMSSP\0";

const NEGOTIATE_UNICODE: u32 = 0x0000_0001;
const REQUEST_TARGET: u32 = 0x0000_0004;
const NEGOTIATE_NTLM: u32 = 0x0000_0200;
const NEGOTIATE_ALWAYS_SIGN: u32 = 0x0000_8000;
const NEGOTIATE_EXTENDED_SESSIONSECURITY: u32 = 0x0008_0000;
const NEGOTIATE_TARGET_INFO: u32 = 0x0080_0000;
const NEGOTIATE_128: u32 = 0x2000_0000;
const NEGOTIATE_56: u32 = 0x8000_0000;

const CLIENT_FLAGS: u32 = NEGOTIATE_UNICODE
    | REQUEST_TARGET
    | NEGOTIATE_NTLM
    | NEGOTIATE_ALWAYS_SIGN
    | NEGOTIATE_EXTENDED_SESSIONSECURITY
    | NEGOTIATE_TARGET_INFO
    | NEGOTIATE_128
    | NEGOTIATE_56;

/// AV pair id of the server timestamp inside the challenge's target info.
const AV_TIMESTAMP: u16 = 7;
const AV_EOL: u16 = 0;

/// Seconds between 1601-01-01 and 1970-01-01.
const FILETIME_EPOCH_OFFSET: i64 = 11_644_473_600;

/// Length of the fixed Authenticate header (no version, no MIC).
const AUTHENTICATE_HEADER_LEN: usize = 64;

/// HTTP authentication scheme name.
pub const SCHEME: &str = "NTLM";

type HmacMd5 = Hmac<Md5>;

/// Identity used for the NTLM exchange.
#[derive(Debug, Clone)]
pub struct NtlmIdentity {
    pub domain: String,
    pub username: String,
    pub password: String,
    pub workstation: String,
}

/// Parsed server Challenge (type 2) message.
#[derive(Debug, Clone, PartialEq)]
pub struct Challenge {
    pub flags: u32,
    pub server_challenge: [u8; 8],
    pub target_info: Vec<u8>,
}

impl Challenge {
    /// Parse a raw Challenge message.
    pub fn parse(bytes: &[u8]) -> SyncResult<Self> {
        if bytes.len() < 48 || &bytes[..8] != SIGNATURE || read_u32(bytes, 8)? != 2 {
            return Err(auth_error("Server did not send an NTLM challenge"));
        }

        let flags = read_u32(bytes, 20)?;
        let mut server_challenge = [0u8; 8];
        server_challenge.copy_from_slice(&bytes[24..32]);

        let info_len = usize::from(read_u16(bytes, 40)?);
        let info_offset = read_u32(bytes, 44)? as usize;
        let target_info = bytes
            .get(info_offset..info_offset + info_len)
            .ok_or_else(|| auth_error("NTLM challenge target info out of bounds"))?
            .to_vec();

        Ok(Challenge {
            flags,
            server_challenge,
            target_info,
        })
    }

    /// Parse the base64 token of a `WWW-Authenticate: NTLM <token>` header.
    pub fn from_header(value: &str) -> SyncResult<Self> {
        let token = value
            .trim()
            .strip_prefix(SCHEME)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| auth_error("Missing NTLM challenge in WWW-Authenticate header"))?;

        let bytes = STANDARD
            .decode(token)
            .map_err(|e| auth_error(&format!("Invalid NTLM challenge encoding: {e}")))?;

        Self::parse(&bytes)
    }

    /// Server timestamp from the target info, as a Windows FILETIME.
    fn timestamp(&self) -> Option<u64> {
        let info = &self.target_info;
        let mut pos = 0;
        while pos + 4 <= info.len() {
            let id = u16::from_le_bytes([info[pos], info[pos + 1]]);
            let len = usize::from(u16::from_le_bytes([info[pos + 2], info[pos + 3]]));
            if id == AV_EOL {
                break;
            }
            let value = info.get(pos + 4..pos + 4 + len)?;
            if id == AV_TIMESTAMP && len == 8 {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(value);
                return Some(u64::from_le_bytes(raw));
            }
            pos += 4 + len;
        }
        None
    }
}

/// Build the Negotiate (type 1) message.
pub fn negotiate_message() -> Vec<u8> {
    let mut msg = Vec::with_capacity(32);
    msg.extend_from_slice(SIGNATURE);
    msg.extend_from_slice(&1u32.to_le_bytes());
    msg.extend_from_slice(&CLIENT_FLAGS.to_le_bytes());
    // Empty domain and workstation buffers
    msg.extend_from_slice(&[0u8; 16]);
    msg
}

/// `Authorization` header value for the Negotiate message.
pub fn negotiate_header() -> String {
    format!("{SCHEME} {}", STANDARD.encode(negotiate_message()))
}

/// Build the Authenticate (type 3) message answering `challenge`.
pub fn authenticate_message(
    identity: &NtlmIdentity,
    challenge: &Challenge,
    client_challenge: [u8; 8],
    now_filetime: u64,
) -> SyncResult<Vec<u8>> {
    let v2_hash = ntlmv2_hash(identity)?;
    let timestamp = challenge.timestamp();

    let blob = client_blob(
        timestamp.unwrap_or(now_filetime),
        client_challenge,
        &challenge.target_info,
    );
    let nt_proof = hmac_md5(&v2_hash, &[&challenge.server_challenge, &blob])?;
    let mut nt_response = nt_proof.to_vec();
    nt_response.extend_from_slice(&blob);

    // With a server timestamp present the LMv2 response must be zeroed.
    let lm_response = if timestamp.is_some() {
        vec![0u8; 24]
    } else {
        let mut lm =
            hmac_md5(&v2_hash, &[&challenge.server_challenge, &client_challenge])?.to_vec();
        lm.extend_from_slice(&client_challenge);
        lm
    };

    let domain = utf16le(&identity.domain);
    let user = utf16le(&identity.username);
    let workstation = utf16le(&identity.workstation);

    let flags = (challenge.flags & CLIENT_FLAGS) | NEGOTIATE_UNICODE | NEGOTIATE_NTLM;

    let mut payload = Vec::new();
    let mut buffer = |data: &[u8]| -> SyncResult<[u8; 8]> {
        let offset = AUTHENTICATE_HEADER_LEN + payload.len();
        payload.extend_from_slice(data);
        security_buffer(data.len(), offset)
    };
    let domain_buf = buffer(&domain)?;
    let user_buf = buffer(&user)?;
    let workstation_buf = buffer(&workstation)?;
    let lm_buf = buffer(&lm_response)?;
    let nt_buf = buffer(&nt_response)?;
    let session_key_buf = buffer(&[])?;

    let mut msg = Vec::with_capacity(AUTHENTICATE_HEADER_LEN + payload.len());
    msg.extend_from_slice(SIGNATURE);
    msg.extend_from_slice(&3u32.to_le_bytes());
    msg.extend_from_slice(&lm_buf);
    msg.extend_from_slice(&nt_buf);
    msg.extend_from_slice(&domain_buf);
    msg.extend_from_slice(&user_buf);
    msg.extend_from_slice(&workstation_buf);
    msg.extend_from_slice(&session_key_buf);
    msg.extend_from_slice(&flags.to_le_bytes());
    msg.extend_from_slice(&payload);

    Ok(msg)
}

/// `Authorization` header value answering the challenge, with a fresh client
/// challenge and the current time.
pub fn authenticate_header(identity: &NtlmIdentity, challenge: &Challenge) -> SyncResult<String> {
    let client_challenge: [u8; 8] = rand::random();
    let msg = authenticate_message(identity, challenge, client_challenge, now_filetime())?;
    Ok(format!("{SCHEME} {}", STANDARD.encode(msg)))
}

/// NTOWFv1: MD4 of the UTF-16LE password.
pub fn nt_hash(password: &str) -> [u8; 16] {
    let digest = Md4::digest(utf16le(password));
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest);
    out
}

/// NTOWFv2: HMAC-MD5 keyed by the NT hash over `UPPER(user) + domain`.
pub fn ntlmv2_hash(identity: &NtlmIdentity) -> SyncResult<[u8; 16]> {
    let key = nt_hash(&identity.password);
    let subject = utf16le(&format!(
        "{}{}",
        identity.username.to_uppercase(),
        identity.domain
    ));
    hmac_md5(&key, &[&subject])
}

fn client_blob(timestamp: u64, client_challenge: [u8; 8], target_info: &[u8]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(32 + target_info.len());
    blob.extend_from_slice(&[0x01, 0x01, 0x00, 0x00]);
    blob.extend_from_slice(&[0u8; 4]);
    blob.extend_from_slice(&timestamp.to_le_bytes());
    blob.extend_from_slice(&client_challenge);
    blob.extend_from_slice(&[0u8; 4]);
    blob.extend_from_slice(target_info);
    blob.extend_from_slice(&[0u8; 4]);
    blob
}

fn hmac_md5(key: &[u8], parts: &[&[u8]]) -> SyncResult<[u8; 16]> {
    let mut mac = HmacMd5::new_from_slice(key)
        .map_err(|e| auth_error(&format!("Invalid HMAC key: {e}")))?;
    for part in parts {
        mac.update(part);
    }
    let mut out = [0u8; 16];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

fn security_buffer(len: usize, offset: usize) -> SyncResult<[u8; 8]> {
    let len = u16::try_from(len).map_err(|_| auth_error("NTLM field too long"))?;
    let offset = u32::try_from(offset).map_err(|_| auth_error("NTLM message too long"))?;

    let mut buf = [0u8; 8];
    buf[0..2].copy_from_slice(&len.to_le_bytes());
    buf[2..4].copy_from_slice(&len.to_le_bytes());
    buf[4..8].copy_from_slice(&offset.to_le_bytes());
    Ok(buf)
}

fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

fn now_filetime() -> u64 {
    let now = chrono::Utc::now();
    let secs = u64::try_from(now.timestamp() + FILETIME_EPOCH_OFFSET).unwrap_or_default();
    secs * 10_000_000 + u64::from(now.timestamp_subsec_nanos() / 100)
}

fn read_u16(bytes: &[u8], at: usize) -> SyncResult<u16> {
    bytes
        .get(at..at + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| auth_error("Truncated NTLM message"))
}

fn read_u32(bytes: &[u8], at: usize) -> SyncResult<u32> {
    bytes
        .get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| auth_error("Truncated NTLM message"))
}

fn auth_error(message: &str) -> SyncError {
    SyncError::AuthenticationFailure(message.to_string())
}

/// Build a Challenge message, for tests that play the server side.
#[cfg(test)]
pub(crate) fn challenge_message(server_challenge: [u8; 8], target_info: &[u8]) -> Vec<u8> {
    let mut msg = Vec::new();
    msg.extend_from_slice(SIGNATURE);
    msg.extend_from_slice(&2u32.to_le_bytes());
    // Empty target name located right after the fixed header
    msg.extend_from_slice(&[0, 0, 0, 0, 48, 0, 0, 0]);
    msg.extend_from_slice(&CLIENT_FLAGS.to_le_bytes());
    msg.extend_from_slice(&server_challenge);
    msg.extend_from_slice(&[0u8; 8]);
    let len = target_info.len() as u16;
    msg.extend_from_slice(&len.to_le_bytes());
    msg.extend_from_slice(&len.to_le_bytes());
    msg.extend_from_slice(&48u32.to_le_bytes());
    msg.extend_from_slice(target_info);
    msg
}
