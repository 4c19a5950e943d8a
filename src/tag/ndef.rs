//! Minimal NDEF message codec
//!
//! Only what a tag identifier needs: unchunked records, short or long payload
//! length, and the well-known text record type. Text records are always
//! written as short records.

use thiserror::Error;

const FLAG_MB: u8 = 0x80;
const FLAG_ME: u8 = 0x40;
const FLAG_CF: u8 = 0x20;
const FLAG_SR: u8 = 0x10;
const FLAG_IL: u8 = 0x08;
const TNF_MASK: u8 = 0x07;

pub const TNF_WELL_KNOWN: u8 = 0x01;
pub const RTD_TEXT: &[u8] = b"T";

/// Language code written into text records. Fixed so tags read the same
/// regardless of the host locale.
pub const TEXT_LANGUAGE: &str = "en";

const TEXT_UTF16: u8 = 0x80;
const TEXT_LANG_LEN_MASK: u8 = 0x3F;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NdefError {
    #[error("message is empty")]
    Empty,

    #[error("message truncated at byte {0}")]
    Truncated(usize),

    #[error("chunked records are not supported")]
    Chunked,

    #[error("language code must be 1-63 bytes, got {0}")]
    LanguageCode(usize),

    #[error("text must not be empty")]
    EmptyText,

    #[error("text record payload is {0} bytes, a short record holds at most 255")]
    PayloadTooLong(usize),

    #[error("record {field} is {len} bytes, at most 255 fit")]
    FieldTooLong { field: &'static str, len: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdefRecord {
    pub tnf: u8,
    pub record_type: Vec<u8>,
    pub id: Vec<u8>,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NdefMessage {
    pub records: Vec<NdefRecord>,
}

impl NdefRecord {
    /// Build a well-known text record (UTF-8)
    pub fn text(text: &str, language: &str) -> Result<Self, NdefError> {
        if text.is_empty() {
            return Err(NdefError::EmptyText);
        }
        let lang = language.as_bytes();
        if lang.is_empty() || lang.len() > TEXT_LANG_LEN_MASK as usize {
            return Err(NdefError::LanguageCode(lang.len()));
        }

        let payload_len = 1 + lang.len() + text.len();
        if payload_len > u8::MAX as usize {
            return Err(NdefError::PayloadTooLong(payload_len));
        }

        let mut payload = Vec::with_capacity(payload_len);
        payload.push(lang.len() as u8);
        payload.extend_from_slice(lang);
        payload.extend_from_slice(text.as_bytes());

        Ok(Self {
            tnf: TNF_WELL_KNOWN,
            record_type: RTD_TEXT.to_vec(),
            id: Vec::new(),
            payload,
        })
    }

    pub fn is_text(&self) -> bool {
        self.tnf == TNF_WELL_KNOWN && self.record_type == RTD_TEXT
    }

    /// Text content of a well-known text record, `None` for anything else.
    /// UTF-16 payloads are decoded according to their byte order mark (big
    /// endian when absent).
    pub fn as_text(&self) -> Option<String> {
        if !self.is_text() {
            return None;
        }
        let (&status, rest) = self.payload.split_first()?;
        let lang_len = (status & TEXT_LANG_LEN_MASK) as usize;
        let body = rest.get(lang_len..)?;

        if status & TEXT_UTF16 == 0 {
            return String::from_utf8(body.to_vec()).ok();
        }

        let (little_endian, body) = match body {
            [0xFF, 0xFE, tail @ ..] => (true, tail),
            [0xFE, 0xFF, tail @ ..] => (false, tail),
            _ => (false, body),
        };
        let units: Vec<u16> = body
            .chunks_exact(2)
            .map(|pair| {
                if little_endian {
                    u16::from_le_bytes([pair[0], pair[1]])
                } else {
                    u16::from_be_bytes([pair[0], pair[1]])
                }
            })
            .collect();
        String::from_utf16(&units).ok()
    }

    fn encode_into(&self, out: &mut Vec<u8>, first: bool, last: bool) -> Result<(), NdefError> {
        let type_len = field_len("type", &self.record_type)?;
        let id_len = field_len("id", &self.id)?;
        let short = self.payload.len() <= u8::MAX as usize;

        let mut header = self.tnf & TNF_MASK;
        if first {
            header |= FLAG_MB;
        }
        if last {
            header |= FLAG_ME;
        }
        if short {
            header |= FLAG_SR;
        }
        if !self.id.is_empty() {
            header |= FLAG_IL;
        }

        out.push(header);
        out.push(type_len);
        if short {
            out.push(self.payload.len() as u8);
        } else {
            out.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        }
        if !self.id.is_empty() {
            out.push(id_len);
        }
        out.extend_from_slice(&self.record_type);
        out.extend_from_slice(&self.id);
        out.extend_from_slice(&self.payload);
        Ok(())
    }
}

fn field_len(field: &'static str, bytes: &[u8]) -> Result<u8, NdefError> {
    u8::try_from(bytes.len()).map_err(|_| NdefError::FieldTooLong {
        field,
        len: bytes.len(),
    })
}

impl NdefMessage {
    /// A message holding a single text record
    pub fn text(text: &str) -> Result<Self, NdefError> {
        Ok(Self {
            records: vec![NdefRecord::text(text, TEXT_LANGUAGE)?],
        })
    }

    /// Text of the first text record, if any
    pub fn first_text(&self) -> Option<String> {
        self.records.iter().find_map(NdefRecord::as_text)
    }

    pub fn encode(&self) -> Result<Vec<u8>, NdefError> {
        let mut out = Vec::new();
        let count = self.records.len();
        for (i, record) in self.records.iter().enumerate() {
            record.encode_into(&mut out, i == 0, i + 1 == count)?;
        }
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, NdefError> {
        if bytes.is_empty() {
            return Err(NdefError::Empty);
        }

        let mut cursor = Cursor { bytes, pos: 0 };
        let mut records = Vec::new();

        loop {
            let header = cursor.byte()?;
            if header & FLAG_CF != 0 {
                return Err(NdefError::Chunked);
            }

            let type_len = cursor.byte()? as usize;
            let payload_len = if header & FLAG_SR != 0 {
                cursor.byte()? as usize
            } else {
                let raw = cursor.take(4)?;
                u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize
            };
            let id_len = if header & FLAG_IL != 0 {
                cursor.byte()? as usize
            } else {
                0
            };

            let record_type = cursor.take(type_len)?.to_vec();
            let id = cursor.take(id_len)?.to_vec();
            let payload = cursor.take(payload_len)?.to_vec();

            records.push(NdefRecord {
                tnf: header & TNF_MASK,
                record_type,
                id,
                payload,
            });

            if header & FLAG_ME != 0 || cursor.is_at_end() {
                break;
            }
        }

        Ok(Self { records })
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn byte(&mut self) -> Result<u8, NdefError> {
        Ok(self.take(1)?[0])
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], NdefError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(NdefError::Truncated(self.pos))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }
}
