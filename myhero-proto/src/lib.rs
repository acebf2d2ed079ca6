//! MyHero wire protocol - endpoint payloads
//!
//! Every multi-byte integer on the wire is little-endian.

pub mod ble;

use ble::{file_type, opcodes, status};

/// Shared secret size in bytes
pub const AUTH_KEY_SIZE: usize = 32;

/// Chunk size used when the MTU exchange has not narrowed it
pub const DEFAULT_CHUNK_SIZE: usize = 490;

/// Longest path accepted by the file delete endpoint
pub const MAX_DELETE_PATH: usize = 127;

/// Auth status byte
pub const AUTH_STATUS_LOCKED: u8 = 0x00;
pub const AUTH_STATUS_AUTHENTICATED: u8 = 0x01;

/// File list terminator notification
pub const LIST_END_MARKER: [u8; 5] = [file_type::END, 0, 0, 0, 0];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("empty payload")]
    Empty,
    #[error("{what} too short: {len} bytes")]
    TooShort { what: &'static str, len: usize },
    #[error("expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },
    #[error("unknown opcode 0x{0:02x}")]
    UnknownOpcode(u8),
    #[error("unknown file type 0x{0:02x}")]
    UnknownFileType(u8),
    #[error("missing file name")]
    EmptyName,
    #[error("file name is not valid UTF-8")]
    InvalidUtf8,
}

fn read_u32(data: &[u8]) -> u32 {
    u32::from_le_bytes([data[0], data[1], data[2], data[3]])
}

/// Reads a NUL-terminated name; the terminator may be missing
fn read_name(data: &[u8]) -> Result<String, DecodeError> {
    let end = data.iter().position(|b| *b == 0).unwrap_or(data.len());
    let name = std::str::from_utf8(&data[..end]).map_err(|_| DecodeError::InvalidUtf8)?;
    if name.is_empty() {
        return Err(DecodeError::EmptyName);
    }
    Ok(name.to_string())
}

/// Write to the transfer control endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferCommand {
    Cancel,
    Upload { size: u32, name: String },
    Download { name: String },
}

impl TransferCommand {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            TransferCommand::Cancel => vec![opcodes::CANCEL],
            TransferCommand::Upload { size, name } => {
                let mut buf = Vec::with_capacity(1 + 4 + name.len() + 1);
                buf.push(opcodes::UPLOAD);
                buf.extend_from_slice(&size.to_le_bytes());
                buf.extend_from_slice(name.as_bytes());
                buf.push(0);
                buf
            }
            TransferCommand::Download { name } => {
                let mut buf = Vec::with_capacity(1 + name.len() + 1);
                buf.push(opcodes::DOWNLOAD);
                buf.extend_from_slice(name.as_bytes());
                buf.push(0);
                buf
            }
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        let (&opcode, rest) = data.split_first().ok_or(DecodeError::Empty)?;
        match opcode {
            opcodes::CANCEL => Ok(TransferCommand::Cancel),
            opcodes::UPLOAD => {
                if data.len() < 6 {
                    return Err(DecodeError::TooShort { what: "upload command", len: data.len() });
                }
                let size = read_u32(rest);
                let name = read_name(&rest[4..])?;
                Ok(TransferCommand::Upload { size, name })
            }
            opcodes::DOWNLOAD => {
                if data.len() < 2 {
                    return Err(DecodeError::TooShort { what: "download command", len: data.len() });
                }
                Ok(TransferCommand::Download { name: read_name(rest)? })
            }
            other => Err(DecodeError::UnknownOpcode(other)),
        }
    }
}

/// 32-byte shared secret written to the auth key endpoint
#[derive(Clone, PartialEq, Eq)]
pub struct AuthKey(pub [u8; AUTH_KEY_SIZE]);

impl AuthKey {
    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        let key: [u8; AUTH_KEY_SIZE] = data.try_into().map_err(|_| DecodeError::Length {
            expected: AUTH_KEY_SIZE,
            actual: data.len(),
        })?;
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; AUTH_KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuthKey(..)")
    }
}

/// `[status:1][size:4]` notification on the control and data endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusFrame {
    pub status: u8,
    pub size: u32,
}

impl StatusFrame {
    pub fn ready(size: u32) -> Self {
        Self { status: status::READY, size }
    }

    pub fn complete() -> Self {
        Self { status: status::COMPLETE, size: 0 }
    }

    pub fn error() -> Self {
        Self { status: status::ERROR, size: 0 }
    }

    pub fn to_bytes(&self) -> [u8; 5] {
        let size = self.size.to_le_bytes();
        [self.status, size[0], size[1], size[2], size[3]]
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() != 5 {
            return Err(DecodeError::Length { expected: 5, actual: data.len() });
        }
        Ok(Self { status: data[0], size: read_u32(&data[1..]) })
    }
}

/// `[transferred:4][total:4]` read/notified on the progress endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    pub transferred: u32,
    pub total: u32,
}

impl Progress {
    pub fn to_bytes(&self) -> [u8; 8] {
        let mut buf = [0u8; 8];
        buf[..4].copy_from_slice(&self.transferred.to_le_bytes());
        buf[4..].copy_from_slice(&self.total.to_le_bytes());
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() != 8 {
            return Err(DecodeError::Length { expected: 8, actual: data.len() });
        }
        Ok(Self { transferred: read_u32(data), total: read_u32(&data[4..]) })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
}

/// One entry of the file list stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub kind: FileKind,
    pub size: u32,
    pub name: String,
}

impl FileEntry {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(5 + self.name.len() + 1);
        buf.push(match self.kind {
            FileKind::File => file_type::FILE,
            FileKind::Directory => file_type::DIRECTORY,
        });
        buf.extend_from_slice(&self.size.to_le_bytes());
        buf.extend_from_slice(self.name.as_bytes());
        buf.push(0);
        buf
    }
}

/// A decoded file list notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListItem {
    Entry(FileEntry),
    End,
}

impl ListItem {
    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < 5 {
            return Err(DecodeError::TooShort { what: "file list item", len: data.len() });
        }
        let kind = match data[0] {
            file_type::END => return Ok(ListItem::End),
            file_type::FILE => FileKind::File,
            file_type::DIRECTORY => FileKind::Directory,
            other => return Err(DecodeError::UnknownFileType(other)),
        };
        Ok(ListItem::Entry(FileEntry {
            kind,
            size: read_u32(&data[1..]),
            name: read_name(&data[5..])?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_command_decodes_size_and_name() {
        let mut data = vec![opcodes::UPLOAD];
        data.extend_from_slice(&1200u32.to_le_bytes());
        data.extend_from_slice(b"song.wav\0");

        let cmd = TransferCommand::from_bytes(&data).unwrap();
        assert_eq!(cmd, TransferCommand::Upload { size: 1200, name: "song.wav".into() });
    }

    #[test]
    fn name_terminator_is_optional() {
        let cmd = TransferCommand::from_bytes(b"\x02notes.wav").unwrap();
        assert_eq!(cmd, TransferCommand::Download { name: "notes.wav".into() });
    }

    #[test]
    fn name_stops_at_first_nul() {
        let cmd = TransferCommand::from_bytes(b"\x02a.wav\0junk").unwrap();
        assert_eq!(cmd, TransferCommand::Download { name: "a.wav".into() });
    }

    #[test]
    fn cancel_ignores_trailing_bytes() {
        assert_eq!(TransferCommand::from_bytes(&[0x00, 0xAA]).unwrap(), TransferCommand::Cancel);
    }

    #[test]
    fn malformed_commands_are_rejected() {
        assert_eq!(TransferCommand::from_bytes(&[]), Err(DecodeError::Empty));
        assert_eq!(TransferCommand::from_bytes(&[0x07]), Err(DecodeError::UnknownOpcode(0x07)));
        assert!(matches!(
            TransferCommand::from_bytes(&[0x01, 1, 0, 0, 0]),
            Err(DecodeError::TooShort { .. })
        ));
        assert!(matches!(TransferCommand::from_bytes(&[0x02]), Err(DecodeError::TooShort { .. })));
        assert_eq!(TransferCommand::from_bytes(&[0x02, 0]), Err(DecodeError::EmptyName));
        assert_eq!(TransferCommand::from_bytes(&[0x02, 0xFF, 0xFE]), Err(DecodeError::InvalidUtf8));
    }

    #[test]
    fn auth_key_must_be_exactly_32_bytes() {
        assert!(AuthKey::from_bytes(&[7u8; 32]).is_ok());
        assert_eq!(
            AuthKey::from_bytes(&[7u8; 31]),
            Err(DecodeError::Length { expected: 32, actual: 31 })
        );
        assert!(AuthKey::from_bytes(&[7u8; 33]).is_err());
    }

    #[test]
    fn status_frame_layout() {
        assert_eq!(StatusFrame::ready(0x0102_0304).to_bytes(), [0x01, 0x04, 0x03, 0x02, 0x01]);
        assert_eq!(StatusFrame::complete().to_bytes(), [0x02, 0, 0, 0, 0]);
        assert_eq!(StatusFrame::error().to_bytes(), [0x00, 0, 0, 0, 0]);
    }

    #[test]
    fn progress_layout() {
        let p = Progress { transferred: 500, total: 1200 };
        assert_eq!(p.to_bytes(), [0xF4, 0x01, 0, 0, 0xB0, 0x04, 0, 0]);
        assert_eq!(Progress::from_bytes(&p.to_bytes()).unwrap(), p);
    }

    #[test]
    fn file_list_items() {
        let entry = FileEntry { kind: FileKind::File, size: 77, name: "rec/a.wav".into() };
        let bytes = entry.to_bytes();
        assert_eq!(&bytes[..5], &[0x00, 77, 0, 0, 0]);
        assert_eq!(*bytes.last().unwrap(), 0);
        assert_eq!(ListItem::from_bytes(&bytes).unwrap(), ListItem::Entry(entry));
        assert_eq!(ListItem::from_bytes(&LIST_END_MARKER).unwrap(), ListItem::End);
        assert_eq!(ListItem::from_bytes(&[0x09, 0, 0, 0, 0, b'x']), Err(DecodeError::UnknownFileType(0x09)));
    }

    #[test]
    fn endpoints_map_to_uuids() {
        assert_eq!(
            ble::Endpoint::from_uuid("00000204-4D59-4842-8000-00805F9B34FB"),
            Some(ble::Endpoint::TransferData)
        );
        assert_eq!(ble::Endpoint::BatteryLevel.uuid(), None);
        assert!(ble::Endpoint::AuthKeyClear.is_open());
        assert!(!ble::Endpoint::FileList.is_open());
    }
}
