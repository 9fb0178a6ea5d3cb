use std::fmt;

/// Error codes carried by ERROR frames.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InvalidSetup,
    UnsupportedSetup,
    RejectedSetup,
    RejectedResume,
    ConnectionError,
    ConnectionClose,
    ApplicationError,
    Rejected,
    Canceled,
    Invalid,
    Other(u32),
}

impl ErrorCode {
    pub fn as_u32(self) -> u32 {
        match self {
            ErrorCode::InvalidSetup => 0x0001,
            ErrorCode::UnsupportedSetup => 0x0002,
            ErrorCode::RejectedSetup => 0x0003,
            ErrorCode::RejectedResume => 0x0004,
            ErrorCode::ConnectionError => 0x0101,
            ErrorCode::ConnectionClose => 0x0102,
            ErrorCode::ApplicationError => 0x0201,
            ErrorCode::Rejected => 0x0202,
            ErrorCode::Canceled => 0x0203,
            ErrorCode::Invalid => 0x0204,
            ErrorCode::Other(code) => code,
        }
    }

    /// Returns true for codes that may only appear on stream 0.
    pub fn is_connection_level(self) -> bool {
        (0x0001..=0x0200).contains(&self.as_u32())
    }
}

impl From<u32> for ErrorCode {
    fn from(code: u32) -> Self {
        match code {
            0x0001 => ErrorCode::InvalidSetup,
            0x0002 => ErrorCode::UnsupportedSetup,
            0x0003 => ErrorCode::RejectedSetup,
            0x0004 => ErrorCode::RejectedResume,
            0x0101 => ErrorCode::ConnectionError,
            0x0102 => ErrorCode::ConnectionClose,
            0x0201 => ErrorCode::ApplicationError,
            0x0202 => ErrorCode::Rejected,
            0x0203 => ErrorCode::Canceled,
            0x0204 => ErrorCode::Invalid,
            other => ErrorCode::Other(other),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}(0x{:04x})", self.as_u32())
    }
}
