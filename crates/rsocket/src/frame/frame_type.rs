use crate::protocol::ProtocolError;

/// Frame type codes as carried in the frame header.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Setup = 0x01,
    Lease = 0x02,
    Keepalive = 0x03,
    RequestResponse = 0x04,
    RequestFnf = 0x05,
    RequestStream = 0x06,
    RequestSubscription = 0x07,
    RequestChannel = 0x08,
    RequestN = 0x09,
    Cancel = 0x0A,
    Payload = 0x0B,
    Error = 0x0C,
    MetadataPush = 0x0D,
    Resume = 0x0E,
    ResumeOk = 0x0F,
}

impl FrameType {
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Returns true for the frame types that open a new stream.
    #[inline]
    pub fn is_request(self) -> bool {
        matches!(
            self,
            FrameType::RequestResponse
                | FrameType::RequestFnf
                | FrameType::RequestStream
                | FrameType::RequestSubscription
                | FrameType::RequestChannel
        )
    }
}

impl TryFrom<u8> for FrameType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, ProtocolError> {
        let frame_type = match value {
            0x01 => FrameType::Setup,
            0x02 => FrameType::Lease,
            0x03 => FrameType::Keepalive,
            0x04 => FrameType::RequestResponse,
            0x05 => FrameType::RequestFnf,
            0x06 => FrameType::RequestStream,
            0x07 => FrameType::RequestSubscription,
            0x08 => FrameType::RequestChannel,
            0x09 => FrameType::RequestN,
            0x0A => FrameType::Cancel,
            0x0B => FrameType::Payload,
            0x0C => FrameType::Error,
            0x0D => FrameType::MetadataPush,
            0x0E => FrameType::Resume,
            0x0F => FrameType::ResumeOk,
            other => return Err(ProtocolError::UnknownFrameType(other)),
        };
        Ok(frame_type)
    }
}

/// Header flag bits.
pub mod flags {
    pub const METADATA: u8 = 0x01;
    pub const COMPLETE: u8 = 0x02;
    pub const NEXT: u8 = 0x04;
    pub const RESPOND: u8 = 0x08;
    pub const RESUME_ENABLE: u8 = 0x10;
    pub const LEASE: u8 = 0x20;
}
