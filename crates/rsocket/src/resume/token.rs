use std::fmt;

use bytes::Bytes;

const GENERATED_TOKEN_LEN: usize = 16;

/// Opaque token identifying a resumable session across transports.
///
/// Generated once by the client when the session is created and carried by SETUP and RESUME.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ResumeToken(Bytes);

impl ResumeToken {
    /// Generates a new random token.
    pub fn generate() -> Self {
        let bytes: [u8; GENERATED_TOKEN_LEN] = rand::random();
        Self(Bytes::copy_from_slice(&bytes))
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ResumeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.iter() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ResumeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResumeToken({self})")
    }
}
