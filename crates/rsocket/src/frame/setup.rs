use std::fmt;
use std::time::Duration;

use crate::frame::Payload;
use crate::protocol::SessionError;
use crate::resume::ResumeToken;

/// Protocol version spoken by this engine.
pub const PROTOCOL_VERSION: Version = Version { major: 1, minor: 0 };

const DEFAULT_MIME_TYPE: &str = "application/binary";

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Parameters negotiated by the SETUP frame, immutable once the handshake is done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupPayload {
    version: Version,
    keepalive_interval: Duration,
    max_lifetime: Duration,
    token: Option<ResumeToken>,
    lease: bool,
    metadata_mime_type: String,
    data_mime_type: String,
    payload: Payload,
}

impl Default for SetupPayload {
    fn default() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            keepalive_interval: Duration::from_secs(30),
            max_lifetime: Duration::from_secs(90),
            token: None,
            lease: false,
            metadata_mime_type: DEFAULT_MIME_TYPE.to_owned(),
            data_mime_type: DEFAULT_MIME_TYPE.to_owned(),
            payload: Payload::default(),
        }
    }
}

impl SetupPayload {
    pub fn builder() -> SetupPayloadBuilder {
        SetupPayloadBuilder { inner: SetupPayload::default() }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn keepalive_interval(&self) -> Duration {
        self.keepalive_interval
    }

    pub fn max_lifetime(&self) -> Duration {
        self.max_lifetime
    }

    pub fn token(&self) -> Option<&ResumeToken> {
        self.token.as_ref()
    }

    pub fn is_resumable(&self) -> bool {
        self.token.is_some()
    }

    pub fn honors_lease(&self) -> bool {
        self.lease
    }

    pub fn metadata_mime_type(&self) -> &str {
        &self.metadata_mime_type
    }

    pub fn data_mime_type(&self) -> &str {
        &self.data_mime_type
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Checks what the receiving side requires before any stream may be created.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.version != PROTOCOL_VERSION {
            return Err(SessionError::unsupported_setup(format!("unsupported version {}", self.version)));
        }

        for mime_type in [&self.metadata_mime_type, &self.data_mime_type] {
            if mime_type.parse::<mime::Mime>().is_err() {
                return Err(SessionError::invalid_setup(format!("malformed mime type '{mime_type}'")));
            }
        }

        if self.token.as_ref().is_some_and(ResumeToken::is_empty) {
            return Err(SessionError::invalid_setup("empty resume token"));
        }

        Ok(())
    }
}

#[derive(Debug)]
pub struct SetupPayloadBuilder {
    inner: SetupPayload,
}

impl SetupPayloadBuilder {
    pub fn version(mut self, major: u16, minor: u16) -> Self {
        self.inner.version = Version { major, minor };
        self
    }

    pub fn keepalive(mut self, interval: Duration, max_lifetime: Duration) -> Self {
        self.inner.keepalive_interval = interval;
        self.inner.max_lifetime = max_lifetime;
        self
    }

    pub fn mime_types(mut self, metadata: impl Into<String>, data: impl Into<String>) -> Self {
        self.inner.metadata_mime_type = metadata.into();
        self.inner.data_mime_type = data.into();
        self
    }

    /// Makes the session resumable under the given token.
    pub fn resume_token(mut self, token: ResumeToken) -> Self {
        self.inner.token = Some(token);
        self
    }

    pub fn lease(mut self, lease: bool) -> Self {
        self.inner.lease = lease;
        self
    }

    pub fn payload(mut self, payload: Payload) -> Self {
        self.inner.payload = payload;
        self
    }

    pub fn build(self) -> SetupPayload {
        self.inner
    }
}
