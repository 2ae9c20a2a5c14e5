use std::fmt;
use std::time::{Duration, Instant};

/// A bearer credential for the data store.
///
/// Usable only while `now < issued_at + validity - refresh_buffer`. An
/// unusable credential is replaced, never reused.
#[derive(Clone)]
pub struct Credential {
    token: String,
    issued_at: Instant,
    validity: Duration,
    refresh_buffer: Duration,
}

impl Credential {
    /// Creates a credential issued at `issued_at`.
    #[must_use]
    pub fn new(
        token: impl Into<String>,
        issued_at: Instant,
        validity: Duration,
        refresh_buffer: Duration,
    ) -> Self {
        Self {
            token: token.into(),
            issued_at,
            validity,
            refresh_buffer,
        }
    }

    /// The bearer token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// When the credential was issued.
    #[must_use]
    pub fn issued_at(&self) -> Instant {
        self.issued_at
    }

    /// The instant after which the credential must be refreshed.
    ///
    /// `None` when the buffer swallows the whole validity.
    #[must_use]
    pub fn refresh_deadline(&self) -> Option<Instant> {
        self.validity
            .checked_sub(self.refresh_buffer)
            .filter(|usable| !usable.is_zero())
            .and_then(|usable| self.issued_at.checked_add(usable))
    }

    /// Returns true if the credential may still be used at `now`.
    #[must_use]
    pub fn is_usable_at(&self, now: Instant) -> bool {
        self.refresh_deadline().is_some_and(|deadline| now < deadline)
    }

    /// Returns true if the credential may still be used now.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.is_usable_at(Instant::now())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("validity", &self.validity)
            .field("refresh_buffer", &self.refresh_buffer)
            .field("usable", &self.is_usable())
            .finish()
    }
}
