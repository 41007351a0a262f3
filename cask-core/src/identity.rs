//! Subjects are issued by an external identity provider; the store only needs
//! a stable, non-empty id it can use as a record key.

use std::fmt;

use crate::error::{CaskError, Result};

const MAX_SUBJECT_LEN: usize = 128;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Subject(String);

impl Subject {
    /// Accept the subject claim of an authenticated request.
    pub fn from_claim(claim: Option<&str>) -> Result<Self> {
        let raw = claim.map(str::trim).unwrap_or_default();
        if raw.is_empty() {
            return Err(CaskError::Unauthenticated("missing subject identifier".into()));
        }
        validate_subject(raw).map_err(|_| {
            CaskError::Unauthenticated(format!("malformed subject identifier {raw:?}"))
        })?;
        Ok(Subject(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Subject {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Subject ids double as path components in directory-backed stores.
pub fn validate_subject(id: &str) -> Result<()> {
    let ok = !id.is_empty()
        && id.len() <= MAX_SUBJECT_LEN
        && !id.starts_with('.')
        && id.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'));
    if ok {
        Ok(())
    } else {
        Err(CaskError::InvalidInput(format!("bad user id {id:?}")))
    }
}
