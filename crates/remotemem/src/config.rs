//! Session configuration.

use crate::access::AccessMode;
use crate::error::Result;
use crate::marshal::TextEncoding;
use serde::{Deserialize, Serialize};

/// Options fixed when a session is opened.
///
/// Every field has a default, so a partial JSON object such as
/// `{"access": "read"}` is a complete configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Initial access mode. Can be changed later with `Session::set_mode`.
    pub access: AccessMode,
    /// Relax page protection around every transfer and restore it afterwards.
    pub protection_bracket: bool,
    /// Encoding used by `read_string`/`write_string`.
    pub encoding: TextEncoding,
}

impl SessionOptions {
    /// Parse options from a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_access(mut self, access: AccessMode) -> Self {
        self.access = access;
        self
    }

    pub fn with_protection_bracket(mut self, enabled: bool) -> Self {
        self.protection_bracket = enabled;
        self
    }

    pub fn with_encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = encoding;
        self
    }
}
