//! Uid and text remapping table, loaded into [`SharedState`] at startup.
//!
//! ```toml
//! [uids]
//! "04a1b2c3" = "snes/mario.sfc"
//!
//! [texts]
//! "mario" = "snes/mario.sfc"
//! ```
//!
//! [`SharedState`]: crate::SharedState

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::error::{Result, TaptoError};
use crate::token::Token;

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Mappings {
    #[serde(default)]
    pub uids: HashMap<String, String>,
    #[serde(default)]
    pub texts: HashMap<String, String>,
}

pub fn load_mappings(path: &Path) -> Result<Mappings> {
    let content = fs_err::read_to_string(path).map_err(|source| TaptoError::Io {
        context: format!("reading mappings {}", path.display()),
        source,
    })?;
    let mut mappings: Mappings =
        toml::from_str(&content).map_err(|err| TaptoError::MappingsMalformed {
            path: path.to_path_buf(),
            details: err.to_string(),
        })?;
    // Uids are matched case-insensitively; readers disagree on hex case.
    mappings.uids = mappings
        .uids
        .into_iter()
        .map(|(uid, text)| (uid.to_ascii_lowercase(), text))
        .collect();
    Ok(mappings)
}

/// Text to launch for `token`: a uid mapping wins over a text mapping,
/// otherwise the token's own payload.
pub fn resolve_launch_text(
    token: &Token,
    uid_map: &HashMap<String, String>,
    text_map: &HashMap<String, String>,
) -> String {
    if !token.uid.is_empty() {
        if let Some(text) = uid_map.get(&token.uid.to_ascii_lowercase()) {
            return text.clone();
        }
    }
    text_map
        .get(&token.text)
        .cloned()
        .unwrap_or_else(|| token.text.clone())
}
