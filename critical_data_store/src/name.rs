//! CDS block names

use core::fmt;
use core_types::{PlatformConfig, ResourceError, Result};
use serde::{Deserialize, Serialize};

/// Fully qualified CDS block name, `AppName.BlockName`
///
/// Both parts are non-empty and dot-free. Length limits come from the
/// platform configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct CdsName {
    app: String,
    block: String,
}

impl CdsName {
    /// Builds a name from its two parts, checking them against `config`
    pub fn new(app: &str, block: &str, config: &PlatformConfig) -> Result<Self> {
        check_part("application", app, config.max_api_name_len)?;
        check_part("block", block, config.cds_max_name_len)?;
        Ok(Self {
            app: app.to_string(),
            block: block.to_string(),
        })
    }

    /// Parses `AppName.BlockName`
    pub fn parse(full: &str, config: &PlatformConfig) -> Result<Self> {
        let (app, block) = full.split_once('.').ok_or_else(|| {
            ResourceError::BadArgument(format!("CDS name '{}' is not AppName.BlockName", full))
        })?;
        Self::new(app, block, config)
    }

    /// Application part
    pub fn app(&self) -> &str {
        &self.app
    }

    /// Block part
    pub fn block(&self) -> &str {
        &self.block
    }

    /// Length of the full name in bytes
    pub fn len(&self) -> usize {
        self.app.len() + 1 + self.block.len()
    }

    /// Always false; both parts are non-empty
    pub fn is_empty(&self) -> bool {
        false
    }
}

fn check_part(what: &str, part: &str, max_len: usize) -> Result<()> {
    if part.is_empty() {
        return Err(ResourceError::BadArgument(format!("empty CDS {} name", what)));
    }
    if part.len() > max_len {
        return Err(ResourceError::BadArgument(format!(
            "CDS {} name '{}' longer than {} bytes",
            what, part, max_len
        )));
    }
    if part.contains('.') {
        return Err(ResourceError::BadArgument(format!(
            "CDS {} name '{}' contains '.'",
            what, part
        )));
    }
    Ok(())
}

impl fmt::Display for CdsName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.app, self.block)
    }
}

impl From<CdsName> for String {
    fn from(name: CdsName) -> Self {
        name.to_string()
    }
}

impl TryFrom<String> for CdsName {
    type Error = ResourceError;

    fn try_from(full: String) -> Result<Self> {
        Self::parse(&full, &PlatformConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PlatformConfig {
        PlatformConfig::default()
    }

    #[test]
    fn test_parse_and_display() {
        let name = CdsName::parse("SAMPLE_APP.State", &config()).unwrap();
        assert_eq!(name.app(), "SAMPLE_APP");
        assert_eq!(name.block(), "State");
        assert_eq!(name.to_string(), "SAMPLE_APP.State");
        assert_eq!(name.len(), 16);
    }

    #[test]
    fn test_limits() {
        let config = config();
        let longest_app = "A".repeat(config.max_api_name_len);
        let longest_block = "B".repeat(config.cds_max_name_len);
        let name = CdsName::new(&longest_app, &longest_block, &config).unwrap();
        assert_eq!(name.len(), config.cds_max_full_name_len());

        assert!(CdsName::new(&format!("{}A", longest_app), "B", &config).is_err());
        assert!(CdsName::new("A", &format!("{}B", longest_block), &config).is_err());
    }

    #[test]
    fn test_malformed_names() {
        let config = config();
        for bad in ["NoDot", ".Block", "App.", "App.Blk.Extra", ""] {
            assert!(
                matches!(CdsName::parse(bad, &config), Err(ResourceError::BadArgument(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_serde_as_string() {
        let name = CdsName::parse("App.Blk", &config()).unwrap();
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"App.Blk\"");
        let back: CdsName = serde_json::from_str(&json).unwrap();
        assert_eq!(back, name);
        assert!(serde_json::from_str::<CdsName>("\"nodot\"").is_err());
    }
}
