// SPDX-License-Identifier: Apache-2.0
//! Identifier types shared across the build and detection phases.

use serde::{Deserialize, Serialize};

/// Canonical 256-bit SHA-256 digest used as the atomic fingerprint unit.
pub type Sha256 = [u8; 32];

/// Strongly typed SHA-256 file fingerprint.
///
/// Thin newtype over [`Sha256`]. The inner bytes are public for zero-cost
/// access; the `Display` impl renders lowercase hex for logging and error
/// messages. The digest is computed by the external scanner — the engine
/// never hashes file contents itself.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ChecksumDigest(pub Sha256);

impl ChecksumDigest {
    /// View the digest as a byte slice.
    pub fn as_bytes(&self) -> &Sha256 {
        &self.0
    }

    /// Parse a digest from its 64-character lowercase or uppercase hex form.
    ///
    /// # Errors
    ///
    /// Returns [`DigestParseError`] when the input is not valid hex or does
    /// not decode to exactly 32 bytes.
    pub fn from_hex(text: &str) -> Result<Self, DigestParseError> {
        let raw = hex::decode(text)?;
        let bytes: Sha256 = raw
            .try_into()
            .map_err(|raw: Vec<u8>| DigestParseError::BadLength(raw.len()))?;
        Ok(Self(bytes))
    }
}

impl std::fmt::Display for ChecksumDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Errors from parsing a hex digest.
#[derive(Debug, thiserror::Error)]
pub enum DigestParseError {
    /// The text is not valid hexadecimal.
    #[error("[DIGEST_HEX] {0}")]
    InvalidHex(#[from] hex::FromHexError),
    /// The hex decoded to a length other than 32 bytes.
    #[error("[DIGEST_LEN] expected 32 bytes, got {0}")]
    BadLength(usize),
}

/// Dense app-version identifier assigned at database serialisation time.
///
/// Ids are 4-byte big-endian on the wire and double as the store key of the
/// app-version record they name. They are dense and start at zero, so in
/// practice they stay far below the `0xFF` barrier byte that terminates a
/// checksum record's id block.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct AvId(pub u32);

impl AvId {
    /// Big-endian wire representation, also used as the store key.
    pub fn to_be_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    /// Rebuild an id from its big-endian wire representation.
    pub fn from_be_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(bytes))
    }
}

impl std::fmt::Display for AvId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// App name suffix marking a CMS core (`wordpress-cores`, `drupal-cores`, ...).
pub const CORE_SUFFIX: &str = "-cores";
/// App name of the WordPress core itself.
pub const WORDPRESS_CORE: &str = "wordpress-cores";
/// App name prefix for WordPress plugins.
pub const WP_PLUGIN_PREFIX: &str = "wp.p";
/// App name prefix for WordPress themes.
pub const WP_THEME_PREFIX: &str = "wp.t";

/// A specific release of a specific application.
///
/// Identity is the (app, version) string pair; it is the build-time key of
/// the bipartite graph. The app name encodes the classification consumed by
/// the nesting step — see the prefix/suffix constants above.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct AppVersion {
    /// Application name, e.g. `wordpress-cores` or `wp.pakismet`.
    pub app: String,
    /// Release version string.
    pub version: String,
}

impl AppVersion {
    /// Build an app-version from its two identity strings.
    pub fn new<A: Into<String>, V: Into<String>>(app: A, version: V) -> Self {
        Self {
            app: app.into(),
            version: version.into(),
        }
    }

    /// Returns `true` for CMS cores (app name ends with `-cores`).
    pub fn is_core(&self) -> bool {
        self.app.ends_with(CORE_SUFFIX)
    }

    /// Returns `true` for the WordPress core itself.
    pub fn is_wordpress(&self) -> bool {
        self.app == WORDPRESS_CORE
    }

    /// Returns `true` for WordPress plugins (app name starts with `wp.p`).
    pub fn is_wordpress_plugin(&self) -> bool {
        self.app.starts_with(WP_PLUGIN_PREFIX)
    }

    /// Returns `true` for WordPress themes (app name starts with `wp.t`).
    pub fn is_wordpress_theme(&self) -> bool {
        self.app.starts_with(WP_THEME_PREFIX)
    }

    /// Reporting tag for this app, if it belongs to a tagged family.
    ///
    /// Plugins map to `wp_plugin_<name>`, themes to `wp_theme_<name>` (with
    /// `-` folded to `_`), the known cores to `wp_core`/`drupal_core`/
    /// `joomla_core`, any other core to `other_apps`. Apps outside those
    /// families have no tag.
    pub fn tag(&self) -> Option<String> {
        if let Some(name) = self.app.strip_prefix(WP_PLUGIN_PREFIX) {
            return Some(format!("wp_plugin_{}", name.replace('-', "_")));
        }
        if let Some(name) = self.app.strip_prefix(WP_THEME_PREFIX) {
            return Some(format!("wp_theme_{}", name.replace('-', "_")));
        }
        if self.is_core() {
            return Some(
                match self.app.as_str() {
                    "wordpress-cores" => "wp_core",
                    "drupal-cores" => "drupal_core",
                    "joomla-cores" => "joomla_core",
                    _ => "other_apps",
                }
                .to_string(),
            );
        }
        None
    }
}

impl std::fmt::Display for AppVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.app, self.version)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ── 1. digest hex round-trip ────────────────────────────────────────

    #[test]
    fn digest_hex_round_trip() {
        let digest = ChecksumDigest([0xAB; 32]);
        let text = digest.to_string();
        assert_eq!(text.len(), 64);
        assert_eq!(ChecksumDigest::from_hex(&text).unwrap(), digest);
    }

    // ── 2. digest parse rejects wrong length and bad hex ────────────────

    #[test]
    fn digest_parse_rejects_malformed() {
        assert!(matches!(
            ChecksumDigest::from_hex("abcd").unwrap_err(),
            DigestParseError::BadLength(2)
        ));
        assert!(matches!(
            ChecksumDigest::from_hex("zz").unwrap_err(),
            DigestParseError::InvalidHex(_)
        ));
    }

    // ── 3. app classification by prefix/suffix ──────────────────────────

    #[test]
    fn app_classification() {
        let core = AppVersion::new("wordpress-cores", "5.2");
        assert!(core.is_core());
        assert!(core.is_wordpress());
        assert!(!core.is_wordpress_plugin());

        let plugin = AppVersion::new("wp.pakismet", "4.1");
        assert!(plugin.is_wordpress_plugin());
        assert!(!plugin.is_core());

        let theme = AppVersion::new("wp.ttwentytwenty", "1.0");
        assert!(theme.is_wordpress_theme());
    }

    // ── 4. reporting tags ───────────────────────────────────────────────

    #[test]
    fn reporting_tags() {
        assert_eq!(
            AppVersion::new("wp.pall-in-one-seo", "1").tag().unwrap(),
            "wp_plugin_all_in_one_seo"
        );
        assert_eq!(
            AppVersion::new("wp.ttwentytwenty", "1").tag().unwrap(),
            "wp_theme_twentytwenty"
        );
        assert_eq!(AppVersion::new("wordpress-cores", "5").tag().unwrap(), "wp_core");
        assert_eq!(AppVersion::new("drupal-cores", "8").tag().unwrap(), "drupal_core");
        assert_eq!(AppVersion::new("typo3-cores", "9").tag().unwrap(), "other_apps");
        assert!(AppVersion::new("somelib", "1").tag().is_none());
    }

    // ── 5. av id wire form is big-endian ────────────────────────────────

    #[test]
    fn av_id_wire_form() {
        let id = AvId(0x0102_0304);
        assert_eq!(id.to_be_bytes(), [1, 2, 3, 4]);
        assert_eq!(AvId::from_be_bytes([1, 2, 3, 4]), id);
    }
}
