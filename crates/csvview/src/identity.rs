//
// identity.rs
//
// Stable content-hash identifiers for view rows
//

use sha2::{Digest, Sha256};

/// Separator placed between tracked values before hashing (ASCII unit separator).
pub const FIELD_SEPARATOR: char = '\u{1f}';

pub const DEFAULT_PREFIX: &str = "ROW";
pub const DEFAULT_WIDTH: usize = 12;
const MIN_WIDTH: usize = 4;
const MAX_WIDTH: usize = 64;

/// How a view derives row identifiers: which raw columns are hashed, in what
/// order, and how the digest is rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityScheme {
    /// Raw column names, in hashing order. Empty means "all selected columns".
    pub columns: Vec<String>,
    /// Domain tag placed in front of the digest.
    pub prefix: String,
    /// Number of hex characters kept from the digest.
    pub width: usize,
}

impl Default for IdentityScheme {
    fn default() -> Self {
        Self {
            columns: Vec::new(),
            prefix: DEFAULT_PREFIX.to_string(),
            width: DEFAULT_WIDTH,
        }
    }
}

impl IdentityScheme {
    pub fn new(columns: Vec<String>, prefix: impl Into<String>, width: usize) -> Self {
        Self {
            columns,
            prefix: prefix.into(),
            width,
        }
    }

    pub fn effective_width(&self) -> usize {
        self.width.clamp(MIN_WIDTH, MAX_WIDTH)
    }

    /// Token for one row, given the tracked values in scheme order.
    pub fn compute<S: AsRef<str>>(&self, values: &[Option<S>]) -> String {
        compute_row_identifier(values, &self.prefix, self.effective_width())
    }

    /// Canonical form of a caller-supplied token, or `None` when it cannot
    /// belong to this scheme. Lets lookups skip the scan for foreign tokens.
    pub fn normalize_token(&self, token: &str) -> Option<String> {
        let token = token.trim().to_uppercase();
        let prefix = format!("{}-", self.prefix.to_uppercase());
        let digest = token.strip_prefix(&prefix)?;
        if digest.len() != self.effective_width() || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        Some(token)
    }
}

/// Hash the tracked values of a row into `"{prefix}-{HEX}"`.
///
/// NULL cells hash as the empty string. The result depends only on the values
/// and their order, so two rows with the same tracked content share a token.
pub fn compute_row_identifier<S: AsRef<str>>(
    values: &[Option<S>],
    prefix: &str,
    width: usize,
) -> String {
    let mut hasher = Sha256::new();
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            let mut buf = [0u8; 4];
            hasher.update(FIELD_SEPARATOR.encode_utf8(&mut buf).as_bytes());
        }
        if let Some(v) = value {
            hasher.update(v.as_ref().as_bytes());
        }
    }
    let digest = hasher.finalize();

    let width = width.clamp(MIN_WIDTH, MAX_WIDTH);
    let mut hex = String::with_capacity(64);
    for byte in digest.iter() {
        hex.push_str(&format!("{:02X}", byte));
    }
    hex.truncate(width);

    format!("{}-{}", prefix.to_uppercase(), hex)
}
