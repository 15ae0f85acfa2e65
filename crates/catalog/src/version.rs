use std::fmt;
use std::str::FromStr;

use crate::error::CatalogError;

/// The catalog-wide `MAJOR.MINOR.PATCH` counter stored in `version.txt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CatalogVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl CatalogVersion {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Next version after a pass that changed the catalog.  New records bump
    /// the minor component and reset patch; updates alone bump patch.
    pub fn advance(self, had_new_records: bool) -> Result<Self, CatalogError> {
        let overflow = || CatalogError::VersionOverflow(self.to_string());
        if had_new_records {
            let minor = self.minor.checked_add(1).ok_or_else(overflow)?;
            Ok(Self::new(self.major, minor, 0))
        } else {
            let patch = self.patch.checked_add(1).ok_or_else(overflow)?;
            Ok(Self::new(self.major, self.minor, patch))
        }
    }
}

impl FromStr for CatalogVersion {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || CatalogError::MalformedVersion(s.to_string());
        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.len() != 3 {
            return Err(malformed());
        }
        let mut nums = [0u64; 3];
        for (slot, part) in nums.iter_mut().zip(&parts) {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(malformed());
            }
            *slot = part.parse().map_err(|_| malformed())?;
        }
        Ok(Self::new(nums[0], nums[1], nums[2]))
    }
}

impl fmt::Display for CatalogVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
