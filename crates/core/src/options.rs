//! Read options
//!
//! [`GetOptions`] controls how a subtree is rendered on read: listing depth,
//! formatting, JSONP wrapping, and a key range/limit over the top-level children.
//!
//! Key bounds follow the scan direction. Under [`Order::Desc`] the scan starts
//! at the high end, so `start_*` bounds cap the range from above and `end_*`
//! bounds from below.

use crate::error::Result;
use crate::path::{increment_key, JsonPath, PathSegment};
use serde::{Deserialize, Serialize};

/// Direction in which top-level children are listed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    /// Ascending path order
    #[default]
    Asc,
    /// Descending path order
    Desc,
}

/// Options for reading a subtree
///
/// # Example
///
/// ```
/// use jsondb_core::options::GetOptions;
///
/// let opts = GetOptions::default().shallow(true).pretty_print(true);
/// assert_eq!(opts.effective_depth(), Some(1));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetOptions {
    /// Collapse everything below the first level into `true` placeholders
    pub shallow: bool,
    /// Collapse everything below this many levels into `true` placeholders
    pub depth: Option<usize>,
    /// Indent the output
    pub pretty_print: bool,
    /// Wrap the output as `callback(...)`
    pub callback: Option<String>,
    /// Emit at most this many top-level children
    pub limit_to_first: Option<usize>,
    /// Listing direction of the top-level children
    pub order: Order,
    /// First top-level key to include
    pub start_at: Option<String>,
    /// Only include top-level keys after this one
    pub start_after: Option<String>,
    /// Last top-level key to include
    pub end_at: Option<String>,
    /// Only include top-level keys before this one
    pub end_before: Option<String>,
}

impl GetOptions {
    /// Set the shallow flag
    pub fn shallow(mut self, shallow: bool) -> Self {
        self.shallow = shallow;
        self
    }

    /// Set the listing depth
    pub fn depth(mut self, depth: usize) -> Self {
        self.depth = Some(depth);
        self
    }

    /// Set pretty printing
    pub fn pretty_print(mut self, pretty: bool) -> Self {
        self.pretty_print = pretty;
        self
    }

    /// Set the JSONP callback name
    pub fn callback(mut self, name: impl Into<String>) -> Self {
        self.callback = Some(name.into());
        self
    }

    /// Limit the number of top-level children
    pub fn limit_to_first(mut self, limit: usize) -> Self {
        self.limit_to_first = Some(limit);
        self
    }

    /// Set the listing direction
    pub fn order(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    /// Start at this top-level key (inclusive)
    pub fn start_at(mut self, key: impl Into<String>) -> Self {
        self.start_at = Some(key.into());
        self
    }

    /// Start after this top-level key (exclusive)
    ///
    /// In ascending order the bound is the key with its last character
    /// incremented, so keys that extend `key` are skipped too:
    /// `start_after("user1")` drops `user10` along with `user1`.
    pub fn start_after(mut self, key: impl Into<String>) -> Self {
        self.start_after = Some(key.into());
        self
    }

    /// End at this top-level key (inclusive)
    ///
    /// In ascending order the bound is the key with its last character
    /// incremented, so keys that extend `key` are kept too:
    /// `end_at("user1")` keeps `user10`.
    pub fn end_at(mut self, key: impl Into<String>) -> Self {
        self.end_at = Some(key.into());
        self
    }

    /// End before this top-level key (exclusive)
    pub fn end_before(mut self, key: impl Into<String>) -> Self {
        self.end_before = Some(key.into());
        self
    }

    /// Depth beyond which records collapse; `shallow` wins over `depth`.
    pub fn effective_depth(&self) -> Option<usize> {
        if self.shallow {
            Some(1)
        } else {
            self.depth
        }
    }

    /// Translate the key bounds into extra path bounds for a scan under `base`.
    ///
    /// Stored paths always end in `/`, so `path < P+key` and `path <= P+key`
    /// select the same rows, as do `path >= P+key` and `path > P+key`.
    pub fn key_range(&self, base: &JsonPath) -> Result<KeyRange> {
        let prefix = base.db_prefix();
        let at = |key: &str| -> Result<String> {
            Ok(format!("{}{}", prefix, PathSegment::parse(key)?.encode()))
        };
        let past = |key: &str| -> Result<String> {
            Ok(format!("{}{}", prefix, increment_key(&PathSegment::parse(key)?.encode())))
        };

        let mut range = KeyRange {
            order: self.order,
            ..KeyRange::default()
        };
        match self.order {
            Order::Asc => {
                if let Some(key) = &self.start_at {
                    range.raise_lower(at(key)?);
                }
                if let Some(key) = &self.start_after {
                    range.raise_lower(past(key)?);
                }
                if let Some(key) = &self.end_at {
                    range.lower_upper(past(key)?);
                }
                if let Some(key) = &self.end_before {
                    range.lower_upper(at(key)?);
                }
            }
            Order::Desc => {
                if let Some(key) = &self.start_at {
                    range.lower_upper(past(key)?);
                }
                if let Some(key) = &self.start_after {
                    range.lower_upper(at(key)?);
                }
                if let Some(key) = &self.end_at {
                    range.raise_lower(at(key)?);
                }
                if let Some(key) = &self.end_before {
                    range.raise_lower(past(key)?);
                }
            }
        }
        Ok(range)
    }
}

/// Additional half-open path bounds, `lower <= path < upper`, and the
/// direction to scan them in
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyRange {
    /// Inclusive lower bound
    pub lower: Option<String>,
    /// Exclusive upper bound
    pub upper: Option<String>,
    /// Scan direction
    pub order: Order,
}

impl KeyRange {
    fn raise_lower(&mut self, bound: String) {
        match &self.lower {
            Some(current) if *current >= bound => {}
            _ => self.lower = Some(bound),
        }
    }

    fn lower_upper(&mut self, bound: String) {
        match &self.upper {
            Some(current) if *current <= bound => {}
            _ => self.upper = Some(bound),
        }
    }
}
