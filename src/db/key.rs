use std::fmt;

use rusqlite::Row;
use serde::{Deserialize, Serialize};

use crate::models::FeedItem;

/// Sentinels standing in for "below every key" / "above every key".
pub const MIN_KEY: i64 = i64::MIN;
pub const MAX_KEY: i64 = i64::MAX;

/// Composite indexes over `feed_items` that can be range-scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndexName {
    /// `(feed_id, pub_date, id)`
    FeedPubDate,
    /// `(pub_date, id)`
    PubDate,
    /// `(is_read, is_favorite, read_time)`
    ReadState,
    /// `(feed_id, is_read, is_favorite, read_time)`
    FeedReadState,
}

impl IndexName {
    pub const ALL: [IndexName; 4] = [
        IndexName::FeedPubDate,
        IndexName::PubDate,
        IndexName::ReadState,
        IndexName::FeedReadState,
    ];

    pub fn columns(self) -> &'static [&'static str] {
        match self {
            IndexName::FeedPubDate => &["feed_id", "pub_date", "id"],
            IndexName::PubDate => &["pub_date", "id"],
            IndexName::ReadState => &["is_read", "is_favorite", "read_time"],
            IndexName::FeedReadState => &["feed_id", "is_read", "is_favorite", "read_time"],
        }
    }

    pub fn sql_name(self) -> &'static str {
        match self {
            IndexName::FeedPubDate => "idx_feed_items_feed_pub_date_id",
            IndexName::PubDate => "idx_feed_items_pub_date_id",
            IndexName::ReadState => "idx_feed_items_read_state",
            IndexName::FeedReadState => "idx_feed_items_feed_read_state",
        }
    }

    pub fn arity(self) -> usize {
        self.columns().len()
    }

    /// Whether every key of this index names exactly one item.
    pub fn is_total(self) -> bool {
        matches!(self, IndexName::FeedPubDate | IndexName::PubDate)
    }

    pub fn key_of(self, item: &FeedItem) -> CompositeKey {
        let is_read = i64::from(item.is_read);
        let is_favorite = i64::from(item.is_favorite);
        let parts = match self {
            IndexName::FeedPubDate => vec![item.feed_id, item.pub_date, item.id],
            IndexName::PubDate => vec![item.pub_date, item.id],
            IndexName::ReadState => vec![is_read, is_favorite, item.read_time],
            IndexName::FeedReadState => vec![item.feed_id, is_read, is_favorite, item.read_time],
        };
        CompositeKey(parts)
    }

    /// `ORDER BY` clause walking this index; non-total indexes break ties by id.
    pub(crate) fn order_by(self, reverse: bool) -> String {
        let dir = if reverse { "DESC" } else { "ASC" };
        let mut terms: Vec<String> = self
            .columns()
            .iter()
            .map(|c| format!("{c} {dir}"))
            .collect();
        if !self.is_total() {
            terms.push(format!("id {dir}"));
        }
        terms.join(", ")
    }

    /// Reads this index's key from the leading columns of a row.
    pub(crate) fn key_from_row(self, row: &Row) -> rusqlite::Result<CompositeKey> {
        let parts = (0..self.arity())
            .map(|i| row.get::<_, i64>(i))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(CompositeKey(parts))
    }
}

/// A tuple key on one composite index. Ordering is lexicographic, which is
/// also how SQLite compares row values.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CompositeKey(pub Vec<i64>);

impl CompositeKey {
    pub fn parts(&self) -> &[i64] {
        &self.0
    }

    fn padded(&self, arity: usize, fill: i64) -> CompositeKey {
        let mut parts = self.0.clone();
        parts.resize(arity, fill);
        CompositeKey(parts)
    }
}

impl From<Vec<i64>> for CompositeKey {
    fn from(parts: Vec<i64>) -> Self {
        CompositeKey(parts)
    }
}

impl<const N: usize> From<[i64; N]> for CompositeKey {
    fn from(parts: [i64; N]) -> Self {
        CompositeKey(parts.to_vec())
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            match *part {
                MIN_KEY => write!(f, "min")?,
                MAX_KEY => write!(f, "max")?,
                v => write!(f, "{v}")?,
            }
        }
        write!(f, "]")
    }
}

/// A range over one index, always expressed in ascending key order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub lower: CompositeKey,
    pub upper: CompositeKey,
    pub include_lower: bool,
    pub include_upper: bool,
}

impl KeyRange {
    pub fn inclusive(lower: impl Into<CompositeKey>, upper: impl Into<CompositeKey>) -> Self {
        Self {
            lower: lower.into(),
            upper: upper.into(),
            include_lower: true,
            include_upper: true,
        }
    }

    /// Every key of the index.
    pub fn full(index: IndexName) -> Self {
        Self::prefix(index, &[])
    }

    /// Every key starting with `prefix`, e.g. one feed on `FeedPubDate`.
    pub fn prefix(index: IndexName, prefix: &[i64]) -> Self {
        let lower = CompositeKey(prefix.to_vec()).padded(index.arity(), MIN_KEY);
        let upper = CompositeKey(prefix.to_vec()).padded(index.arity(), MAX_KEY);
        Self::inclusive(lower, upper)
    }

    /// Builds a range from two keys given in traversal order. With `reverse`
    /// the traversal runs from high keys to low keys, so the roles flip.
    pub fn traversal(
        from: CompositeKey,
        to: CompositeKey,
        include_from: bool,
        include_to: bool,
        reverse: bool,
    ) -> Self {
        if reverse {
            Self {
                lower: to,
                upper: from,
                include_lower: include_to,
                include_upper: include_from,
            }
        } else {
            Self {
                lower: from,
                upper: to,
                include_lower: include_from,
                include_upper: include_to,
            }
        }
    }

    pub fn is_valid(&self) -> bool {
        match self.lower.cmp(&self.upper) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Equal => self.include_lower && self.include_upper,
            std::cmp::Ordering::Greater => false,
        }
    }

    pub fn contains(&self, key: &CompositeKey) -> bool {
        let above = if self.include_lower {
            key >= &self.lower
        } else {
            key > &self.lower
        };
        let below = if self.include_upper {
            key <= &self.upper
        } else {
            key < &self.upper
        };
        above && below
    }

    /// Pads both bounds to the index arity so short prefixes keep their meaning.
    pub(crate) fn normalized(&self, index: IndexName) -> KeyRange {
        KeyRange {
            lower: self.lower.padded(index.arity(), MIN_KEY),
            upper: self.upper.padded(index.arity(), MAX_KEY),
            include_lower: self.include_lower,
            include_upper: self.include_upper,
        }
    }

    /// `WHERE` fragment restricting `index`'s columns to this range, plus its
    /// positional parameters.
    pub(crate) fn sql_condition(&self, index: IndexName) -> (String, Vec<i64>) {
        let range = self.normalized(index);
        let columns = index.columns();
        let tuple = format!("({})", columns.join(", "));
        let placeholders = format!("({})", vec!["?"; columns.len()].join(", "));
        let lower_op = if range.include_lower { ">=" } else { ">" };
        let upper_op = if range.include_upper { "<=" } else { "<" };
        let sql = format!("{tuple} {lower_op} {placeholders} AND {tuple} {upper_op} {placeholders}");
        let mut params = range.lower.0;
        params.extend(range.upper.0);
        (sql, params)
    }
}
