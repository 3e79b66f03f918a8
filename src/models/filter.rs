use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::db::{CompositeKey, IndexName, KeyRange, MAX_KEY, MIN_KEY};
use crate::models::FeedItem;

/// How long a freshly read item keeps showing up under `Unread`, in ms.
pub const READ_GRACE_MS: i64 = 120_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemFilter {
    All,
    #[default]
    Unread,
    Favorite,
}

impl ItemFilter {
    pub fn cycle(self) -> Self {
        match self {
            ItemFilter::All => ItemFilter::Unread,
            ItemFilter::Unread => ItemFilter::Favorite,
            ItemFilter::Favorite => ItemFilter::All,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ItemFilter::All => "all",
            ItemFilter::Unread => "unread",
            ItemFilter::Favorite => "favorite",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "all" => Some(ItemFilter::All),
            "unread" => Some(ItemFilter::Unread),
            "favorite" | "favourite" | "starred" => Some(ItemFilter::Favorite),
            _ => None,
        }
    }
}

/// One conjunction of the read-state disjunction. `None` leaves a field free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Clause {
    is_read: Option<bool>,
    is_favorite: Option<bool>,
    /// Exclusive lower bound on `read_time`.
    read_after: Option<i64>,
}

impl Clause {
    const ANY: Clause = Clause {
        is_read: None,
        is_favorite: None,
        read_after: None,
    };

    fn matches(&self, item: &FeedItem) -> bool {
        self.is_read.map_or(true, |v| item.is_read == v)
            && self.is_favorite.map_or(true, |v| item.is_favorite == v)
            && self.read_after.map_or(true, |t| item.read_time > t)
    }
}

fn flag_values(flag: Option<bool>) -> &'static [i64] {
    match flag {
        Some(false) => &[0],
        Some(true) => &[1],
        None => &[0, 1],
    }
}

/// Item inclusion rule for a feed selection and filter mode, kept in
/// disjunctive normal form so the boolean test and the index ranges are
/// derived from the same clauses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterPredicate {
    feed_ids: BTreeSet<i64>,
    clauses: Vec<Clause>,
}

impl FilterPredicate {
    pub fn new(feed_ids: impl IntoIterator<Item = i64>, mode: ItemFilter, now: i64) -> Self {
        let clauses = match mode {
            ItemFilter::All => vec![Clause::ANY],
            ItemFilter::Unread => vec![
                Clause {
                    is_read: Some(false),
                    ..Clause::ANY
                },
                // now - read_time < grace  <=>  read_time > now - grace
                Clause {
                    is_read: Some(true),
                    read_after: Some(now.saturating_sub(READ_GRACE_MS)),
                    ..Clause::ANY
                },
            ],
            ItemFilter::Favorite => vec![Clause {
                is_favorite: Some(true),
                ..Clause::ANY
            }],
        };
        Self {
            feed_ids: feed_ids.into_iter().collect(),
            clauses,
        }
    }

    /// Matches everything.
    pub fn all() -> Self {
        Self::new([], ItemFilter::All, 0)
    }

    pub fn feed_ids(&self) -> &BTreeSet<i64> {
        &self.feed_ids
    }

    pub fn includes(&self, item: &FeedItem) -> bool {
        let feed_match = self.feed_ids.is_empty() || self.feed_ids.contains(&item.feed_id);
        feed_match && self.clauses.iter().any(|c| c.matches(item))
    }

    /// Disjoint ranges over the read-state index matching exactly the items
    /// `includes` accepts. The feed-prefixed index is used when the predicate
    /// names feeds.
    pub fn index_ranges(&self) -> (IndexName, Vec<KeyRange>) {
        let prefixes: Vec<Vec<i64>> = if self.feed_ids.is_empty() {
            vec![Vec::new()]
        } else {
            self.feed_ids.iter().map(|id| vec![*id]).collect()
        };
        let index = if self.feed_ids.is_empty() {
            IndexName::ReadState
        } else {
            IndexName::FeedReadState
        };

        let mut ranges = Vec::new();
        for prefix in &prefixes {
            for clause in &self.clauses {
                for &is_read in flag_values(clause.is_read) {
                    for &is_favorite in flag_values(clause.is_favorite) {
                        let mut lower = prefix.clone();
                        lower.extend([is_read, is_favorite, clause.read_after.unwrap_or(MIN_KEY)]);
                        let mut upper = prefix.clone();
                        upper.extend([is_read, is_favorite, MAX_KEY]);
                        ranges.push(KeyRange {
                            lower: CompositeKey(lower),
                            upper: CompositeKey(upper),
                            include_lower: clause.read_after.is_none(),
                            include_upper: true,
                        });
                    }
                }
            }
        }
        (index, ranges)
    }
}

/// Inclusion test for a single item.
pub fn include(item: &FeedItem, feed_ids: &BTreeSet<i64>, mode: ItemFilter, now: i64) -> bool {
    FilterPredicate::new(feed_ids.iter().copied(), mode, now).includes(item)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_699_129_845_568;

    fn item(feed_id: i64, is_read: bool, is_favorite: bool, read_time: i64) -> FeedItem {
        FeedItem {
            id: 1,
            feed_id,
            title: "t".to_string(),
            link: "l".to_string(),
            description: None,
            short_description: None,
            image: None,
            pub_date: NOW,
            is_read,
            is_favorite,
            read_time,
        }
    }

    #[test]
    fn recently_read_items_stay_unread_for_the_grace_window() {
        let feeds = BTreeSet::new();
        let fresh = item(1, true, false, NOW - 60_000);
        let stale = item(1, true, false, NOW - 130_000);
        assert!(include(&fresh, &feeds, ItemFilter::Unread, NOW));
        assert!(!include(&stale, &feeds, ItemFilter::Unread, NOW));
        assert!(include(&item(1, false, false, 0), &feeds, ItemFilter::Unread, NOW));
    }

    #[test]
    fn favorite_and_all_modes() {
        let feeds = BTreeSet::new();
        assert!(include(&item(1, true, true, 0), &feeds, ItemFilter::Favorite, NOW));
        assert!(!include(&item(1, false, false, 0), &feeds, ItemFilter::Favorite, NOW));
        assert!(include(&item(1, true, false, 5), &feeds, ItemFilter::All, NOW));
    }

    #[test]
    fn feed_set_restricts_membership() {
        let feeds: BTreeSet<i64> = [2, 3].into_iter().collect();
        assert!(include(&item(2, false, false, 0), &feeds, ItemFilter::All, NOW));
        assert!(!include(&item(1, false, false, 0), &feeds, ItemFilter::All, NOW));
    }

    #[test]
    fn index_ranges_agree_with_the_predicate() {
        let read_times = [0, 1, NOW - 130_000, NOW - READ_GRACE_MS, NOW - READ_GRACE_MS + 1, NOW - 1, NOW];
        let modes = [ItemFilter::All, ItemFilter::Unread, ItemFilter::Favorite];
        let selections: [Vec<i64>; 3] = [vec![], vec![2], vec![1, 3]];

        for mode in modes {
            for feeds in &selections {
                let predicate = FilterPredicate::new(feeds.iter().copied(), mode, NOW);
                let (index, ranges) = predicate.index_ranges();
                for feed_id in 1..=3 {
                    for is_read in [false, true] {
                        for is_favorite in [false, true] {
                            for read_time in read_times {
                                let it = item(feed_id, is_read, is_favorite, read_time);
                                let key = index.key_of(&it);
                                let hits = ranges.iter().filter(|r| r.contains(&key)).count();
                                assert!(hits <= 1, "ranges overlap for {key}");
                                assert_eq!(
                                    hits == 1,
                                    predicate.includes(&it),
                                    "mode {mode:?} feeds {feeds:?} item {it:?}"
                                );
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn filter_cycles_through_every_mode() {
        let start = ItemFilter::default();
        assert_eq!(start, ItemFilter::Unread);
        assert_eq!(start.cycle().cycle().cycle(), start);
        for mode in [ItemFilter::All, ItemFilter::Unread, ItemFilter::Favorite] {
            assert_eq!(ItemFilter::parse(mode.label()), Some(mode));
        }
    }
}
