//! Admission and eviction engine
//!
//! Turns the current entry set of one category plus a candidate list into
//! the entry set the category should hold after this sweep, and an ordered
//! audit log of every decision. The engine is pure: it never touches the
//! filesystem except through the [`TargetInspector`] it is handed, and the
//! resulting [`SweepPlan`] is applied separately by the cache directory
//! manager.
//!
//! # Algorithm
//!
//! 1. Evict entries whose target is gone, unreadable, or older than the
//!    retention window.
//! 2. If the survivors alone exceed the budget (the budget shrank), evict the
//!    least preferred until they fit: entries no longer among the candidates
//!    first, oldest first, then in reverse preference order.
//! 3. Walk candidates in preference order. Present entries are refreshed; a
//!    candidate whose link is owned by a different source re-points it;
//!    otherwise the candidate is admitted if it is statable, under the
//!    per-file cap, and fits in the remaining budget. A candidate that does
//!    not fit is rejected and the walk continues with the next one. A source
//!    evicted for retention is not re-admitted until the following sweep.

pub mod ranking;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::app::models::{Budget, CacheEntry, Candidate, Category};

pub use ranking::{compare_candidates, rank_candidates};

/// What the filesystem says about an entry's source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    /// Regular file of the given size
    Present { size_bytes: u64 },
    /// Gone, or no longer a regular file
    Missing,
    /// Exists but could not be statted
    Unreadable,
}

/// Looks up the state of a source file
pub trait TargetInspector {
    fn inspect(&self, source: &Path) -> TargetState;
}

impl<F> TargetInspector for F
where
    F: Fn(&Path) -> TargetState,
{
    fn inspect(&self, source: &Path) -> TargetState {
        self(source)
    }
}

/// Inspector backed by `stat(2)`, following symlinks
#[derive(Debug, Clone, Copy, Default)]
pub struct FsInspector;

impl TargetInspector for FsInspector {
    fn inspect(&self, source: &Path) -> TargetState {
        match std::fs::metadata(source) {
            Ok(metadata) if metadata.is_file() => TargetState::Present {
                size_bytes: metadata.len(),
            },
            Ok(_) => TargetState::Missing,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => TargetState::Missing,
            Err(_) => TargetState::Unreadable,
        }
    }
}

/// Why an entry left the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictReason {
    /// Target no longer exists
    Broken,
    /// Target could not be statted
    Unreadable,
    /// Older than the retention window
    Expired,
    /// Needed room after the budget shrank
    BudgetPressure,
}

impl fmt::Display for EvictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EvictReason::Broken => "target missing",
            EvictReason::Unreadable => "target unreadable",
            EvictReason::Expired => "retention expired",
            EvictReason::BudgetPressure => "over budget",
        })
    }
}

/// Why a candidate was not admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Size could not be determined
    Unstatable,
    /// Larger than the per-file cap
    TooLarge { size_bytes: u64, cap: u64 },
    /// Does not fit in the remaining budget
    OverBudget { size_bytes: u64, remaining: u64 },
    /// A more preferred candidate already claimed the same link path
    DuplicateLink,
    /// Evicted for retention in this same sweep
    JustExpired,
    /// Evicted to fit a reduced budget in this same sweep
    JustEvicted,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Unstatable => f.write_str("size unknown"),
            SkipReason::TooLarge { size_bytes, cap } => {
                write!(f, "{} bytes exceeds per-file cap {}", size_bytes, cap)
            }
            SkipReason::OverBudget {
                size_bytes,
                remaining,
            } => write!(f, "{} bytes exceeds remaining budget {}", size_bytes, remaining),
            SkipReason::DuplicateLink => f.write_str("link path already claimed"),
            SkipReason::JustExpired => f.write_str("retention expired this sweep"),
            SkipReason::JustEvicted => f.write_str("evicted for budget this sweep"),
        }
    }
}

/// One audit log line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// New entry
    Admit { entry: CacheEntry },
    /// Existing entry confirmed
    Refresh { cache_link: PathBuf },
    /// Existing link switched to a different source
    Repoint {
        previous: CacheEntry,
        entry: CacheEntry,
    },
    /// Entry removed
    Evict {
        entry: CacheEntry,
        reason: EvictReason,
    },
    /// Candidate not admitted
    Skip {
        source_path: PathBuf,
        reason: SkipReason,
    },
}

impl Decision {
    /// Whether applying this decision touches the filesystem
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Decision::Admit { .. } | Decision::Repoint { .. } | Decision::Evict { .. }
        )
    }
}

/// Result of planning one category
#[derive(Debug, Clone)]
pub struct SweepPlan {
    /// Category planned
    pub category: Category,
    /// Budget the plan respects
    pub budget: Budget,
    /// Entry set after the plan is applied, ordered by link path
    pub entries: Vec<CacheEntry>,
    /// Audit log in decision order
    pub decisions: Vec<Decision>,
}

impl SweepPlan {
    /// Aggregate bytes of the resulting entry set
    pub fn aggregate_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.size_bytes).sum()
    }

    /// Entries to create
    pub fn admissions(&self) -> impl Iterator<Item = &CacheEntry> {
        self.decisions.iter().filter_map(|d| match d {
            Decision::Admit { entry } => Some(entry),
            _ => None,
        })
    }

    /// Entries to remove, with the reason
    pub fn evictions(&self) -> impl Iterator<Item = (&CacheEntry, EvictReason)> {
        self.decisions.iter().filter_map(|d| match d {
            Decision::Evict { entry, reason } => Some((entry, *reason)),
            _ => None,
        })
    }

    /// Links to re-point, as (previous, new)
    pub fn repoints(&self) -> impl Iterator<Item = (&CacheEntry, &CacheEntry)> {
        self.decisions.iter().filter_map(|d| match d {
            Decision::Repoint { previous, entry } => Some((previous, entry)),
            _ => None,
        })
    }

    /// Number of filesystem mutations the plan requires
    pub fn mutation_count(&self) -> usize {
        self.decisions.iter().filter(|d| d.is_mutation()).count()
    }

    /// Number of skipped candidates
    pub fn skipped_count(&self) -> usize {
        self.decisions
            .iter()
            .filter(|d| matches!(d, Decision::Skip { .. }))
            .count()
    }
}

/// Plans one category against its budget
#[derive(Debug, Clone)]
pub struct AdmissionEngine {
    category: Category,
    budget: Budget,
    category_dir: PathBuf,
    now: DateTime<Utc>,
}

impl AdmissionEngine {
    /// Engine for `category`, whose links live under `category_dir`
    pub fn new(category: Category, budget: Budget, category_dir: impl Into<PathBuf>) -> Self {
        Self {
            category,
            budget,
            category_dir: category_dir.into(),
            now: Utc::now(),
        }
    }

    /// Plan as of `now` instead of the wall clock
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Compute the plan for this sweep
    ///
    /// `existing` is the category's current entry set and `candidates` the
    /// eligible files in any order; they are ranked with
    /// [`compare_candidates`] before the walk.
    pub fn plan<P: TargetInspector>(
        &self,
        existing: Vec<CacheEntry>,
        candidates: &[Candidate],
        inspector: &P,
    ) -> SweepPlan {
        let mut decisions = Vec::new();

        let mut existing = existing;
        existing.sort_by(|a, b| a.cache_link.cmp(&b.cache_link));
        existing.dedup_by(|a, b| a.cache_link == b.cache_link);

        let mut kept = self.evict_invalid(existing, inspector, &mut decisions);

        let mut ordered: Vec<&Candidate> = candidates.iter().collect();
        ordered.sort_by(|a, b| compare_candidates(a, b));

        let mut preference: HashMap<&Path, usize> = HashMap::new();
        for (index, candidate) in ordered.iter().enumerate() {
            preference
                .entry(candidate.source_path.as_path())
                .or_insert(index);
        }

        self.evict_for_budget(&mut kept, &preference, &mut decisions);

        // Sources evicted above stay out until the next sweep
        let held_back: HashMap<PathBuf, SkipReason> = decisions
            .iter()
            .filter_map(|d| match d {
                Decision::Evict {
                    entry,
                    reason: EvictReason::Expired,
                } => Some((entry.source_path.clone(), SkipReason::JustExpired)),
                Decision::Evict {
                    entry,
                    reason: EvictReason::BudgetPressure,
                } => Some((entry.source_path.clone(), SkipReason::JustEvicted)),
                _ => None,
            })
            .collect();

        self.walk_candidates(&mut kept, &ordered, &held_back, &mut decisions);

        kept.sort_by(|a, b| a.cache_link.cmp(&b.cache_link));
        SweepPlan {
            category: self.category,
            budget: self.budget,
            entries: kept,
            decisions,
        }
    }

    fn evict_invalid<P: TargetInspector>(
        &self,
        existing: Vec<CacheEntry>,
        inspector: &P,
        decisions: &mut Vec<Decision>,
    ) -> Vec<CacheEntry> {
        let mut kept = Vec::with_capacity(existing.len());
        for entry in existing {
            let reason = match inspector.inspect(&entry.source_path) {
                TargetState::Missing => Some(EvictReason::Broken),
                TargetState::Unreadable => Some(EvictReason::Unreadable),
                TargetState::Present { .. }
                    if entry.is_expired(self.budget.retention_days, self.now) =>
                {
                    Some(EvictReason::Expired)
                }
                TargetState::Present { .. } => None,
            };

            match reason {
                Some(reason) => decisions.push(Decision::Evict { entry, reason }),
                None => kept.push(entry),
            }
        }
        kept
    }

    fn evict_for_budget(
        &self,
        kept: &mut Vec<CacheEntry>,
        preference: &HashMap<&Path, usize>,
        decisions: &mut Vec<Decision>,
    ) {
        let mut aggregate: u64 = kept.iter().map(|e| e.size_bytes).sum();
        if aggregate <= self.budget.max_bytes {
            return;
        }

        // Least preferred first: no longer a candidate (oldest first), then
        // in reverse preference order
        let mut order: Vec<usize> = (0..kept.len()).collect();
        order.sort_by_key(|&i| {
            let pref = preference.get(kept[i].source_path.as_path()).copied();
            (pref.is_some(), std::cmp::Reverse(pref), kept[i].added_at)
        });

        let mut evict = HashSet::new();
        for i in order {
            if aggregate <= self.budget.max_bytes {
                break;
            }
            aggregate -= kept[i].size_bytes;
            evict.insert(i);
            decisions.push(Decision::Evict {
                entry: kept[i].clone(),
                reason: EvictReason::BudgetPressure,
            });
        }

        let mut index = 0;
        kept.retain(|_| {
            let keep = !evict.contains(&index);
            index += 1;
            keep
        });
    }

    fn walk_candidates(
        &self,
        kept: &mut Vec<CacheEntry>,
        ordered: &[&Candidate],
        held_back: &HashMap<PathBuf, SkipReason>,
        decisions: &mut Vec<Decision>,
    ) {
        let mut aggregate: u64 = kept.iter().map(|e| e.size_bytes).sum();
        let mut by_source: HashMap<PathBuf, usize> = kept
            .iter()
            .enumerate()
            .map(|(i, e)| (e.source_path.clone(), i))
            .collect();
        let mut by_link: HashMap<PathBuf, usize> = kept
            .iter()
            .enumerate()
            .map(|(i, e)| (e.cache_link.clone(), i))
            .collect();
        let mut claimed: HashSet<PathBuf> = HashSet::new();

        for candidate in ordered {
            if let Some(&i) = by_source.get(&candidate.source_path) {
                // Listed twice: only the first mention counts
                if claimed.insert(kept[i].cache_link.clone()) {
                    kept[i].last_seen_at = self.now;
                    decisions.push(Decision::Refresh {
                        cache_link: kept[i].cache_link.clone(),
                    });
                }
                continue;
            }

            if let Some(&reason) = held_back.get(&candidate.source_path) {
                decisions.push(skip(candidate, reason));
                continue;
            }

            let link = candidate.link_path(&self.category_dir);
            if claimed.contains(&link) {
                decisions.push(skip(candidate, SkipReason::DuplicateLink));
                continue;
            }

            let Some(size) = candidate.size_bytes else {
                decisions.push(skip(candidate, SkipReason::Unstatable));
                continue;
            };

            if size > self.budget.max_file_bytes {
                decisions.push(skip(
                    candidate,
                    SkipReason::TooLarge {
                        size_bytes: size,
                        cap: self.budget.max_file_bytes,
                    },
                ));
                continue;
            }

            if let Some(&i) = by_link.get(&link) {
                let without = aggregate - kept[i].size_bytes;
                if without + size > self.budget.max_bytes {
                    claimed.insert(link);
                    decisions.push(skip(
                        candidate,
                        SkipReason::OverBudget {
                            size_bytes: size,
                            remaining: self.budget.max_bytes - without,
                        },
                    ));
                    continue;
                }

                let previous = kept[i].clone();
                let entry = CacheEntry::new(
                    candidate.source_path.clone(),
                    link.clone(),
                    self.category,
                    size,
                    self.now,
                );
                by_source.remove(&previous.source_path);
                by_source.insert(entry.source_path.clone(), i);
                kept[i] = entry.clone();
                aggregate = without + size;
                claimed.insert(link);
                decisions.push(Decision::Repoint { previous, entry });
                continue;
            }

            if aggregate + size > self.budget.max_bytes {
                decisions.push(skip(
                    candidate,
                    SkipReason::OverBudget {
                        size_bytes: size,
                        remaining: self.budget.max_bytes - aggregate,
                    },
                ));
                continue;
            }

            let entry = CacheEntry::new(
                candidate.source_path.clone(),
                link.clone(),
                self.category,
                size,
                self.now,
            );
            aggregate += size;
            by_source.insert(entry.source_path.clone(), kept.len());
            by_link.insert(link.clone(), kept.len());
            claimed.insert(link);
            kept.push(entry.clone());
            decisions.push(Decision::Admit { entry });
        }
    }
}

fn skip(candidate: &Candidate, reason: SkipReason) -> Decision {
    Decision::Skip {
        source_path: candidate.source_path.clone(),
        reason,
    }
}
