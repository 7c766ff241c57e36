//! Sets of live stack sub-areas.
//!
//! A [`SubAreaSet`] maps each area to a list of pairwise non-overlapping
//! byte intervals. Insertion coalesces overlapping or adjacent intervals
//! into the smallest enclosing one; removal subtracts an interval,
//! leaving up to two fragments of each entry it cuts. Intervals are kept
//! exact because the liveness feeding slot reuse cannot afford
//! over-approximation; bitmaps are unsuitable since widths are arbitrary.

use std::collections::BTreeMap;

use smallvec::SmallVec;

use cmmc_ir::{Area, SubArea};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    hi: i32,
    width: i32,
}

impl Span {
    fn lo(self) -> i32 {
        self.hi - self.width
    }
}

type SpanList = SmallVec<[Span; 4]>;

#[derive(Debug, Clone, Default)]
pub struct SubAreaSet {
    areas: BTreeMap<Area, SpanList>,
}

impl SubAreaSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.areas.is_empty()
    }

    /// Make `sub` live.
    ///
    /// Returns `false` iff an existing interval already covers `sub`
    /// (nothing changed). Otherwise the interval is merged with every
    /// entry it overlaps or touches, and the result is `true`.
    pub fn insert(&mut self, sub: SubArea) -> bool {
        let spans = self.areas.entry(sub.area).or_default();
        let mut hi = sub.hi;
        let mut lo = sub.lo();

        let mut i = 0;
        while i < spans.len() {
            let s = spans[i];
            if s.hi >= hi && s.lo() <= lo {
                return false;
            }
            if hi < s.lo() || lo > s.hi {
                i += 1;
                continue;
            }
            hi = hi.max(s.hi);
            lo = lo.min(s.lo());
            spans.swap_remove(i);
        }
        spans.push(Span { hi, width: hi - lo });
        true
    }

    /// Make every byte of `sub` dead, fragmenting any entry it cuts.
    pub fn remove(&mut self, sub: SubArea) {
        let Some(spans) = self.areas.get_mut(&sub.area) else {
            return;
        };
        let hi = sub.hi;
        let lo = sub.lo();

        let mut out = SpanList::new();
        for s in spans.drain(..) {
            if s.hi <= lo || s.lo() >= hi {
                out.push(s);
                continue;
            }
            if s.hi > hi {
                out.push(Span {
                    hi: s.hi,
                    width: s.hi - hi,
                });
            }
            if lo > s.lo() {
                out.push(Span {
                    hi: lo,
                    width: lo - s.lo(),
                });
            }
        }
        let emptied = out.is_empty();
        *spans = out;
        if emptied {
            self.areas.remove(&sub.area);
        }
    }

    /// Drop every interval belonging to `area`.
    pub fn remove_area(&mut self, area: Area) {
        self.areas.remove(&area);
    }

    /// Does any live byte fall inside `sub`?
    pub fn overlaps(&self, sub: SubArea) -> bool {
        self.areas
            .get(&sub.area)
            .is_some_and(|spans| {
                spans
                    .iter()
                    .any(|s| s.hi > sub.lo() && s.lo() < sub.hi)
            })
    }

    /// Lattice join: union every interval of `other` into `self`,
    /// reporting whether anything new became live.
    pub fn union_with(&mut self, other: &Self) -> bool {
        let mut changed = false;
        for sub in other.iter() {
            changed |= self.insert(sub);
        }
        changed
    }

    pub fn iter(&self) -> impl Iterator<Item = SubArea> + '_ {
        self.areas.iter().flat_map(|(&area, spans)| {
            spans.iter().map(move |s| SubArea::new(area, s.hi, s.width))
        })
    }

    pub fn areas(&self) -> impl Iterator<Item = Area> + '_ {
        self.areas.keys().copied()
    }
}
