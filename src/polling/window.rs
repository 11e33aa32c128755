use std::collections::BTreeMap;

/// Reorders items that arrive in arbitrary order, tagged with their offset, into ascending
///  delivery order.
///
/// `start` is the first offset not delivered yet, `end` is one past the highest offset anybody is
///  waiting for. `start <= end` always holds, and `start == end` means the window is closed: there
///  is nothing left to wait for.
///
/// Items are delivered once the contiguous run of collected items starting at `start` reaches
///  them. So an item at offset 5 is held back until 0 to 4 are in (if the window started at 0).
pub struct Window<T> {
    start: u64,
    end: u64,
    collected: BTreeMap<u64, T>,
    /// Keep delivered items so that late lookups via [Window::item] succeed. Subscription windows
    ///  run indefinitely and drop items once they are delivered.
    retain_delivered: bool,
}

impl<T: Clone> Window<T> {
    /// Upper bound for subscription windows, which never close. Offsets at or above this are
    ///  rejected.
    pub const UNBOUNDED_END: u64 = 1 << 53;

    /// A closed window that opens with the first call to [Window::extend]
    pub fn new() -> Window<T> {
        Window {
            start: 0,
            end: 0,
            collected: BTreeMap::default(),
            retain_delivered: true,
        }
    }

    /// A window from offset 0 that never closes
    pub fn unbounded() -> Window<T> {
        Window {
            start: 0,
            end: Self::UNBOUNDED_END,
            collected: BTreeMap::default(),
            retain_delivered: false,
        }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn is_closed(&self) -> bool {
        self.start == self.end
    }

    /// A collected item, delivered or not
    pub fn item(&self, id: u64) -> Option<&T> {
        self.collected.get(&id)
    }

    pub fn is_valid_offset(id: u64) -> bool {
        id < Self::UNBOUNDED_END
    }

    /// Extends the window to wait for `id`. Returns false for an offset that is out of range.
    #[must_use]
    pub fn extend(&mut self, id: u64) -> bool {
        if !Self::is_valid_offset(id) {
            return false;
        }

        if self.is_closed() {
            self.start = id;
            self.end = id + 1;
            return true;
        }

        if id >= self.end {
            self.end = id + 1;
        }
        // waiting for an offset below the window (e.g. a request that was sent earlier but is
        //  awaited later): it is not collected, so re-open the window from there
        if id < self.start && !self.collected.contains_key(&id) {
            self.start = id;
        }
        true
    }

    /// Collects an item and returns the items this makes deliverable, in ascending order. That is
    ///  empty unless `id == start`.
    ///
    /// NB: With a retaining window, an item below `start` that was re-opened by [Window::extend]
    ///  can cause already delivered items to be returned again when the gap closes
    ///
    /// Out of range offsets are ignored.
    pub fn slide(&mut self, id: u64, item: T) -> Vec<(u64, T)> {
        if !Self::is_valid_offset(id) {
            return Vec::new();
        }
        if id < self.start && !self.retain_delivered {
            // already delivered
            return Vec::new();
        }
        self.collected.entry(id).or_insert(item);

        let mut delivered = Vec::new();
        if id != self.start {
            return delivered;
        }

        while self.start < self.end {
            let next = if self.retain_delivered {
                self.collected.get(&self.start).cloned()
            }
            else {
                self.collected.remove(&self.start)
            };

            match next {
                Some(item) => delivered.push((self.start, item)),
                None => break,
            }
            self.start += 1;
        }
        delivered
    }
}
