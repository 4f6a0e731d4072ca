//! Posting cursor: the bookmark of upload progress.

/// First interval boundary strictly after `t`
pub fn next_boundary(t: u32, interval: u32) -> u32 {
    t + interval - (t % interval)
}

/// Last interval boundary at or before `t`
pub fn floor_boundary(t: u32, interval: u32) -> u32 {
    t - (t % interval)
}

/// `last_posted_time` / `next_posting_time` pair
///
/// `next_posting_time` is always a multiple of the interval. It moves when an
/// interval is folded or skipped and when realigned to the wall clock, never
/// when a batch is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostingCursor {
    interval: u32,
    last_posted: u32,
    next_posting: u32,
}

impl PostingCursor {
    /// Cursor whose last post is the record at `last_posted`
    pub fn resume_from(last_posted: u32, interval: u32) -> Self {
        Self {
            interval,
            last_posted,
            next_posting: next_boundary(last_posted, interval),
        }
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    pub fn last_posted(&self) -> u32 {
        self.last_posted
    }

    pub fn next_posting(&self) -> u32 {
        self.next_posting
    }

    /// Start of the interval that ends at `next_posting`
    pub fn interval_start(&self) -> u32 {
        self.next_posting.saturating_sub(self.interval)
    }

    /// The interval ending at `next_posting` was folded into the batch
    pub fn advance(&mut self) {
        self.last_posted = self.next_posting;
        self.next_posting = next_boundary(self.next_posting, self.interval);
    }

    /// The interval ending at `next_posting` carried no elapsed time
    pub fn skip(&mut self) {
        self.next_posting = next_boundary(self.next_posting, self.interval);
    }

    /// Re-anchor on the wall clock when the log has nothing newer
    pub fn realign(&mut self, now: u32) {
        self.next_posting = next_boundary(now, self.interval);
    }
}
