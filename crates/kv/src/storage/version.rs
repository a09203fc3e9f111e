//! Versions and the per-key version chain
//!
//! A chain is a newest-first list of immutable-once-installed versions.
//! Each version carries a half-open `[start, end)` commit-id interval; a
//! freshly created version is `[MAX, MAX)` until its transaction commits
//! and installs it, which also closes the predecessor's interval. Each
//! version exclusively owns the next-older one, so truncating a tail
//! drops everything behind it.

use ember_common::TxnId;

/// One payload in a version chain.
#[derive(Debug, Clone)]
pub struct Version {
    payload: String,
    deleted: bool,
    start: TxnId,
    end: TxnId,
    next: Option<Box<Version>>,
}

impl Version {
    pub fn new(payload: String) -> Self {
        Self {
            payload,
            deleted: false,
            start: TxnId::MAX,
            end: TxnId::MAX,
            next: None,
        }
    }

    pub fn tombstone() -> Self {
        Self {
            deleted: true,
            ..Self::new(String::new())
        }
    }

    /// Whether this version is the correct one at timestamp `ts`.
    pub fn is_visible(&self, ts: TxnId) -> bool {
        self.start <= ts && ts < self.end
    }

    pub fn is_tombstone(&self) -> bool {
        self.deleted
    }

    /// Whether a commit has installed this version yet. Only flips under
    /// the owning chain's mutex, unlike the writer flag on the value's
    /// lock, which is set before the writer has pushed anything.
    pub fn is_committed(&self) -> bool {
        self.start != TxnId::MAX
    }

    pub fn next(&self) -> Option<&Version> {
        self.next.as_deref()
    }

    /// Payload with the tombstone marker translated to absence.
    pub fn read(&self) -> Option<String> {
        if self.deleted {
            None
        } else {
            Some(self.payload.clone())
        }
    }
}

/// Newest-first chain of versions for one key.
#[derive(Debug, Default)]
pub struct VersionChain {
    head: Option<Box<Version>>,
}

impl VersionChain {
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn head(&self) -> Option<&Version> {
        self.head.as_deref()
    }

    pub fn len(&self) -> usize {
        let mut count = 0;
        let mut cur = self.head.as_deref();
        while let Some(v) = cur {
            count += 1;
            cur = v.next();
        }
        count
    }

    /// Prepend `version`, linking the current head behind it.
    pub fn push_head(&mut self, mut version: Version) {
        version.next = self.head.take();
        self.head = Some(Box::new(version));
    }

    /// Replace the head's payload in place, clearing any tombstone mark.
    /// Used when a transaction writes a key it already owns the head of.
    pub fn overwrite_head(&mut self, payload: String) {
        if let Some(head) = self.head.as_deref_mut() {
            head.payload = payload;
            head.deleted = false;
        }
    }

    /// Mark the head deleted in place. Used when a transaction deletes a
    /// key it already owns the head of; the chain must stay one
    /// uncommitted version deep so rollback stays a single pop.
    pub fn tombstone_head(&mut self) {
        if let Some(head) = self.head.as_deref_mut() {
            head.payload.clear();
            head.deleted = true;
        }
    }

    /// Make the head visible from `commit_id` on and close the
    /// predecessor's interval at the same point.
    pub fn install_head(&mut self, commit_id: TxnId) {
        if let Some(head) = self.head.as_deref_mut() {
            head.start = commit_id;
            head.end = TxnId::MAX;
            if let Some(prev) = head.next.as_deref_mut() {
                prev.end = commit_id;
            }
        }
    }

    /// Discard the uncommitted head, restoring its predecessor.
    pub fn rollback_head(&mut self) {
        if let Some(head) = self.head.take() {
            self.head = head.next;
        }
    }

    pub fn clear(&mut self) {
        self.head = None;
    }

    /// Payload of the first version visible at `ts`, tombstones
    /// translated to absence.
    pub fn first_visible(&self, ts: TxnId) -> Option<String> {
        let mut cur = self.head.as_deref();
        while let Some(v) = cur {
            if v.is_visible(ts) {
                return v.read();
            }
            cur = v.next();
        }
        None
    }

    /// Head payload regardless of visibility (the caller owns a lock that
    /// pins the head), tombstones translated to absence.
    pub fn head_read(&self) -> Option<String> {
        self.head.as_deref().and_then(Version::read)
    }

    /// Position of the first version visible at `ts`, newest first.
    pub fn first_visible_pos(&self, ts: TxnId) -> Option<usize> {
        let mut pos = 0;
        let mut cur = self.head.as_deref();
        while let Some(v) = cur {
            if v.is_visible(ts) {
                return Some(pos);
            }
            pos += 1;
            cur = v.next();
        }
        None
    }

    pub fn is_tombstone_at(&self, pos: usize) -> bool {
        self.get(pos).is_some_and(Version::is_tombstone)
    }

    /// Drop every version strictly older than position `pos`.
    pub fn cut_after(&mut self, pos: usize) {
        if let Some(v) = self.get_mut(pos) {
            v.next = None;
        }
    }

    /// Keep only the first `count` versions.
    pub fn keep_first(&mut self, count: usize) {
        if count == 0 {
            self.head = None;
        } else if let Some(v) = self.get_mut(count - 1) {
            v.next = None;
        }
    }

    fn get(&self, pos: usize) -> Option<&Version> {
        let mut cur = self.head.as_deref();
        for _ in 0..pos {
            cur = cur.and_then(|v| v.next.as_deref());
        }
        cur
    }

    fn get_mut(&mut self, pos: usize) -> Option<&mut Version> {
        let mut cur = self.head.as_deref_mut();
        for _ in 0..pos {
            cur = cur.and_then(|v| v.next.as_deref_mut());
        }
        cur
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(n: u64) -> TxnId {
        TxnId::from_u64(n)
    }

    #[test]
    fn test_fresh_version_is_invisible() {
        let v = Version::new("a".into());
        assert!(!v.is_visible(ts(1)));
        assert!(!v.is_visible(ts(u64::MAX - 1)));
    }

    #[test]
    fn test_install_sets_visibility_window() {
        let mut chain = VersionChain::default();
        chain.push_head(Version::new("old".into()));
        chain.install_head(ts(5));
        chain.push_head(Version::new("new".into()));
        chain.install_head(ts(10));

        // [5, 10) sees the old payload, [10, ∞) the new one
        assert_eq!(chain.first_visible(ts(5)), Some("old".into()));
        assert_eq!(chain.first_visible(ts(9)), Some("old".into()));
        assert_eq!(chain.first_visible(ts(10)), Some("new".into()));
        assert_eq!(chain.first_visible(ts(4)), None);
    }

    #[test]
    fn test_tombstone_reads_as_absent() {
        let mut chain = VersionChain::default();
        chain.push_head(Version::new("a".into()));
        chain.install_head(ts(2));
        chain.push_head(Version::tombstone());
        chain.install_head(ts(4));

        assert_eq!(chain.first_visible(ts(3)), Some("a".into()));
        assert_eq!(chain.first_visible(ts(4)), None);
    }

    #[test]
    fn test_rollback_restores_predecessor() {
        let mut chain = VersionChain::default();
        chain.push_head(Version::new("committed".into()));
        chain.install_head(ts(2));
        chain.push_head(Version::new("uncommitted".into()));
        chain.rollback_head();

        assert_eq!(chain.len(), 1);
        assert_eq!(chain.head_read(), Some("committed".into()));
    }

    #[test]
    fn test_cut_after_drops_older_tail() {
        let mut chain = VersionChain::default();
        for (i, val) in ["a", "b", "c"].iter().enumerate() {
            chain.push_head(Version::new(val.to_string()));
            chain.install_head(ts((i as u64 + 1) * 2));
        }
        assert_eq!(chain.len(), 3);

        let pos = chain.first_visible_pos(ts(4)).unwrap();
        assert_eq!(pos, 1); // "b"
        chain.cut_after(pos);
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.first_visible(ts(4)), Some("b".into()));
        assert_eq!(chain.first_visible(ts(2)), None); // "a" is gone
    }

    #[test]
    fn test_keep_first() {
        let mut chain = VersionChain::default();
        for i in 0..3 {
            chain.push_head(Version::new(i.to_string()));
            chain.install_head(ts(i + 1));
        }
        chain.keep_first(1);
        assert_eq!(chain.len(), 1);
        chain.keep_first(0);
        assert!(chain.is_empty());
    }
}
