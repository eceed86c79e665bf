use std::collections::HashMap;
use std::collections::VecDeque;

use parking_lot::Mutex;

use super::FrameId;

///  Replacer tracks page usage for replacement in case of buffer pool is full.
pub trait Replacer: Send + Sync {
    /// Record the event that the given frame id is accessed at current timestamp.
    /// Create a new entry for access history if frame id has not been seen before.
    fn record_access(&self, frame_id: FrameId);

    /// Find the frame to evict with replace policy(e.g. backward k-distance). Only frames that
    /// are marked as evictable are candidates for eviction.
    ///
    /// Successful eviction of a frame should decrement the size of replacer and remove the frame's
    /// access history.
    ///
    /// Return the frame id if a frame is evicted successfully, None if no frames can be evicted.
    fn evict(&self) -> Option<FrameId>;

    /// Toggle whether a frame is evictable or non-evictable. this function also control replacer
    /// size. Note that size is equal to number of evictable entries.
    ///
    /// If a frame was previously evictable and is to be set to non-evictable, then size should
    /// decrement. If a frame was previously non-evictable and is to be set evictable, then size
    /// should increment.
    fn set_evictable(&self, frame_id: FrameId, evictable: bool);

    /// Check if a frame is evictable. if the frame is not found, return true.
    fn is_evictable(&self, frame_id: FrameId) -> bool;

    /// Remove an evictable frame from replacer, along with its access history. This function
    /// should also decrement the replacer size if removal is successful.
    ///
    /// Note that this is different from evicting a frame without check replacer policy.
    ///
    /// If remove is called on a non-evictable frame, panic. If the specified frame is
    /// not found, do nothing.
    fn remove(&self, frame_id: FrameId);

    /// replacer size, the number of evictable frames.
    fn size(&self) -> usize;
}

struct LRUKNode {
    /// history of last seen K timestamp of the given frame.
    /// Least recent timestamp stored in front.
    history: VecDeque<u64>,
    k: usize,
    is_evictable: bool,
    /// intrusive links of the eviction ordering, see [`LRUKReplacer`].
    prev: Option<FrameId>,
    next: Option<FrameId>,
}

impl LRUKNode {
    fn new(k: usize) -> Self {
        assert!(k > 0, "replacer k should be larger than zero");
        let history = VecDeque::with_capacity(k);
        LRUKNode { history, k, is_evictable: false, prev: None, next: None }
    }

    fn record_access(&mut self, timestamp: u64) {
        if self.history.len() == self.k {
            self.history.pop_front();
        }
        self.history.push_back(timestamp)
    }

    /// A frame with k recorded accesses has a finite backward k-distance.
    fn is_finite(&self) -> bool {
        self.history.len() >= self.k
    }
}

/// LRUKReplacer implements the LRU-k replacement policy.
///
/// The LRU-k algorithm evicts a frame whose backward k-distance is maximum of
/// all frames. Backward k-distance is computed as the difference in time between
/// the current timestamp and the timestamp of k-th previous access.
///
/// A frame with less than k history references is given +inf as its backward
/// k-distance; among those, the frame seen first is evicted first.
///
/// Rather than recomputing distances on every eviction, the nodes are chained
/// into one eviction ordering: a prefix of frames with fewer than k accesses
/// (in first-seen order) followed by a suffix of frames with k accesses (in
/// ascending order of their k-th most recent timestamp). `first_finite` marks
/// the boundary. Every transition is an O(1) splice:
///
/// - an unseen frame joins the tail of the infinite prefix;
/// - a frame reaching its k-th access moves to the tail of the list;
/// - a later access of a finite frame moves it to the tail again, since its
///   refreshed k-th timestamp is now the newest.
///
/// Eviction scans from the head for the first evictable node.
pub struct LRUKReplacer {
    nodes: HashMap<FrameId, LRUKNode>,
    head: Option<FrameId>,
    tail: Option<FrameId>,
    first_finite: Option<FrameId>,
    current_timestamp: u64,
    curr_size: usize,
    replacer_size: usize,
    k: usize,
}

impl LRUKReplacer {
    pub fn new(k: usize, size: usize) -> Self {
        let nodes = HashMap::new();
        LRUKReplacer {
            nodes,
            head: None,
            tail: None,
            first_finite: None,
            current_timestamp: 0,
            curr_size: 0,
            replacer_size: size,
            k,
        }
    }

    fn record_access(&mut self, frame_id: FrameId) {
        assert!(frame_id < self.replacer_size, "frame id {} out of range", frame_id);
        self.current_timestamp += 1;
        let timestamp = self.current_timestamp;

        let is_new = !self.nodes.contains_key(&frame_id);
        if is_new {
            self.nodes.insert(frame_id, LRUKNode::new(self.k));
        }
        let node = self.nodes.get_mut(&frame_id).unwrap();
        node.record_access(timestamp);
        let is_finite = node.is_finite();

        if is_new {
            if is_finite {
                // k = 1, the frame is finite from its very first access
                self.push_back(frame_id);
                if self.first_finite.is_none() {
                    self.first_finite = Some(frame_id);
                }
            } else {
                // join the tail of the infinite prefix
                let anchor = self.first_finite;
                self.insert_before(frame_id, anchor);
            }
            return;
        }
        if is_finite {
            // either just crossed the k-th access boundary or refreshed its
            // k-th timestamp, both move the node to the tail
            self.unlink(frame_id);
            self.push_back(frame_id);
            if self.first_finite.is_none() {
                self.first_finite = Some(frame_id);
            }
        }
        // a re-accessed frame still below k accesses stays in place, the
        // infinite prefix keeps its first-seen order
    }

    fn evict(&mut self) -> Option<FrameId> {
        let mut cursor = self.head;
        while let Some(frame_id) = cursor {
            let node = &self.nodes[&frame_id];
            if !node.is_evictable {
                cursor = node.next;
                continue;
            }
            self.unlink(frame_id);
            self.nodes.remove(&frame_id);
            self.curr_size -= 1;
            return Some(frame_id);
        }
        None
    }

    fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) {
        let node = match self.nodes.get_mut(&frame_id) {
            Some(node) => node,
            None => return,
        };
        if node.is_evictable == evictable {
            return;
        }
        node.is_evictable = evictable;
        if evictable {
            self.curr_size += 1;
        } else {
            self.curr_size -= 1;
        }
    }

    fn is_evictable(&self, frame_id: FrameId) -> bool {
        match self.nodes.get(&frame_id) {
            Some(node) => node.is_evictable,
            None => true,
        }
    }

    fn remove(&mut self, frame_id: FrameId) {
        let node = match self.nodes.get(&frame_id) {
            Some(node) => node,
            None => return,
        };
        assert!(node.is_evictable, "remove on a non-evictable frame {}", frame_id);
        self.unlink(frame_id);
        self.nodes.remove(&frame_id);
        self.curr_size -= 1;
    }

    fn size(&self) -> usize {
        self.curr_size
    }

    /// Detach a node from the eviction ordering, keeping the boundary marker
    /// valid. The successor of a finite node is finite, so advancing the
    /// marker to `next` is always correct.
    fn unlink(&mut self, frame_id: FrameId) {
        let (prev, next) = {
            let node = &self.nodes[&frame_id];
            (node.prev, node.next)
        };
        if self.first_finite == Some(frame_id) {
            self.first_finite = next;
        }
        match prev {
            Some(prev) => self.nodes.get_mut(&prev).unwrap().next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.nodes.get_mut(&next).unwrap().prev = prev,
            None => self.tail = prev,
        }
        let node = self.nodes.get_mut(&frame_id).unwrap();
        node.prev = None;
        node.next = None;
    }

    fn push_back(&mut self, frame_id: FrameId) {
        match self.tail {
            Some(tail) => {
                self.nodes.get_mut(&tail).unwrap().next = Some(frame_id);
                let node = self.nodes.get_mut(&frame_id).unwrap();
                node.prev = Some(tail);
                node.next = None;
            }
            None => {
                let node = self.nodes.get_mut(&frame_id).unwrap();
                node.prev = None;
                node.next = None;
                self.head = Some(frame_id);
            }
        }
        self.tail = Some(frame_id);
    }

    fn insert_before(&mut self, frame_id: FrameId, anchor: Option<FrameId>) {
        let anchor = match anchor {
            Some(anchor) => anchor,
            None => return self.push_back(frame_id),
        };
        let prev = self.nodes[&anchor].prev;
        {
            let node = self.nodes.get_mut(&frame_id).unwrap();
            node.prev = prev;
            node.next = Some(anchor);
        }
        self.nodes.get_mut(&anchor).unwrap().prev = Some(frame_id);
        match prev {
            Some(prev) => self.nodes.get_mut(&prev).unwrap().next = Some(frame_id),
            None => self.head = Some(frame_id),
        }
    }
}

/// SyncLRUKReplacer implements the thread-safe version of LRU-k replacement policy,
/// basically all the heavy lifting are happens in the LRUKReplacer.
pub struct SyncLRUKReplacer {
    inner: Mutex<LRUKReplacer>,
}

impl SyncLRUKReplacer {
    pub fn new(k: usize, size: usize) -> Self {
        let inner = Mutex::new(LRUKReplacer::new(k, size));
        SyncLRUKReplacer { inner }
    }
}

impl Replacer for SyncLRUKReplacer {
    fn record_access(&self, frame_id: FrameId) {
        let mut guard = self.inner.lock();
        guard.record_access(frame_id)
    }

    fn evict(&self) -> Option<FrameId> {
        let mut guard = self.inner.lock();
        guard.evict()
    }

    fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        let mut guard = self.inner.lock();
        guard.set_evictable(frame_id, evictable)
    }

    fn is_evictable(&self, frame_id: FrameId) -> bool {
        let guard = self.inner.lock();
        guard.is_evictable(frame_id)
    }

    fn remove(&self, frame_id: FrameId) {
        let mut guard = self.inner.lock();
        guard.remove(frame_id)
    }

    fn size(&self) -> usize {
        let guard = self.inner.lock();
        guard.size()
    }
}
