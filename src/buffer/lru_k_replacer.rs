use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::common::{FrameId, Timestamp};

/// Access history and eviction eligibility of a single frame.
#[derive(Debug)]
struct FrameRecord {
    /// Timestamps of the last k accesses (most recent at the back)
    history: VecDeque<Timestamp>,
    /// Whether the frame may currently be chosen as a victim
    evictable: bool,
}

impl FrameRecord {
    fn new() -> Self {
        Self {
            history: VecDeque::new(),
            evictable: false,
        }
    }

    fn record_access(&mut self, timestamp: Timestamp, k: usize) {
        self.history.push_back(timestamp);
        while self.history.len() > k {
            self.history.pop_front();
        }
    }

    /// Backward k-distance: now minus the timestamp of the kth most recent
    /// access. None stands for +inf (fewer than k recorded accesses).
    fn backward_k_distance(&self, now: Timestamp, k: usize) -> Option<Timestamp> {
        if self.history.len() < k {
            None
        } else {
            Some(now - self.history[self.history.len() - k])
        }
    }

    fn earliest_access(&self) -> Option<Timestamp> {
        self.history.front().copied()
    }
}

struct ReplacerState {
    records: HashMap<FrameId, FrameRecord>,
    num_evictable: usize,
}

/// LRU-K replacement policy.
///
/// The victim is the evictable frame with the largest backward k-distance.
/// Frames with fewer than k recorded accesses count as +inf distance and are
/// preferred; ties among +inf frames go to the frame with the earliest first
/// recorded access.
pub struct LruKReplacer {
    /// K value for the LRU-K algorithm
    k: usize,
    /// Maximum number of frames the replacer can track
    max_frames: usize,
    /// Monotonic logical clock, bumped on every recorded access
    clock: AtomicU64,
    /// Per-frame records plus the evictable count
    state: Mutex<ReplacerState>,
}

impl LruKReplacer {
    pub fn new(k: usize, max_frames: usize) -> Self {
        assert!(k > 0);
        Self {
            k,
            max_frames,
            clock: AtomicU64::new(0),
            state: Mutex::new(ReplacerState {
                records: HashMap::new(),
                num_evictable: 0,
            }),
        }
    }

    /// Chooses and removes the victim frame with the largest backward
    /// k-distance. Returns None when no frame is evictable.
    pub fn evict(&self) -> Option<FrameId> {
        let mut state = self.state.lock();
        if state.num_evictable == 0 {
            return None;
        }

        let now = self.clock.load(Ordering::Relaxed);

        let mut victim: Option<FrameId> = None;
        let mut victim_distance: Option<Timestamp> = None;
        let mut victim_earliest: Option<Timestamp> = None;

        for (&frame_id, record) in state.records.iter() {
            if !record.evictable {
                continue;
            }

            let distance = record.backward_k_distance(now, self.k);
            let earliest = record.earliest_access();

            let better = match (victim_distance, distance) {
                // +inf beats any finite distance
                (Some(_), None) => true,
                (None, Some(_)) => false,
                // Both +inf: earliest first access wins
                (None, None) => match (victim_earliest, earliest) {
                    (Some(v), Some(c)) => c < v,
                    (None, Some(_)) => true,
                    _ => false,
                },
                (Some(v), Some(c)) => c > v,
            };

            if victim.is_none() || better {
                victim = Some(frame_id);
                victim_distance = distance;
                victim_earliest = earliest;
            }
        }

        if let Some(frame_id) = victim {
            state.records.remove(&frame_id);
            state.num_evictable -= 1;
        }

        victim
    }

    /// Records an access to the given frame at the current logical time.
    pub fn record_access(&self, frame_id: FrameId) {
        if frame_id.as_usize() >= self.max_frames {
            return;
        }

        let timestamp = self.clock.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();
        state
            .records
            .entry(frame_id)
            .or_insert_with(FrameRecord::new)
            .record_access(timestamp, self.k);
    }

    /// Marks a frame as evictable or not. Pinned frames must be marked
    /// non-evictable by the pool.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        if frame_id.as_usize() >= self.max_frames {
            return;
        }

        let mut state = self.state.lock();
        match state.records.get_mut(&frame_id) {
            Some(record) => {
                if record.evictable != evictable {
                    record.evictable = evictable;
                    if evictable {
                        state.num_evictable += 1;
                    } else {
                        state.num_evictable -= 1;
                    }
                }
            }
            None if evictable => {
                let mut record = FrameRecord::new();
                record.evictable = true;
                state.records.insert(frame_id, record);
                state.num_evictable += 1;
            }
            None => {}
        }
    }

    /// Drops all replacer state for a frame. Used when the frame is freed
    /// outside of eviction (page deletion).
    pub fn remove(&self, frame_id: FrameId) {
        let mut state = self.state.lock();
        if let Some(record) = state.records.remove(&frame_id) {
            if record.evictable {
                state.num_evictable -= 1;
            }
        }
    }

    /// Returns the number of evictable frames.
    pub fn size(&self) -> usize {
        self.state.lock().num_evictable
    }

    pub fn k(&self) -> usize {
        self.k
    }
}
