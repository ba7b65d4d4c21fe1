//! Shared pipeline state.
//!
//! Exactly three cells cross task boundaries: the latest frame, the latest
//! results snapshot and the engine settings. Each has its own lock, and
//! every critical section is a single assignment or clone, so no lock is
//! ever held across capture, inference or I/O.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::{check_threshold, ConfigError};
use crate::frame::Frame;
use crate::results::Snapshot;

// Critical sections never leave a cell half-written, so a poisoned lock
// still guards a consistent value.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Single-slot holder of the most recent frame.
#[derive(Debug, Default)]
pub struct FrameSlot {
    latest: Mutex<Option<Frame>>,
    stale: AtomicBool,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the held frame. Clears the stale flag.
    pub fn put(&self, frame: Frame) {
        *lock(&self.latest) = Some(frame);
        self.stale.store(false, Ordering::Release);
    }

    pub fn get(&self) -> Option<Frame> {
        lock(&self.latest).clone()
    }

    /// Sequence number of the held frame, without cloning it.
    pub fn latest_seq(&self) -> Option<u64> {
        lock(&self.latest).as_ref().map(|f| f.seq)
    }

    /// Flag the held frame as no longer being refreshed. It stays readable.
    pub fn mark_stale(&self) {
        self.stale.store(true, Ordering::Release);
    }

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }
}

/// Holder of the most recent results snapshot.
#[derive(Debug, Default)]
pub struct ResultsSlot {
    latest: Mutex<Option<Arc<Snapshot>>>,
}

impl ResultsSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, snapshot: Snapshot) {
        *lock(&self.latest) = Some(Arc::new(snapshot));
    }

    pub fn get(&self) -> Option<Arc<Snapshot>> {
        lock(&self.latest).clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    pub enabled: bool,
    pub confidence_threshold: f32,
}

/// Everything the producer, the inference loop and the HTTP handlers share.
#[derive(Debug)]
pub struct PipelineState {
    frames: FrameSlot,
    results: ResultsSlot,
    settings: Mutex<EngineSettings>,
}

impl PipelineState {
    pub fn new(settings: EngineSettings) -> Result<Self, ConfigError> {
        check_threshold(settings.confidence_threshold)?;
        Ok(Self {
            frames: FrameSlot::new(),
            results: ResultsSlot::new(),
            settings: Mutex::new(settings),
        })
    }

    pub fn frames(&self) -> &FrameSlot {
        &self.frames
    }

    pub fn publish_frame(&self, frame: Frame) {
        self.frames.put(frame);
    }

    pub fn latest_frame(&self) -> Option<Frame> {
        self.frames.get()
    }

    pub fn publish_results(&self, snapshot: Snapshot) {
        self.results.put(snapshot);
    }

    pub fn latest_results(&self) -> Option<Arc<Snapshot>> {
        self.results.get()
    }

    pub fn settings(&self) -> EngineSettings {
        *lock(&self.settings)
    }

    pub fn is_enabled(&self) -> bool {
        lock(&self.settings).enabled
    }

    /// Pausing leaves the last snapshot in place.
    pub fn set_enabled(&self, enabled: bool) {
        lock(&self.settings).enabled = enabled;
    }

    pub fn confidence_threshold(&self) -> f32 {
        lock(&self.settings).confidence_threshold
    }

    pub fn set_confidence_threshold(&self, threshold: f32) -> Result<(), ConfigError> {
        let threshold = check_threshold(threshold)?;
        lock(&self.settings).confidence_threshold = threshold;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn state() -> PipelineState {
        PipelineState::new(EngineSettings {
            enabled: false,
            confidence_threshold: 0.5,
        })
        .unwrap()
    }

    #[test]
    fn empty_slot_returns_none() {
        let slot = FrameSlot::new();
        assert!(slot.get().is_none());
        assert!(slot.latest_seq().is_none());
        assert!(!slot.is_stale());
    }

    #[test]
    fn get_returns_last_put() {
        let slot = FrameSlot::new();
        slot.put(Frame::new(vec![1, 2, 3], 1, 0));
        assert_eq!(slot.get().unwrap().jpeg(), &[1, 2, 3]);
        assert_eq!(slot.get().unwrap().jpeg(), &[1, 2, 3]);
        slot.put(Frame::new(vec![4, 5], 2, 0));
        let frame = slot.get().unwrap();
        assert_eq!(frame.jpeg(), &[4, 5]);
        assert_eq!(frame.seq, 2);
    }

    #[test]
    fn put_clears_stale() {
        let slot = FrameSlot::new();
        slot.put(Frame::new(vec![1], 1, 0));
        slot.mark_stale();
        assert!(slot.is_stale());
        assert!(slot.get().is_some());
        slot.put(Frame::new(vec![2], 2, 0));
        assert!(!slot.is_stale());
    }

    #[test]
    fn concurrent_reads_never_torn() {
        // Every frame is filled with its own seq byte, so a torn read would
        // show mixed bytes or a length that does not match the seq.
        let slot = Arc::new(FrameSlot::new());
        let writer = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || {
                for seq in 1..=2000u64 {
                    let len = 16 + (seq as usize % 64);
                    slot.put(Frame::new(vec![(seq % 251) as u8; len], seq, 0));
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let slot = Arc::clone(&slot);
                thread::spawn(move || {
                    for _ in 0..2000 {
                        if let Some(frame) = slot.get() {
                            let expected = (frame.seq % 251) as u8;
                            assert_eq!(frame.len(), 16 + (frame.seq as usize % 64));
                            assert!(frame.jpeg().iter().all(|b| *b == expected));
                        }
                    }
                })
            })
            .collect();
        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(slot.latest_seq(), Some(2000));
    }

    #[test]
    fn results_replaced_whole() {
        let state = state();
        assert!(state.latest_results().is_none());
        state.publish_results(Snapshot::new(Vec::new(), Some(0.4), 0.5, 1));
        state.publish_results(Snapshot::new(Vec::new(), None, 0.5, 2));
        let latest = state.latest_results().unwrap();
        assert_eq!(latest.frame_seq, 2);
        assert_eq!(latest.top_score, None);
    }

    #[test]
    fn threshold_validation() {
        let state = state();
        state.set_confidence_threshold(0.9).unwrap();
        assert_eq!(state.confidence_threshold(), 0.9);
        assert!(state.set_confidence_threshold(1.1).is_err());
        assert!(state.set_confidence_threshold(f32::INFINITY).is_err());
        assert_eq!(state.confidence_threshold(), 0.9);
    }

    #[test]
    fn toggle_enabled() {
        let state = state();
        assert!(!state.is_enabled());
        state.set_enabled(true);
        state.set_enabled(true);
        assert!(state.settings().enabled);
        state.set_enabled(false);
        assert!(!state.is_enabled());
    }

    #[test]
    fn invalid_initial_threshold_rejected() {
        let result = PipelineState::new(EngineSettings {
            enabled: true,
            confidence_threshold: 2.0,
        });
        assert!(result.is_err());
    }
}
