use crate::pipeline::types::{Observation, Rect};
use std::collections::VecDeque;

/// Consecutive mismatching ticks required before the expected face count
/// changes.
pub const COUNT_CONFIDENCE_THRESHOLD: u32 = 5;
/// Ticks without any detection before the tracked state is dropped.
pub const HOLD_WINDOW_TICKS: u32 = 15;
/// Rectangles kept per tracked face for smoothing.
pub const RECT_HISTORY_LEN: usize = 8;
/// Samples needed before the smoothed mean replaces the raw rectangle.
pub const SMOOTHING_MIN_SAMPLES: usize = 3;

/// Turns noisy per-frame detection results into a temporally stable face
/// list. Raw detections flicker between 0/1/2 faces and jitter their
/// rectangles; this gates count changes behind a confidence streak, rides
/// out brief dropouts, and averages each face's recent rectangles.
///
/// Owned exclusively by the tracking loop; never shared across threads.
pub struct FaceStabilizer {
    expected_count: usize,
    count_confidence: u32,
    frames_since_detection: u32,
    rect_history: Vec<VecDeque<Rect>>,
    smoothed: Vec<Observation>,
}

impl FaceStabilizer {
    pub fn new() -> Self {
        Self {
            expected_count: 1,
            count_confidence: 0,
            frames_since_detection: 0,
            rect_history: Vec::new(),
            smoothed: Vec::new(),
        }
    }

    /// Whether at least one face is currently tracked.
    pub fn has_track(&self) -> bool {
        !self.smoothed.is_empty()
    }

    /// Last stabilized face list.
    pub fn faces(&self) -> &[Observation] {
        &self.smoothed
    }

    /// Feed one tick's detection result (fresh or reused) and get the
    /// stabilized face list to display.
    pub fn update(&mut self, detections: Vec<Observation>) -> &[Observation] {
        let n = detections.len();
        let mut accepted = detections;

        if n == 0 {
            self.frames_since_detection += 1;
        } else if n == self.expected_count {
            self.frames_since_detection = 0;
            self.count_confidence = 0;
        } else {
            self.count_confidence += 1;
            if self.count_confidence >= COUNT_CONFIDENCE_THRESHOLD {
                // The new count has persisted long enough to trust it.
                self.expected_count = n;
                self.count_confidence = 0;
                self.frames_since_detection = 0;
            } else if n > self.expected_count && self.expected_count == 1 {
                // Extra detections around a single expected face are assumed
                // to be false positives: keep only the largest one.
                if let Some(largest) = accepted
                    .iter()
                    .max_by_key(|obs| obs.rect.area())
                    .cloned()
                {
                    accepted = vec![largest];
                }
            }
        }

        if self.frames_since_detection > 0 {
            if self.frames_since_detection > HOLD_WINDOW_TICKS {
                // Target lost for good; drop everything.
                self.smoothed.clear();
                self.rect_history.clear();
            }
            // Within the hold window the previous output bridges the gap.
            return &self.smoothed;
        }

        for (i, obs) in accepted.into_iter().enumerate() {
            if self.rect_history.len() <= i {
                self.rect_history.push(VecDeque::with_capacity(RECT_HISTORY_LEN));
            }
            let history = &mut self.rect_history[i];
            if history.len() == RECT_HISTORY_LEN {
                history.pop_front();
            }
            history.push_back(obs.rect);

            let rect = if history.len() >= SMOOTHING_MIN_SAMPLES {
                mean_rect(history)
            } else {
                obs.rect
            };
            // Sub-features pass through unsmoothed from the current tick.
            let stabilized = Observation { rect, ..obs };
            if i < self.smoothed.len() {
                self.smoothed[i] = stabilized;
            } else {
                self.smoothed.push(stabilized);
            }
        }

        &self.smoothed
    }
}

impl Default for FaceStabilizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Component-wise mean, truncated to integers.
fn mean_rect(history: &VecDeque<Rect>) -> Rect {
    let len = history.len() as i64;
    let (x, y, w, h) = history.iter().fold((0i64, 0i64, 0i64, 0i64), |acc, r| {
        (
            acc.0 + r.x as i64,
            acc.1 + r.y as i64,
            acc.2 + r.w as i64,
            acc.3 + r.h as i64,
        )
    });
    Rect::new(
        (x / len) as i32,
        (y / len) as i32,
        (w / len) as i32,
        (h / len) as i32,
    )
}
