//! Frame timing and per-frame consumers.

use std::time::Instant;

use parking_lot::Mutex;

/// Measures the wall-clock delta between overlay frames.
///
/// The first tick yields `0.0`; bootstrap may complete long after the host
/// started presenting and the gap must not leak into animation time.
pub struct FrameTimer {
    last: Option<Instant>,
}

impl FrameTimer {
    pub const fn new() -> Self {
        Self { last: None }
    }

    pub fn tick(&mut self) -> f32 {
        let now = Instant::now();
        let delta = match self.last {
            Some(last) => now.duration_since(last).as_secs_f32(),
            None => 0.0,
        };
        self.last = Some(now);
        delta
    }
}

type Callback = Box<dyn FnMut(&imgui::Ui, f32) + Send>;

/// Externally-owned per-frame update callbacks (menu logic, interpolators).
///
/// Run only on ready frames, on the host's render thread, with the measured
/// frame delta in seconds.
pub struct FrameCallbacks {
    list: Mutex<Vec<Callback>>,
}

impl FrameCallbacks {
    pub const fn new() -> Self {
        Self {
            list: Mutex::new(Vec::new()),
        }
    }

    pub fn register(&self, callback: impl FnMut(&imgui::Ui, f32) + Send + 'static) {
        self.list.lock().push(Box::new(callback));
    }

    pub fn run(&self, ui: &imgui::Ui, delta: f32) {
        for callback in self.list.lock().iter_mut() {
            callback(ui, delta);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.list.lock().is_empty()
    }
}

/// Per-frame gate: yields the frame delta only once bootstrap has
/// published readiness. Frames before that cost nothing but the load.
pub fn frame_delta(ready: bool, timer: &mut FrameTimer) -> Option<f32> {
    if !ready {
        return None;
    }
    Some(timer.tick())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn first_tick_is_zero() {
        let mut timer = FrameTimer::new();
        assert_eq!(timer.tick(), 0.0);
    }

    #[test]
    fn tick_measures_elapsed_time() {
        let mut timer = FrameTimer::new();
        timer.tick();
        std::thread::sleep(Duration::from_millis(10));
        let delta = timer.tick();
        assert!(delta > 0.0);
        assert!(delta < 5.0);
    }

    #[test]
    fn not_ready_frames_do_not_advance_the_timer() {
        let mut timer = FrameTimer::new();
        assert!(frame_delta(false, &mut timer).is_none());
        assert!(frame_delta(false, &mut timer).is_none());
        // The first ready frame still sees a fresh timer.
        assert_eq!(frame_delta(true, &mut timer), Some(0.0));
    }
}
