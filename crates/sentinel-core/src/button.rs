//! Debounced button monitor.
//!
//! Turns a noisy raw pin reading into press/release/long-press events. The
//! caller samples the pin and feeds the raw level plus a millisecond
//! timestamp into [`DebouncedButton::poll`]; the monitor owns all timing
//! state itself, which keeps it trivially testable on a host.
//!
//! Polling must happen at a bounded period (10 ms or faster). Polling slower
//! than the debounce interval cannot corrupt state, but edges shorter than
//! the poll period will be missed.

/// Default window a raw reading must stay stable before the debounced state
/// follows it.
pub const DEFAULT_DEBOUNCE_MS: u64 = 50;

/// Default hold duration that counts as a long press.
pub const DEFAULT_LONG_PRESS_MS: u64 = 3000;

/// Event produced by a single [`DebouncedButton::poll`] call.
///
/// Events are returned rather than latched in read-and-clear flags, so the
/// one-shot contract lives in the type: each event is observed exactly once,
/// by whoever called `poll`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    /// Debounced transition into the pressed state.
    Pressed,
    /// The button has been held for at least the long-press threshold.
    /// Fires at most once per continuous press.
    LongPress,
    /// Debounced transition into the released state. `held_ms` is the
    /// debounced hold duration of the press that just ended.
    Released { held_ms: u64 },
}

/// Debounce and long-press state machine for one digital input.
pub struct DebouncedButton {
    debounce_ms: u64,
    long_press_ms: u64,

    /// Raw level seen on the previous poll.
    last_raw: bool,
    /// Debounced stable level.
    stable: bool,
    /// When the raw level last changed (start of the debounce window).
    window_start_ms: u64,
    /// When the current press became stable.
    press_start_ms: u64,
    /// Set once the long press for the current hold has fired; re-armed on
    /// the next press edge.
    long_press_latched: bool,
}

impl DebouncedButton {
    pub fn new(debounce_ms: u64, long_press_ms: u64) -> Self {
        Self {
            debounce_ms,
            long_press_ms,
            last_raw: false,
            stable: false,
            window_start_ms: 0,
            press_start_ms: 0,
            long_press_latched: false,
        }
    }

    /// Update timers and state from the current raw reading.
    ///
    /// Non-blocking; returns at most one event per call. `now_ms` must be
    /// monotonic.
    pub fn poll(&mut self, raw_pressed: bool, now_ms: u64) -> Option<ButtonEvent> {
        // Any raw change restarts the debounce window.
        if raw_pressed != self.last_raw {
            self.window_start_ms = now_ms;
            self.last_raw = raw_pressed;
        }

        if now_ms.saturating_sub(self.window_start_ms) >= self.debounce_ms
            && raw_pressed != self.stable
        {
            self.stable = raw_pressed;

            if self.stable {
                self.press_start_ms = now_ms;
                self.long_press_latched = false;
                return Some(ButtonEvent::Pressed);
            }

            return Some(ButtonEvent::Released {
                held_ms: now_ms.saturating_sub(self.press_start_ms),
            });
        }

        // Long-press detection only while the debounced state is pressed.
        if self.stable
            && !self.long_press_latched
            && now_ms.saturating_sub(self.press_start_ms) >= self.long_press_ms
        {
            self.long_press_latched = true;
            return Some(ButtonEvent::LongPress);
        }

        None
    }

    /// Current debounced held/released state. No side effects.
    pub fn is_held(&self) -> bool {
        self.stable
    }
}

impl Default for DebouncedButton {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE_MS, DEFAULT_LONG_PRESS_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feed a constant raw level for `ms` milliseconds at a 5 ms poll period,
    /// collecting any events.
    fn run(btn: &mut DebouncedButton, raw: bool, start_ms: u64, ms: u64) -> (u64, heapless::Vec<ButtonEvent, 8>) {
        let mut events = heapless::Vec::new();
        let mut now = start_ms;
        let end = start_ms + ms;
        while now <= end {
            if let Some(ev) = btn.poll(raw, now) {
                events.push(ev).unwrap();
            }
            now += 5;
        }
        (now, events)
    }

    #[test]
    fn stable_press_debounces_once() {
        let mut btn = DebouncedButton::new(50, 3000);
        let (now, events) = run(&mut btn, true, 0, 200);
        assert_eq!(events.as_slice(), &[ButtonEvent::Pressed]);
        assert!(btn.is_held());

        let (_, events) = run(&mut btn, false, now, 200);
        assert!(matches!(events.as_slice(), &[ButtonEvent::Released { .. }]));
        assert!(!btn.is_held());
    }

    #[test]
    fn glitch_shorter_than_window_is_ignored() {
        let mut btn = DebouncedButton::new(50, 3000);
        // 30 ms spike, then back to released.
        let (now, events) = run(&mut btn, true, 0, 30);
        assert!(events.is_empty());
        let (_, events) = run(&mut btn, false, now, 200);
        assert!(events.is_empty());
        assert!(!btn.is_held());
    }

    #[test]
    fn long_press_fires_exactly_once_per_hold() {
        let mut btn = DebouncedButton::new(50, 300);
        let (now, events) = run(&mut btn, true, 0, 100);
        assert_eq!(events.as_slice(), &[ButtonEvent::Pressed]);

        // Hold well past the threshold: one LongPress, no repeats.
        let (now, events) = run(&mut btn, true, now, 2000);
        assert_eq!(events.as_slice(), &[ButtonEvent::LongPress]);

        // Release, press again: latch is re-armed.
        let (now, events) = run(&mut btn, false, now, 100);
        assert!(matches!(events.as_slice(), &[ButtonEvent::Released { .. }]));
        let (now, events) = run(&mut btn, true, now, 100);
        assert_eq!(events.as_slice(), &[ButtonEvent::Pressed]);
        let (_, events) = run(&mut btn, true, now, 2000);
        assert_eq!(events.as_slice(), &[ButtonEvent::LongPress]);
    }

    #[test]
    fn short_press_reports_held_duration() {
        let mut btn = DebouncedButton::new(50, 3000);
        let (now, _) = run(&mut btn, true, 0, 400);
        let (_, events) = run(&mut btn, false, now, 200);
        match events.as_slice() {
            &[ButtonEvent::Released { held_ms }] => {
                // Held roughly 400 ms plus the release debounce window.
                assert!((300..700).contains(&held_ms), "held_ms = {held_ms}");
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn no_long_press_after_release() {
        let mut btn = DebouncedButton::new(50, 300);
        let (now, _) = run(&mut btn, true, 0, 100);
        let (now, events) = run(&mut btn, false, now, 100);
        assert!(matches!(events.as_slice(), &[ButtonEvent::Released { .. }]));
        // Idle long past the threshold: nothing fires.
        let (_, events) = run(&mut btn, false, now, 2000);
        assert!(events.is_empty());
    }
}
