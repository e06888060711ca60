//! Input execution unit.
//!
//! Polls the button pin at a fixed period, runs it through the debouncer,
//! and forwards classified presses to the network unit. After a long press
//! fires, the unit waits for the physical release so a single hold cannot
//! emit a trailing short press as well.

use embassy_time::{Duration, Instant, Timer};
use embedded_hal::digital::InputPin;
use log::{debug, warn};

use super::{InputEvent, InputEventSender, Timing};
use crate::button::{ButtonEvent, DebouncedButton};

/// Drive the button forever, emitting [`InputEvent`]s on `events`.
///
/// `active_low` selects the pressed polarity (true for a pull-up wired
/// button to ground). Events are sent with `try_send`: if the network unit
/// is saturated the press is dropped rather than blocking the poll loop.
pub async fn input_task<P: InputPin>(
    mut pin: P,
    active_low: bool,
    timing: Timing,
    events: InputEventSender<'_>,
) -> ! {
    let mut button = DebouncedButton::new(timing.debounce_ms, timing.long_press_ms);
    let poll = Duration::from_millis(timing.input_poll_ms);

    loop {
        let raw = read_pressed(&mut pin, active_low);
        match button.poll(raw, Instant::now().as_millis()) {
            Some(ButtonEvent::Pressed) => debug!("button pressed"),
            Some(ButtonEvent::LongPress) => {
                debug!("button long press");
                send(&events, InputEvent::LongPress);
                // Swallow the remainder of this hold, including its release.
                while button.is_held() {
                    Timer::after(poll).await;
                    let raw = read_pressed(&mut pin, active_low);
                    button.poll(raw, Instant::now().as_millis());
                }
            }
            Some(ButtonEvent::Released { held_ms }) => {
                debug!("button released after {held_ms} ms");
                // Below the debounce floor the "press" was line noise.
                if held_ms >= timing.debounce_ms {
                    send(&events, InputEvent::ShortPress);
                }
            }
            None => {}
        }
        Timer::after(poll).await;
    }
}

fn read_pressed<P: InputPin>(pin: &mut P, active_low: bool) -> bool {
    let level = if active_low { pin.is_low() } else { pin.is_high() };
    // An unreadable pin counts as released; a stuck error surfaces as silence,
    // not spurious presses.
    level.unwrap_or(false)
}

fn send(events: &InputEventSender<'_>, event: InputEvent) {
    if events.try_send(event).is_err() {
        warn!("input event queue full, dropping {event:?}");
    }
}
