use loopjam_domain::TimingConfig;
use serde::{Deserialize, Serialize};

/// Subdivision on which every loop begins.
pub const LOOP_START_SUBDIVISION: u32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BeatAccent {
    /// Beat one of the first two measures.
    Accent,
    Weak,
}

/// What one scheduler heartbeat produced.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tick {
    pub subdivision: u32,
    /// Output-clock time sounds for this tick are scheduled at.
    pub next_tick_time: f64,
    pub loop_start: bool,
    pub accent: Option<BeatAccent>,
}

/// Position within the loop. Advanced once per tick and by nothing else.
#[derive(Clone, Debug)]
pub struct LoopClock {
    timing: TimingConfig,
    current_subdivision: u32,
    next_tick_time: f64,
}

impl LoopClock {
    pub fn new(timing: TimingConfig, now: f64) -> Self {
        Self {
            timing,
            current_subdivision: 1,
            next_tick_time: now + timing.tick_length(),
        }
    }

    pub fn timing(&self) -> &TimingConfig {
        &self.timing
    }

    pub fn current_subdivision(&self) -> u32 {
        self.current_subdivision
    }

    pub fn next_tick_time(&self) -> f64 {
        self.next_tick_time
    }

    pub fn advance(&mut self, now: f64) -> Tick {
        self.next_tick_time = now + self.timing.tick_length();
        if self.current_subdivision >= self.timing.total_subdivisions() {
            self.current_subdivision = 1;
        } else {
            self.current_subdivision += 1;
        }
        let subdivision = self.current_subdivision;
        let accent = if subdivision == 1 {
            None
        } else if subdivision == LOOP_START_SUBDIVISION
            || subdivision == self.timing.second_measure_subdivision()
        {
            Some(BeatAccent::Accent)
        } else if subdivision % self.timing.time_signature == LOOP_START_SUBDIVISION {
            Some(BeatAccent::Weak)
        } else {
            None
        };
        Tick {
            subdivision,
            next_tick_time: self.next_tick_time,
            loop_start: subdivision == LOOP_START_SUBDIVISION,
            accent,
        }
    }

    pub fn time_until_next_loop(&self, now: f64) -> f64 {
        time_until_next_loop(
            self.current_subdivision,
            self.timing.total_subdivisions(),
            self.timing.tick_length(),
            self.next_tick_time,
            now,
        )
    }
}

/// Seconds from `now` until the next loop-start tick fires.
///
/// The tick after the current one lands at `next_tick_time`; every further
/// tick adds one `tick_length`.
pub fn time_until_next_loop(
    current_subdivision: u32,
    total_subdivisions: u32,
    tick_length: f64,
    next_tick_time: f64,
    now: f64,
) -> f64 {
    let ticks_after_next = if current_subdivision < LOOP_START_SUBDIVISION {
        LOOP_START_SUBDIVISION - 1 - current_subdivision
    } else {
        total_subdivisions + 1 - current_subdivision
    };
    ticks_after_next as f64 * tick_length + next_tick_time - now
}

/// When a quantized recording starts.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuantizedStart {
    /// Seconds from the request until capture begins.
    pub delay: f64,
    /// Loop starts to wait for: 1 is the next one.
    pub boundaries: u32,
}

/// Picks the next boundary, or the one after it when the next one leaves
/// less than `min_lead` seconds for the countdown.
pub fn plan_quantized_start(until_next_loop: f64, loop_duration: f64, min_lead: f64) -> QuantizedStart {
    if until_next_loop < min_lead {
        QuantizedStart {
            delay: until_next_loop + loop_duration,
            boundaries: 2,
        }
    } else {
        QuantizedStart {
            delay: until_next_loop,
            boundaries: 1,
        }
    }
}
