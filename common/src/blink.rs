use crate::tick::{has_elapsed, Ticks};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlinkPhase {
    #[default]
    Uninitialized,
    On,
    Off,
}

// A phase is only entered if its span is non-zero, otherwise the pattern latches.
#[derive(Debug, Clone, Default)]
pub struct BlinkPattern {
    on_span: Ticks,
    off_span: Ticks,
    phase: BlinkPhase,
    last_switch: Ticks,
}

impl BlinkPattern {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pattern(on_span: Ticks, off_span: Ticks) -> Self {
        let mut pattern = Self::new();
        pattern.set_pattern(on_span, off_span);
        pattern
    }

    pub fn set_pattern(&mut self, on_span: Ticks, off_span: Ticks) {
        self.on_span = on_span;
        self.off_span = off_span;
        self.reset();
    }

    pub fn reset(&mut self) {
        self.phase = BlinkPhase::Uninitialized;
    }

    pub fn on_span(&self) -> Ticks {
        self.on_span
    }

    pub fn off_span(&self) -> Ticks {
        self.off_span
    }

    pub fn phase(&self) -> BlinkPhase {
        self.phase
    }

    pub fn is_on(&self) -> bool {
        self.phase == BlinkPhase::On
    }

    pub fn update(&mut self, now: Ticks) -> bool {
        let next = match self.phase {
            BlinkPhase::Uninitialized => BlinkPhase::On,
            // Leaving a phase requires the phase being entered to exist.
            BlinkPhase::On
                if self.off_span > 0 && has_elapsed(now, self.last_switch, self.on_span) =>
            {
                BlinkPhase::Off
            }
            BlinkPhase::Off
                if self.on_span > 0 && has_elapsed(now, self.last_switch, self.off_span) =>
            {
                BlinkPhase::On
            }
            _ => return false,
        };

        self.phase = next;
        self.last_switch = now;
        true
    }
}
