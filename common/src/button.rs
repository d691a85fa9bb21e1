use crate::tick::{has_elapsed, Ticks};

pub trait DigitalInput {
    fn is_high(&mut self) -> bool;
}

impl<F> DigitalInput for F
where
    F: FnMut() -> bool,
{
    fn is_high(&mut self) -> bool {
        self()
    }
}

// Bounce suppression is left to callers.
#[derive(Debug, Clone)]
pub struct Button<P> {
    input: P,
    pressed: bool,
    last_toggle: Ticks,
}

impl<P: DigitalInput> Button<P> {
    pub fn new(input: P) -> Self {
        Self {
            input,
            pressed: false,
            last_toggle: 0,
        }
    }

    pub fn update(&mut self, now: Ticks) {
        let sampled = self.input.is_high();
        if sampled != self.pressed {
            self.pressed = sampled;
            self.last_toggle = now;
        }
    }

    pub fn is_pressed(&self) -> bool {
        self.pressed
    }

    pub fn is_pressed_for(&self, now: Ticks, span: Ticks) -> bool {
        self.pressed && has_elapsed(now, self.last_toggle, span)
    }

    pub fn is_released_for(&self, now: Ticks, span: Ticks) -> bool {
        !self.pressed && has_elapsed(now, self.last_toggle, span)
    }

    pub fn last_toggle(&self) -> Ticks {
        self.last_toggle
    }
}

#[derive(Debug, Clone)]
pub struct ActiveLow<P>(pub P);

impl<P: DigitalInput> DigitalInput for ActiveLow<P> {
    fn is_high(&mut self) -> bool {
        !self.0.is_high()
    }
}
