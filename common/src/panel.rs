use crate::{
    button::{Button, DigitalInput},
    config::{ButtonConfig, IndicatorConfig},
    indicator::StatusIndicator,
    tick::Ticks,
    types::LinkStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelAction {
    Led(bool),
    ToggleAccessPoint,
    ReportNow,
}

#[derive(Debug, Clone, Copy, Default)]
struct GestureState {
    armed: bool,
    long_fired: bool,
}

#[derive(Debug)]
pub struct FrontPanel<P> {
    button: Button<P>,
    config: ButtonConfig,
    gesture: GestureState,
    indicator: StatusIndicator,
}

impl<P: DigitalInput> FrontPanel<P> {
    pub fn new(input: P, button: ButtonConfig, indicator: IndicatorConfig) -> Self {
        Self {
            button: Button::new(input),
            config: button,
            gesture: GestureState::default(),
            indicator: StatusIndicator::new(indicator),
        }
    }

    pub fn set_status(&mut self, status: LinkStatus) -> bool {
        self.indicator.set_status(status)
    }

    pub fn status(&self) -> Option<LinkStatus> {
        self.indicator.status()
    }

    pub fn tick(&mut self, now: Ticks) -> Vec<PanelAction> {
        let mut actions = Vec::new();

        self.button.update(now);
        if let Some(action) = self.poll_gesture(now) {
            actions.push(action);
        }

        if let Some(level) = self.indicator.update(now) {
            actions.push(PanelAction::Led(level));
        }

        actions
    }

    fn poll_gesture(&mut self, now: Ticks) -> Option<PanelAction> {
        let ButtonConfig {
            press_ms,
            long_press_ms,
            ..
        } = self.config;

        if self.button.is_pressed_for(now, long_press_ms) && !self.gesture.long_fired {
            self.gesture.long_fired = true;
            return Some(PanelAction::ToggleAccessPoint);
        }

        if self.button.is_pressed_for(now, press_ms) {
            self.gesture.armed = true;
            return None;
        }

        // Short release blips while armed are bounce, not the end of the press.
        if self.button.is_released_for(now, press_ms) {
            let short_press = self.gesture.armed && !self.gesture.long_fired;
            self.gesture = GestureState::default();
            if short_press {
                return Some(PanelAction::ReportNow);
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, rc::Rc};

    use super::*;
    use crate::config::BlinkSpans;

    struct Harness {
        level: Rc<Cell<bool>>,
        panel: FrontPanel<Box<dyn FnMut() -> bool>>,
    }

    impl Harness {
        fn new() -> Self {
            let level = Rc::new(Cell::new(false));
            let input: Box<dyn FnMut() -> bool> = {
                let level = level.clone();
                Box::new(move || level.get())
            };
            let indicator = IndicatorConfig {
                led_pin: 2,
                connecting: BlinkSpans::new(100, 100),
                connected: BlinkSpans::new(100, 900),
                access_point: BlinkSpans::new(500, 500),
                offline: BlinkSpans::new(1, 0),
            };
            Self {
                level,
                panel: FrontPanel::new(input, ButtonConfig::default(), indicator),
            }
        }

        fn run(&mut self, from: Ticks, to: Ticks) -> Vec<(Ticks, PanelAction)> {
            let mut seen = Vec::new();
            let mut now = from;
            while now != to {
                for action in self.panel.tick(now) {
                    if !matches!(action, PanelAction::Led(_)) {
                        seen.push((now, action));
                    }
                }
                now = now.wrapping_add(10);
            }
            seen
        }
    }

    #[test]
    fn long_press_fires_once_per_hold() {
        let mut harness = Harness::new();
        harness.run(0, 100);

        harness.level.set(true);
        let actions = harness.run(100, 5_000);
        assert_eq!(actions, vec![(2_100, PanelAction::ToggleAccessPoint)]);

        harness.level.set(false);
        assert!(harness.run(5_000, 6_000).is_empty());
    }

    #[test]
    fn short_press_reports_after_release() {
        let mut harness = Harness::new();
        harness.level.set(true);
        harness.run(0, 300);

        harness.level.set(false);
        let actions = harness.run(300, 600);
        assert_eq!(actions, vec![(350, PanelAction::ReportNow)]);
    }

    #[test]
    fn bounce_shorter_than_press_span_is_ignored() {
        let mut harness = Harness::new();
        harness.level.set(true);
        harness.run(0, 30);
        harness.level.set(false);

        assert!(harness.run(30, 1_000).is_empty());
    }

    #[test]
    fn release_bounce_does_not_split_press() {
        let mut harness = Harness::new();
        harness.level.set(true);
        harness.run(0, 200);

        // 20 ms release glitch, then held until the long press fires.
        harness.level.set(false);
        harness.run(200, 220);
        harness.level.set(true);
        let actions = harness.run(220, 2_500);
        assert_eq!(actions, vec![(2_220, PanelAction::ToggleAccessPoint)]);
    }

    #[test]
    fn long_press_across_tick_wrap() {
        let mut harness = Harness::new();
        let start = u32::MAX - 995;
        harness.run(start.wrapping_sub(100), start);

        harness.level.set(true);
        let actions = harness.run(start, start.wrapping_add(3_000));
        assert_eq!(
            actions,
            vec![(start.wrapping_add(2_000), PanelAction::ToggleAccessPoint)]
        );
    }

    #[test]
    fn led_actions_follow_status() {
        let mut harness = Harness::new();
        assert!(harness.panel.tick(0).is_empty());

        harness.panel.set_status(LinkStatus::Connecting);
        assert_eq!(harness.panel.tick(10), vec![PanelAction::Led(true)]);
        assert!(harness.panel.tick(50).is_empty());
        assert_eq!(harness.panel.tick(110), vec![PanelAction::Led(false)]);
        assert_eq!(harness.panel.status(), Some(LinkStatus::Connecting));
    }
}
