use crate::{blink::BlinkPattern, config::IndicatorConfig, tick::Ticks, types::LinkStatus};

#[derive(Debug, Clone)]
pub struct StatusIndicator {
    config: IndicatorConfig,
    pattern: BlinkPattern,
    status: Option<LinkStatus>,
}

impl StatusIndicator {
    pub fn new(config: IndicatorConfig) -> Self {
        Self {
            config,
            pattern: BlinkPattern::new(),
            status: None,
        }
    }

    pub fn status(&self) -> Option<LinkStatus> {
        self.status
    }

    pub fn set_status(&mut self, status: LinkStatus) -> bool {
        if self.status == Some(status) {
            return false;
        }
        let spans = self.config.spans_for(status);
        self.pattern.set_pattern(spans.on_ms, spans.off_ms);
        self.status = Some(status);
        true
    }

    // New LED level, if it changed on this tick.
    pub fn update(&mut self, now: Ticks) -> Option<bool> {
        if self.status.is_none() {
            return None;
        }
        self.pattern.update(now).then(|| self.pattern.is_on())
    }

    pub fn is_lit(&self) -> bool {
        self.pattern.is_on()
    }
}
