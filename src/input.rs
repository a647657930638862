// ============================================================================
// input.rs — TriEvo
// Advance trigger: press-to-toggle continuous refinement plus single steps.
// ============================================================================

/// Decides, once per frame, whether a refinement tick should run.
#[derive(Default, Debug)]
pub struct AdvanceTrigger {
    running: bool,
    step_requested: bool,
}

impl AdvanceTrigger {
    pub fn new(running: bool) -> Self {
        Self {
            running,
            step_requested: false,
        }
    }

    pub fn running(&self) -> bool {
        self.running
    }

    /// Flip continuous mode. Callers pass only fresh presses (no releases,
    /// no key-repeat), so one physical press is exactly one toggle.
    pub fn toggle(&mut self) {
        self.running = !self.running;
    }

    pub fn request_step(&mut self) {
        self.step_requested = true;
    }

    /// Consume this frame's decision.
    pub fn take(&mut self) -> bool {
        let go = self.running || self.step_requested;
        self.step_requested = false;
        go
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_step_fires_once() {
        let mut t = AdvanceTrigger::default();
        assert!(!t.take());
        t.request_step();
        assert!(t.take());
        assert!(!t.take());
    }

    #[test]
    fn toggle_runs_every_frame_until_toggled_back() {
        let mut t = AdvanceTrigger::default();
        t.toggle();
        assert!(t.take() && t.take());
        t.toggle();
        assert!(!t.running());
        assert!(!t.take());
    }
}
