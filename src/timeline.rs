use crate::panel::Panel;

/// Seconds spent animating from one panel's rest position into the next, at
/// 1.0x scroll speed.
pub const BASE_SCROLL_SECONDS: f64 = 1.5;

/// Floor for the hold segment. A panel with no narration still stays on
/// screen this long, so silent panels are never skipped.
pub const MINIMUM_PAUSE_SECONDS: f64 = 1.0;

/// One (scroll, hold) pair of the schedule. Scroll positions are pixel
/// offsets into the surface; each panel consumes exactly one viewport of
/// travel, an assumption the capture driver and the external renderer share.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineStep {
    pub panel_id: String,
    pub index: usize,
    /// Absolute time at which this step begins.
    pub start_time: f64,
    pub scroll_start: f64,
    pub scroll_end: f64,
    pub scroll_duration: f64,
    pub pause_duration: f64,
    pub narration_duration: f64,
}

impl TimelineStep {
    pub fn step_duration(&self) -> f64 {
        self.scroll_duration + self.pause_duration
    }

    /// Absolute time at which narration for this panel starts: only once the
    /// scroll-in animation has finished, not at panel entry.
    pub fn narration_start(&self) -> f64 {
        self.start_time + self.scroll_duration
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    pub steps: Vec<TimelineStep>,
    pub total_duration: f64,
}

/// Builds the global schedule from per-panel narration durations. Pure: same
/// inputs always yield the same schedule.
pub fn build(
    panels: &[Panel],
    narration_durations: &[f64],
    viewport_height: f64,
    pause_padding: f64,
    scroll_speed: f64,
) -> Schedule {
    let scroll_duration = BASE_SCROLL_SECONDS / scroll_speed;
    let mut steps = Vec::with_capacity(panels.len());
    let mut clock = 0.0_f64;

    for (index, panel) in panels.iter().enumerate() {
        let narration = narration_durations
            .get(index)
            .copied()
            .unwrap_or(0.0)
            .max(0.0);
        let pause_duration = if narration > 0.0 {
            narration + pause_padding
        } else {
            MINIMUM_PAUSE_SECONDS
        };
        let pause_duration = pause_duration.max(MINIMUM_PAUSE_SECONDS);

        let scroll_start = index as f64 * viewport_height;
        steps.push(TimelineStep {
            panel_id: panel.id.clone(),
            index,
            start_time: clock,
            scroll_start,
            scroll_end: scroll_start + viewport_height,
            scroll_duration,
            pause_duration,
            narration_duration: narration,
        });
        clock += scroll_duration + pause_duration;
    }

    Schedule {
        steps,
        total_duration: clock,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn panel(id: &str) -> Panel {
        Panel {
            id: id.to_string(),
            title: id.to_string(),
            message: String::new(),
            narration_override_text: None,
            ambience: None,
            tags: Vec::new(),
        }
    }

    const TOLERANCE: f64 = 1e-6;

    #[test]
    fn three_panel_scenario() {
        let panels = vec![panel("a"), panel("b"), panel("c")];
        let schedule = build(&panels, &[2.0, 0.0, 1.5], 1920.0, 0.5, 1.0);

        let pauses: Vec<f64> = schedule.steps.iter().map(|s| s.pause_duration).collect();
        assert_eq!(pauses, vec![2.5, 1.0, 2.0]);
        for step in &schedule.steps {
            assert!((step.scroll_duration - 1.5).abs() < TOLERANCE);
        }
        assert!((schedule.total_duration - 10.0).abs() < TOLERANCE);
    }

    #[test]
    fn deterministic_for_identical_inputs() {
        let panels = vec![panel("a"), panel("b")];
        let durations = [3.25, 0.0];
        let first = build(&panels, &durations, 1080.0, 0.5, 1.25);
        let second = build(&panels, &durations, 1080.0, 0.5, 1.25);
        assert_eq!(first, second);
    }

    #[test]
    fn steps_are_contiguous() {
        let panels = vec![panel("a"), panel("b"), panel("c"), panel("d")];
        let schedule = build(&panels, &[1.0, 0.0, 4.2, 0.3], 1920.0, 0.5, 2.0);

        let mut clock = 0.0;
        for window in schedule.steps.windows(2) {
            assert!((window[0].scroll_end - window[1].scroll_start).abs() < TOLERANCE);
        }
        for step in &schedule.steps {
            assert!((step.start_time - clock).abs() < TOLERANCE);
            clock += step.step_duration();
        }
        assert!((schedule.total_duration - clock).abs() < TOLERANCE);
    }

    #[test]
    fn silent_panels_keep_the_minimum_pause() {
        let panels = vec![panel("a"), panel("b"), panel("c")];
        // Missing and negative durations degrade to the minimum, never zero.
        let schedule = build(&panels, &[0.0, -4.0], 1920.0, 0.5, 1.0);
        for step in &schedule.steps {
            assert!(step.pause_duration >= MINIMUM_PAUSE_SECONDS);
        }
    }

    #[test]
    fn scroll_speed_shortens_the_scroll_segment() {
        let panels = vec![panel("a")];
        let schedule = build(&panels, &[0.0], 1920.0, 0.5, 3.0);
        assert!((schedule.steps[0].scroll_duration - 0.5).abs() < TOLERANCE);
    }

    #[test]
    fn narration_starts_after_scroll_in() {
        let panels = vec![panel("a"), panel("b")];
        let schedule = build(&panels, &[2.0, 1.0], 1920.0, 0.5, 1.0);
        let second = &schedule.steps[1];
        assert!((second.narration_start() - (second.start_time + 1.5)).abs() < TOLERANCE);
    }
}
