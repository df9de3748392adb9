//! Section-by-section scroll navigation for landing pages.
//!
//! The controller is input-agnostic: callers feed it wheel deltas, the
//! current scroll offset and layout measurements, and act on the returned
//! [`ScrollDecision`]. Time is passed in explicitly so the cool-down can be
//! driven deterministically.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use crate::domain::page::{CachedPage, PageType};

pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(800);
pub const DEFAULT_MIN_WHEEL_DELTA: f64 = 4.0;
pub const DEFAULT_ANCHOR_FRACTION: f64 = 1.0 / 3.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollConfig {
    /// Time after a transition during which wheel input is swallowed.
    pub cooldown: Duration,
    /// Wheel deltas with a smaller magnitude are left to native scrolling.
    pub min_wheel_delta: f64,
    /// Fraction of the viewport height used as the "active" reference line.
    pub anchor_fraction: f64,
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            cooldown: DEFAULT_COOLDOWN,
            min_wheel_delta: DEFAULT_MIN_WHEEL_DELTA,
            anchor_fraction: DEFAULT_ANCHOR_FRACTION,
        }
    }
}

impl From<&crate::config::Settings> for ScrollConfig {
    fn from(settings: &crate::config::Settings) -> Self {
        Self {
            cooldown: settings.scroll.cooldown,
            min_wheel_delta: settings.scroll.min_wheel_delta,
            anchor_fraction: settings.scroll.anchor_fraction,
        }
    }
}

/// A scroll stop: the top edge of one component (or of an empty section).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapTarget {
    pub section_index: usize,
    pub component_id: String,
    pub top: f64,
}

/// Lay out snap targets for `page` by stacking measured heights.
///
/// `height` is asked for every component in display order; a section without
/// components contributes one target of `empty_section_height`.
pub fn stack_targets(
    page: &CachedPage,
    empty_section_height: f64,
    mut height: impl FnMut(usize, &str) -> f64,
) -> Vec<SnapTarget> {
    let mut top = 0.0;
    let mut targets = Vec::new();
    for (section_index, section) in page.sections.iter().enumerate() {
        if section.components.is_empty() {
            targets.push(SnapTarget {
                section_index,
                component_id: section.id.clone(),
                top,
            });
            top += empty_section_height;
            continue;
        }
        for component in &section.components {
            targets.push(SnapTarget {
                section_index,
                component_id: component.id.clone(),
                top,
            });
            top += height(section_index, &component.id).max(0.0);
        }
    }
    targets
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollState {
    Idle,
    Transitioning { until: Instant },
}

/// What the caller should do with an input event.
#[derive(Debug, Clone, PartialEq)]
pub enum ScrollDecision {
    /// Let the platform scroll natively.
    PassThrough,
    /// Prevent the default scroll and do nothing else.
    Suppressed,
    /// Prevent the default scroll and smoothly scroll to `top`.
    Transition {
        target: usize,
        section_index: usize,
        top: f64,
    },
}

pub struct SectionScrollController {
    config: ScrollConfig,
    state: ScrollState,
    targets: Vec<SnapTarget>,
    viewport_height: f64,
    active_section: usize,
}

impl SectionScrollController {
    /// Attach to `page`; only landing pages get snap navigation.
    pub fn attach(page: &CachedPage, config: ScrollConfig) -> Option<Self> {
        Self::for_page_type(&page.page.page_type, config)
    }

    pub fn for_page_type(page_type: &PageType, config: ScrollConfig) -> Option<Self> {
        if !page_type.is_landing() {
            return None;
        }
        Some(Self {
            config,
            state: ScrollState::Idle,
            targets: Vec::new(),
            viewport_height: 0.0,
            active_section: 0,
        })
    }

    /// Replace the measured layout, e.g. after a resize or a content change.
    ///
    /// Only positions are recomputed; an ongoing transition keeps running.
    pub fn layout(&mut self, mut targets: Vec<SnapTarget>, viewport_height: f64) {
        targets.sort_by(|a, b| a.top.total_cmp(&b.top));
        self.targets = targets;
        self.viewport_height = viewport_height.max(0.0);
        if let Some(last) = self.targets.last() {
            self.active_section = self.active_section.min(last.section_index);
        } else {
            self.active_section = 0;
        }
    }

    /// Current state, with an elapsed cool-down folded back to idle.
    pub fn state(&mut self, now: Instant) -> ScrollState {
        if let ScrollState::Transitioning { until } = self.state
            && now >= until
        {
            self.state = ScrollState::Idle;
        }
        self.state
    }

    pub fn active_section(&self) -> usize {
        self.active_section
    }

    pub fn targets(&self) -> &[SnapTarget] {
        &self.targets
    }

    /// Index of the target whose top is nearest above the anchor line.
    pub fn current_index(&self, scroll_top: f64) -> usize {
        let anchor = scroll_top + self.viewport_height * self.config.anchor_fraction;
        self.targets
            .iter()
            .rposition(|target| target.top <= anchor)
            .unwrap_or(0)
    }

    pub fn on_wheel(&mut self, delta_y: f64, scroll_top: f64, now: Instant) -> ScrollDecision {
        if matches!(self.state(now), ScrollState::Transitioning { .. }) {
            return ScrollDecision::Suppressed;
        }
        if !delta_y.is_finite() || delta_y.abs() < self.config.min_wheel_delta {
            return ScrollDecision::PassThrough;
        }
        if self.targets.is_empty() {
            return ScrollDecision::PassThrough;
        }

        let current = self.current_index(scroll_top);
        let target = if delta_y > 0.0 {
            (current + 1).min(self.targets.len() - 1)
        } else {
            current.saturating_sub(1)
        };
        if target == current {
            return ScrollDecision::PassThrough;
        }

        self.begin_transition(target, now)
    }

    /// Jump to target `index`, clamped to the layout.
    ///
    /// Ignores the wheel cool-down but starts a new one.
    pub fn navigate_to(&mut self, index: usize, now: Instant) -> ScrollDecision {
        if self.targets.is_empty() {
            return ScrollDecision::PassThrough;
        }
        let index = index.min(self.targets.len() - 1);
        self.begin_transition(index, now)
    }

    /// Jump to the first target of section `section_index`.
    pub fn navigate_to_section(&mut self, section_index: usize, now: Instant) -> ScrollDecision {
        match self
            .targets
            .iter()
            .position(|target| target.section_index == section_index)
        {
            Some(index) => self.begin_transition(index, now),
            None => ScrollDecision::PassThrough,
        }
    }

    fn begin_transition(&mut self, index: usize, now: Instant) -> ScrollDecision {
        let Some(target) = self.targets.get(index) else {
            return ScrollDecision::PassThrough;
        };
        self.state = ScrollState::Transitioning {
            until: now + self.config.cooldown,
        };
        self.active_section = target.section_index;
        debug!(
            target_index = index,
            section = target.section_index,
            component = %target.component_id,
            "section transition"
        );
        ScrollDecision::Transition {
            target: index,
            section_index: target.section_index,
            top: target.top,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::components::ComponentKind;
    use crate::domain::page::{PageMetadata, ResolvedComponent, ResolvedSection};

    use super::*;

    const VIEWPORT: f64 = 900.0;

    fn page(page_type: PageType, sections: &[usize]) -> CachedPage {
        let sections = sections
            .iter()
            .enumerate()
            .map(|(index, &components)| ResolvedSection {
                id: format!("s{index}"),
                title: None,
                order: index as i64,
                background_image: None,
                background_type: None,
                components: (0..components)
                    .map(|n| ResolvedComponent {
                        id: format!("s{index}-c{n}"),
                        kind: ComponentKind::Text,
                        data: serde_json::Map::new(),
                    })
                    .collect(),
            })
            .collect();
        CachedPage::new(
            PageMetadata {
                id: "p".to_string(),
                slug: "home".to_string(),
                locale: "en".to_string(),
                title: None,
                page_type,
            },
            sections,
        )
    }

    fn controller(sections: &[usize]) -> SectionScrollController {
        let page = page(PageType::Landing, sections);
        let mut controller =
            SectionScrollController::attach(&page, ScrollConfig::default()).expect("landing");
        controller.layout(stack_targets(&page, VIEWPORT, |_, _| VIEWPORT), VIEWPORT);
        controller
    }

    #[test]
    fn only_landing_pages_attach() {
        let config = ScrollConfig::default();
        assert!(SectionScrollController::attach(&page(PageType::Standard, &[1]), config).is_none());
        assert!(SectionScrollController::attach(&page(PageType::Blog, &[1]), config).is_none());
        assert!(SectionScrollController::attach(&page(PageType::Landing, &[1]), config).is_some());
    }

    #[test]
    fn targets_follow_component_boundaries() {
        let page = page(PageType::Landing, &[2, 0, 1]);
        let targets = stack_targets(&page, 500.0, |_, _| 300.0);

        let tops: Vec<f64> = targets.iter().map(|t| t.top).collect();
        assert_eq!(tops, vec![0.0, 300.0, 600.0, 1100.0]);
        assert_eq!(targets[2].component_id, "s1");
        assert_eq!(targets[3].section_index, 2);
    }

    #[test]
    fn burst_of_wheel_events_moves_once_per_cooldown() {
        let mut controller = controller(&[1, 1, 1, 1]);
        let start = Instant::now();

        let transitions = (0..10)
            .map(|n| controller.on_wheel(40.0, 0.0, start + Duration::from_millis(n * 50)))
            .filter(|decision| matches!(decision, ScrollDecision::Transition { .. }))
            .count();

        assert_eq!(transitions, 1);
        assert_eq!(controller.active_section(), 1);
    }

    #[test]
    fn wheel_after_cooldown_moves_again() {
        let mut controller = controller(&[1, 1, 1]);
        let start = Instant::now();

        controller.on_wheel(40.0, 0.0, start);
        let later = start + DEFAULT_COOLDOWN;
        assert_eq!(controller.state(later), ScrollState::Idle);

        let decision = controller.on_wheel(40.0, VIEWPORT, later);
        assert_eq!(
            decision,
            ScrollDecision::Transition {
                target: 2,
                section_index: 2,
                top: 2.0 * VIEWPORT
            }
        );
    }

    #[test]
    fn small_deltas_pass_through() {
        let mut controller = controller(&[1, 1]);
        let decision = controller.on_wheel(1.5, 0.0, Instant::now());
        assert_eq!(decision, ScrollDecision::PassThrough);
        assert_eq!(controller.state(Instant::now()), ScrollState::Idle);
    }

    #[test]
    fn small_deltas_are_suppressed_while_transitioning() {
        let mut controller = controller(&[1, 1]);
        let now = Instant::now();
        controller.on_wheel(40.0, 0.0, now);
        assert_eq!(controller.on_wheel(0.5, 0.0, now), ScrollDecision::Suppressed);
    }

    #[test]
    fn boundaries_clamp() {
        let mut controller = controller(&[1, 1]);
        let now = Instant::now();

        assert_eq!(controller.on_wheel(-40.0, 0.0, now), ScrollDecision::PassThrough);
        assert_eq!(
            controller.on_wheel(40.0, VIEWPORT, now),
            ScrollDecision::PassThrough
        );
    }

    #[test]
    fn upward_wheel_moves_back() {
        let mut controller = controller(&[1, 1, 1]);
        let decision = controller.on_wheel(-40.0, 2.0 * VIEWPORT, Instant::now());
        assert!(matches!(
            decision,
            ScrollDecision::Transition { target: 1, .. }
        ));
    }

    #[test]
    fn active_index_uses_one_third_anchor() {
        let controller = controller(&[1, 1, 1]);
        // Anchor line at 300 + 300 = 600: still inside the first target.
        assert_eq!(controller.current_index(300.0), 0);
        // Anchor line at 700 + 300 = 1000: past the second target's top.
        assert_eq!(controller.current_index(700.0), 1);
    }

    #[test]
    fn explicit_navigation_bypasses_and_starts_cooldown() {
        let mut controller = controller(&[1, 1, 1]);
        let now = Instant::now();
        controller.on_wheel(40.0, 0.0, now);

        let decision = controller.navigate_to_section(2, now + Duration::from_millis(10));
        assert!(matches!(
            decision,
            ScrollDecision::Transition {
                section_index: 2,
                ..
            }
        ));
        assert_eq!(
            controller.on_wheel(-40.0, 2.0 * VIEWPORT, now + Duration::from_millis(500)),
            ScrollDecision::Suppressed
        );
        assert_eq!(controller.active_section(), 2);
    }

    #[test]
    fn navigate_to_clamps_index() {
        let mut controller = controller(&[1, 1]);
        let decision = controller.navigate_to(9, Instant::now());
        assert!(matches!(decision, ScrollDecision::Transition { target: 1, .. }));
    }

    #[test]
    fn resize_keeps_transition_running() {
        let mut controller = controller(&[1, 1, 1]);
        let now = Instant::now();
        controller.on_wheel(40.0, 0.0, now);

        let page = page(PageType::Landing, &[1, 1, 1]);
        controller.layout(stack_targets(&page, 600.0, |_, _| 600.0), 600.0);

        assert!(matches!(
            controller.state(now + Duration::from_millis(100)),
            ScrollState::Transitioning { .. }
        ));
        assert_eq!(controller.targets()[1].top, 600.0);
        assert_eq!(controller.active_section(), 1);
    }
}
