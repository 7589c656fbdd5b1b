//! Idle detection and time-based dimming

use chrono::NaiveTime;
use std::time::Duration;

use crate::config::{DimmingSettings, IdleEffectKind, IdleSettings};
use crate::layer::{Color, EffectLayer};

/// Period of one breathing cycle
const BREATHING_PERIOD_SECS: f32 = 4.0;

/// Time since the last user input
pub trait IdleSource: Send + Sync {
    /// `None` when the source cannot tell
    fn idle_time(&self) -> Option<Duration>;
}

/// Source for headless sessions: the user is never idle
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverIdle;

impl IdleSource for NeverIdle {
    fn idle_time(&self) -> Option<Duration> {
        None
    }
}

/// Daily window, `[start, end)`, wrapping across midnight when `end < start`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DimmingWindow {
    start: NaiveTime,
    end: NaiveTime,
}

impl DimmingWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// `None` when dimming is off or the configured times are invalid
    pub fn from_settings(settings: &DimmingSettings) -> Option<Self> {
        if !settings.enabled {
            return None;
        }
        let start = NaiveTime::from_hms_opt(settings.start_hour, settings.start_minute, 0)?;
        let end = NaiveTime::from_hms_opt(settings.end_hour, settings.end_minute, 0)?;
        Some(Self::new(start, end))
    }

    /// An empty window (`start == end`) never matches
    pub fn contains(&self, now: NaiveTime) -> bool {
        if self.start == self.end {
            false
        } else if self.start < self.end {
            now >= self.start && now < self.end
        } else {
            now >= self.start || now < self.end
        }
    }
}

/// Overlay for the idle effect, `None` until the idle delay has elapsed
pub fn idle_effect(settings: &IdleSettings, idle_for: Duration) -> Option<EffectLayer> {
    let delay = Duration::from_secs(settings.delay_secs);
    if idle_for < delay {
        return None;
    }
    let amount = settings.amount.clamp(0.0, 1.0);

    let color = match settings.effect {
        IdleEffectKind::None => return None,
        IdleEffectKind::Dim => Color::BLACK.fade(amount),
        IdleEffectKind::Solid => settings.color.fade(amount),
        IdleEffectKind::Breathing => {
            let t = (idle_for - delay).as_secs_f32() / BREATHING_PERIOD_SECS;
            let wave = (1.0 - (t * std::f32::consts::TAU).cos()) / 2.0;
            settings.color.fade(amount * wave)
        }
    };
    Some(EffectLayer::filled("Idle", color))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_window_within_day() {
        let window = DimmingWindow::new(time(9, 0), time(17, 30));
        assert!(window.contains(time(9, 0)));
        assert!(window.contains(time(12, 0)));
        assert!(!window.contains(time(17, 30)));
        assert!(!window.contains(time(8, 59)));
    }

    #[test]
    fn test_window_wraps_midnight() {
        let window = DimmingWindow::new(time(22, 0), time(7, 0));
        assert!(window.contains(time(23, 15)));
        assert!(window.contains(time(0, 0)));
        assert!(window.contains(time(6, 59)));
        assert!(!window.contains(time(7, 0)));
        assert!(!window.contains(time(12, 0)));
    }

    #[test]
    fn test_empty_window_never_matches() {
        let window = DimmingWindow::new(time(3, 0), time(3, 0));
        assert!(!window.contains(time(3, 0)));
    }

    #[test]
    fn test_disabled_settings_give_no_window() {
        let settings = DimmingSettings::default();
        assert!(DimmingWindow::from_settings(&settings).is_none());
        let enabled = DimmingSettings { enabled: true, ..settings };
        assert!(DimmingWindow::from_settings(&enabled).is_some());
    }

    #[test]
    fn test_idle_effect_waits_for_delay() {
        let settings = IdleSettings {
            effect: IdleEffectKind::Dim,
            delay_secs: 60,
            color: Color::BLACK,
            amount: 0.5,
        };
        assert!(idle_effect(&settings, Duration::from_secs(59)).is_none());
        let layer = idle_effect(&settings, Duration::from_secs(60)).unwrap();
        assert_eq!(layer.fill, Some(Color::rgba(0, 0, 0, 128)));
    }

    #[test]
    fn test_idle_effect_none_kind() {
        let settings = IdleSettings::default();
        assert!(idle_effect(&settings, Duration::from_secs(86_400)).is_none());
    }

    #[test]
    fn test_breathing_starts_dark_and_peaks_mid_cycle() {
        let settings = IdleSettings {
            effect: IdleEffectKind::Breathing,
            delay_secs: 0,
            color: Color::rgb(255, 0, 0),
            amount: 1.0,
        };
        let start = idle_effect(&settings, Duration::ZERO).unwrap();
        assert_eq!(start.fill.unwrap().a, 0);
        let peak = idle_effect(&settings, Duration::from_secs(2)).unwrap();
        assert_eq!(peak.fill.unwrap().a, 255);
    }
}
