//! Progress display for transfers
//!
//! Uploads report progress through a [`ProgressFn`] callback that receives
//! the running byte count, so the bar is driven by position rather than by
//! increments. A retried request rewinds its body and the bar moves back
//! with it.

use std::sync::Arc;

use stowage_core::ProgressFn;

use super::OutputConfig;

const BAR_TEMPLATE: &str = "{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})";
const SPINNER_TEMPLATE: &str = "{spinner:.green} {msg} {bytes}";

/// Progress bar wrapper
///
/// In quiet or JSON mode, progress is suppressed.
#[derive(Debug)]
pub struct ProgressBar {
    bar: Option<indicatif::ProgressBar>,
}

impl ProgressBar {
    /// Create a progress bar for a transfer of known size
    pub fn new(config: &OutputConfig, total: u64) -> Self {
        if !Self::enabled(config) {
            return Self { bar: None };
        }
        let style = indicatif::ProgressStyle::default_bar()
            .template(BAR_TEMPLATE)
            .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar())
            .progress_chars("#>-");
        let bar = indicatif::ProgressBar::new(total);
        bar.set_style(style);
        Self { bar: Some(bar) }
    }

    /// Create a spinner for a transfer of unknown size, such as stdin
    pub fn spinner(config: &OutputConfig, message: &str) -> Self {
        if !Self::enabled(config) {
            return Self { bar: None };
        }
        let style = indicatif::ProgressStyle::default_spinner()
            .template(SPINNER_TEMPLATE)
            .unwrap_or_else(|_| indicatif::ProgressStyle::default_spinner());
        let bar = indicatif::ProgressBar::new_spinner();
        bar.set_style(style);
        bar.set_message(message.to_string());
        bar.enable_steady_tick(std::time::Duration::from_millis(100));
        Self { bar: Some(bar) }
    }

    fn enabled(config: &OutputConfig) -> bool {
        !(config.quiet || config.json || config.no_progress)
    }

    /// Update progress
    pub fn set_position(&self, pos: u64) {
        if let Some(bar) = &self.bar {
            bar.set_position(pos);
        }
    }

    /// Callback that moves the bar to the reported byte count
    pub fn callback(&self) -> Option<ProgressFn> {
        let bar = self.bar.clone()?;
        Some(Arc::new(move |pos| bar.set_position(pos)))
    }

    /// Finish and clear the progress bar
    pub fn finish_and_clear(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }

    /// Check if progress bar is visible
    pub fn is_visible(&self) -> bool {
        self.bar.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_bar_quiet_mode() {
        let config = OutputConfig {
            quiet: true,
            ..Default::default()
        };
        let bar = ProgressBar::new(&config, 100);
        assert!(!bar.is_visible());
        assert!(bar.callback().is_none());
    }

    #[test]
    fn test_progress_bar_json_mode() {
        let config = OutputConfig {
            json: true,
            ..Default::default()
        };
        let bar = ProgressBar::new(&config, 100);
        assert!(!bar.is_visible());
    }

    #[test]
    fn test_progress_bar_no_progress() {
        let config = OutputConfig {
            no_progress: true,
            ..Default::default()
        };
        assert!(!ProgressBar::new(&config, 100).is_visible());
        assert!(!ProgressBar::spinner(&config, "stdin").is_visible());
    }

    #[test]
    fn test_progress_callback_moves_bar() {
        let bar = ProgressBar::new(&OutputConfig::default(), 100);
        assert!(bar.is_visible());

        let callback = bar.callback().unwrap();
        callback(60);
        assert_eq!(bar.bar.as_ref().map(|b| b.position()), Some(60));
        // A rewound body reports from zero again
        callback(10);
        assert_eq!(bar.bar.as_ref().map(|b| b.position()), Some(10));
        bar.finish_and_clear();
    }
}
