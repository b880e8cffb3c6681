//! Geometry lock: pin the target's size for the duration of a capture.
//!
//! Detached and offscreen layout contexts tend to collapse a node's height
//! to zero. While a [`GeometryLock`] is alive the target is visible, exactly
//! `cardWidth` wide and at least `max(natural height, min_height)` tall.
//! Dropping the lock puts the original style attributes back, on every
//! path out of the capture including errors and cancellation.

use crate::config::StyleSnapshot;
use crate::raster::Geometry;
use crate::target::{RenderTarget, TargetStyle};
use tracing::debug;

/// Guard that restores the target's style on drop.
#[must_use = "the lock restores the target's style as soon as it is dropped"]
pub struct GeometryLock<'a> {
    target: &'a dyn RenderTarget,
    original: TargetStyle,
    geometry: Geometry,
}

impl<'a> GeometryLock<'a> {
    pub fn acquire(target: &'a dyn RenderTarget, snapshot: &StyleSnapshot, min_height: u32) -> Self {
        let original = target.style();
        let natural = target.natural_height(snapshot);
        let height = natural.max(min_height);
        let geometry = Geometry {
            width: snapshot.card_width,
            height: Some(height),
        };

        target.set_style(&TargetStyle {
            visibility: Some("visible".to_string()),
            width: Some(format!("{}px", snapshot.card_width)),
            min_height: Some(format!("{}px", height)),
        });
        debug!(
            "Geometry locked at {}x{} (natural height {})",
            snapshot.card_width, height, natural
        );

        Self {
            target,
            original,
            geometry,
        }
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }
}

impl Drop for GeometryLock<'_> {
    fn drop(&mut self) {
        self.target.set_style(&self.original);
        debug!("Geometry lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::DomTarget;

    fn hidden() -> TargetStyle {
        TargetStyle {
            visibility: Some("hidden".into()),
            width: None,
            min_height: Some("10px".into()),
        }
    }

    #[test]
    fn short_targets_are_raised_to_the_minimum() {
        let target = DomTarget::card("x").with_natural_height(120);
        let lock = GeometryLock::acquire(&target, &StyleSnapshot::default(), 540);
        assert_eq!(
            lock.geometry(),
            Geometry {
                width: 960,
                height: Some(540)
            }
        );
        assert_eq!(target.style().min_height.as_deref(), Some("540px"));
    }

    #[test]
    fn tall_targets_keep_their_height() {
        let target = DomTarget::card("x").with_natural_height(900);
        let lock = GeometryLock::acquire(&target, &StyleSnapshot::default(), 540);
        assert_eq!(lock.geometry().height, Some(900));
    }

    #[test]
    fn long_text_locks_at_its_layout_height() {
        let target = DomTarget::card(&"word ".repeat(600));
        let lock = GeometryLock::acquire(&target, &StyleSnapshot::default(), 540);
        let height = lock.geometry().height.unwrap();
        assert!(height > 1100, "locked at {height}");
        assert_eq!(target.style().min_height, Some(format!("{height}px")));
    }

    #[test]
    fn drop_restores_original_style() {
        let target = DomTarget::card("x").with_style(hidden());
        {
            let _lock = GeometryLock::acquire(&target, &StyleSnapshot::default(), 540);
            assert_eq!(target.style().visibility.as_deref(), Some("visible"));
            assert_eq!(target.style().width.as_deref(), Some("960px"));
        }
        assert_eq!(target.style(), hidden());
    }
}
