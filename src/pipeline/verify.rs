//! Content verification: make sure the target shows the text being captured.
//!
//! The presentation layer updates the preview asynchronously, so a capture
//! can start while stale text (typically the placeholder) is still on
//! screen. The check compares whitespace-normalised text, forces one
//! synchronous re-render on mismatch, waits a short settle delay and
//! compares again.

use crate::error::ShareImageError;
use crate::notify::{Event, Notifier};
use crate::target::RenderTarget;
use std::time::Duration;
use tracing::{debug, warn};

/// What the verification step found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentCheck {
    /// The target already showed the expected text.
    Matched,
    /// The target was stale and re-rendering fixed it.
    Repaired,
    /// The target still disagrees after re-rendering; capture proceeds.
    Unreconciled,
}

/// Collapse whitespace runs so line-wrapping differences don't count.
fn normalise(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn matches(displayed: &str, expected: &str) -> bool {
    normalise(displayed) == normalise(expected)
}

/// Verify, and if needed repair, the text shown by `target`.
///
/// # Errors
/// `ContentMismatch` only when `strict` is set and the repair did not take.
pub async fn ensure_content(
    target: &dyn RenderTarget,
    expected: &str,
    page: usize,
    settle: Duration,
    strict: bool,
    notifier: &dyn Notifier,
) -> Result<ContentCheck, ShareImageError> {
    let displayed = target.rendered_text();
    if matches(&displayed, expected) {
        debug!("Page {}: displayed content verified", page);
        return Ok(ContentCheck::Matched);
    }

    warn!(
        "Page {}: displayed content is stale ({} chars shown, {} expected), re-rendering",
        page,
        displayed.chars().count(),
        expected.chars().count()
    );
    target.render_content(expected);
    if !settle.is_zero() {
        tokio::time::sleep(settle).await;
    }

    let displayed = target.rendered_text();
    if matches(&displayed, expected) {
        notifier.notify(&Event::ContentRepaired { page });
        return Ok(ContentCheck::Repaired);
    }

    let (expected_len, found_len) = (expected.chars().count(), displayed.chars().count());
    if strict {
        return Err(ShareImageError::ContentMismatch {
            expected: expected_len,
            found: found_len,
        });
    }
    warn!(
        "Page {}: content still differs after re-render ({} vs {} chars), capturing anyway",
        page, found_len, expected_len
    );
    Ok(ContentCheck::Unreconciled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StyleSnapshot;
    use crate::dom::Node;
    use crate::notify::NoopNotifier;
    use crate::target::{DomTarget, TargetStyle};

    /// A target whose displayed text never changes.
    struct Frozen(&'static str);

    impl RenderTarget for Frozen {
        fn style(&self) -> TargetStyle {
            TargetStyle::default()
        }
        fn set_style(&self, _style: &TargetStyle) {}
        fn rendered_text(&self) -> String {
            self.0.to_string()
        }
        fn render_content(&self, _text: &str) {}
        fn natural_height(&self, _style: &StyleSnapshot) -> u32 {
            0
        }
        fn snapshot(&self) -> Node {
            Node::text(self.0)
        }
    }

    #[tokio::test]
    async fn whitespace_differences_match() {
        let target = DomTarget::card("Hello\n  world");
        let check = ensure_content(&target, "Hello world", 1, Duration::ZERO, true, &NoopNotifier)
            .await
            .unwrap();
        assert_eq!(check, ContentCheck::Matched);
    }

    #[tokio::test]
    async fn stale_placeholder_is_repaired() {
        let target = DomTarget::card("Type something…");
        let check = ensure_content(&target, "Hello", 1, Duration::from_millis(1), true, &NoopNotifier)
            .await
            .unwrap();
        assert_eq!(check, ContentCheck::Repaired);
        assert_eq!(target.rendered_text(), "Hello");
    }

    #[tokio::test]
    async fn unrepairable_target_fails_only_when_strict() {
        let target = Frozen("stale");
        let lenient = ensure_content(&target, "fresh!", 2, Duration::ZERO, false, &NoopNotifier)
            .await
            .unwrap();
        assert_eq!(lenient, ContentCheck::Unreconciled);

        let err = ensure_content(&target, "fresh!", 2, Duration::ZERO, true, &NoopNotifier)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ShareImageError::ContentMismatch {
                expected: 6,
                found: 5
            }
        ));
    }
}
