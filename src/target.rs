//! The render target: the live node the presentation layer shows.
//!
//! The pipeline only borrows a target for the duration of one capture. It
//! reads the displayed text, may force a re-render of the expected text,
//! temporarily overrides three style attributes (always restoring them), and
//! takes a detached clone for rasterization. Methods take `&self`: a target
//! is a shared handle like a DOM node, and the render queue guarantees only
//! one capture touches it at a time.

use crate::config::StyleSnapshot;
use crate::dom::{self, Node, CONTENT_ID};
use crate::raster;
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard};

/// The style attributes a capture overrides. `None` means "not set".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetStyle {
    pub visibility: Option<String>,
    pub width: Option<String>,
    pub min_height: Option<String>,
}

/// Capability the presentation layer exposes for its preview node.
#[async_trait]
pub trait RenderTarget: Send + Sync {
    /// Resolves once every font the node uses has loaded.
    async fn fonts_ready(&self) {}

    fn style(&self) -> TargetStyle;

    fn set_style(&self, style: &TargetStyle);

    /// The text currently displayed.
    fn rendered_text(&self) -> String;

    /// Synchronously replace the displayed text.
    fn render_content(&self, text: &str);

    /// Natural layout height in CSS pixels with `style` applied at its
    /// card width.
    fn natural_height(&self, style: &StyleSnapshot) -> u32;

    /// Deep copy of the node, detached from the live tree.
    fn snapshot(&self) -> Node;
}

#[derive(Debug)]
struct DomState {
    root: Node,
    style: TargetStyle,
    measured_height: Option<u32>,
    fonts_waited: usize,
}

/// In-memory [`RenderTarget`] over a [`Node`] tree.
///
/// Used by the CLI and by tests. Its natural height is the block layout of
/// its text (see [`raster::content_height`]) unless the owner pinned a
/// measured value with [`DomTarget::set_natural_height`].
#[derive(Debug)]
pub struct DomTarget {
    state: Mutex<DomState>,
}

impl DomTarget {
    pub fn new(root: Node) -> Self {
        Self {
            state: Mutex::new(DomState {
                root,
                style: TargetStyle::default(),
                measured_height: None,
                fonts_waited: 0,
            }),
        }
    }

    /// A standard card showing `content`.
    pub fn card(content: &str) -> Self {
        Self::new(dom::card(content))
    }

    pub fn with_natural_height(self, px: u32) -> Self {
        self.lock().measured_height = Some(px);
        self
    }

    pub fn with_style(self, style: TargetStyle) -> Self {
        self.lock().style = style;
        self
    }

    pub fn set_natural_height(&self, px: u32) {
        self.lock().measured_height = Some(px);
    }

    /// How many times a capture waited for fonts.
    pub fn fonts_waited(&self) -> usize {
        self.lock().fonts_waited
    }

    fn lock(&self) -> MutexGuard<'_, DomState> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl RenderTarget for DomTarget {
    async fn fonts_ready(&self) {
        self.lock().fonts_waited += 1;
    }

    fn style(&self) -> TargetStyle {
        self.lock().style.clone()
    }

    fn set_style(&self, style: &TargetStyle) {
        self.lock().style = style.clone();
    }

    fn rendered_text(&self) -> String {
        self.lock().root.card_text()
    }

    fn render_content(&self, text: &str) {
        let mut state = self.lock();
        match state.root.find_by_id_mut(CONTENT_ID) {
            Some(content) => content.set_text_content(text),
            None => {
                let content = Node::element("div")
                    .with_id(CONTENT_ID)
                    .with_child(Node::text(text));
                if let Node::Element(el) = &mut state.root {
                    el.children.push(content);
                } else {
                    state.root = dom::card(text);
                }
            }
        }
    }

    fn natural_height(&self, style: &StyleSnapshot) -> u32 {
        let state = self.lock();
        match state.measured_height {
            Some(px) => px,
            None => raster::content_height(&state.root.text_content(), style.card_width, style),
        }
    }

    fn snapshot(&self) -> Node {
        self.lock().root.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_content_replaces_displayed_text() {
        let target = DomTarget::card("placeholder");
        target.render_content("Hello");
        assert_eq!(target.rendered_text(), "Hello");
    }

    #[test]
    fn render_content_creates_missing_content_element() {
        let target = DomTarget::new(Node::element("div").with_id("capture-area"));
        target.render_content("Hi");
        assert_eq!(target.rendered_text(), "Hi");
    }

    #[test]
    fn snapshot_is_detached() {
        let target = DomTarget::card("one");
        let snap = target.snapshot();
        target.render_content("two");
        assert_eq!(snap.card_text(), "one");
    }

    #[test]
    fn natural_height_follows_the_text() {
        let style = StyleSnapshot::default();
        let target = DomTarget::card("Hi");
        assert_eq!(target.natural_height(&style), 93);

        // 600 words wrap into 37 rows of 82 cells at 960px.
        target.render_content(&"word ".repeat(600));
        let tall = target.natural_height(&style);
        assert_eq!(tall, (64.0f32 + 37.0 * 28.8).ceil() as u32);

        target.set_natural_height(700);
        assert_eq!(target.natural_height(&style), 700);
    }

    #[tokio::test]
    async fn fonts_ready_is_counted() {
        let target = DomTarget::card("x");
        target.fonts_ready().await;
        assert_eq!(target.fonts_waited(), 1);
    }
}
