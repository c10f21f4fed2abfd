//! Rectangle placement for a project workspace: the editor takes one side of
//! the visible frame, the browser the rest.

use crate::common::config::{EditorSide, LayoutSettings};
use crate::sys::geometry::Rect;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectLayout {
    pub editor: Rect,
    pub browser: Rect,
}

/// `None` when the visible frame is degenerate or leaves no room after gaps.
pub fn compute_layout(visible: Rect, settings: &LayoutSettings) -> Option<ProjectLayout> {
    if visible.is_empty() {
        return None;
    }
    let area = visible.inset(settings.gap);
    let usable_width = area.width - settings.gap;
    if area.is_empty() || usable_width <= 0.0 {
        return None;
    }

    let ratio = settings.editor_ratio.clamp(0.0, 1.0);
    let editor_width = (usable_width * ratio).round();
    let browser_width = usable_width - editor_width;
    if editor_width <= 0.0 || browser_width <= 0.0 {
        return None;
    }

    let left_width = match settings.editor_side {
        EditorSide::Left => editor_width,
        EditorSide::Right => browser_width,
    };
    let left = Rect::new(area.x, area.y, left_width, area.height);
    let right = Rect::new(
        left.max_x() + settings.gap,
        area.y,
        area.width - left_width - settings.gap,
        area.height,
    );

    Some(match settings.editor_side {
        EditorSide::Left => ProjectLayout { editor: left, browser: right },
        EditorSide::Right => ProjectLayout { editor: right, browser: left },
    })
}
