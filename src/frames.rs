//! Per-display layout frame snapshot.

use crate::geometry::{Insets, Rect, Rotation, Size};

/// Rotation-aware frame set for one display.
///
/// Pure value type; the decor policy recomputes the derived frames on every
/// layout pass, rotation change, or cutout change.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DisplayFrames {
    pub rotation: Rotation,

    /// Full logical display frame at the current rotation.
    pub display: Rect,

    /// Display frame minus the cutout reservation.
    pub cutout_safe: Rect,

    /// Area available to the current layout pass; decor carves it down.
    pub current: Rect,

    /// Area left for app content after visible decor.
    pub content: Rect,

    /// Area guaranteed stable across transient decor changes.
    pub stable: Rect,

    /// Area available to docked (split) tasks.
    pub dock: Rect,

    /// Area system windows may occupy.
    pub system: Rect,

    /// Cutout insets in the rotated coordinate space.
    pub cutout: Insets,
}

impl DisplayFrames {
    /// Build the frame set for a display snapshot.
    ///
    /// `size` is the natural (rotation 0) logical size; `cutout` the natural
    /// per-edge cutout reservation.
    pub fn new(size: Size, rotation: Rotation, cutout: Insets) -> Self {
        let rotated_size = if rotation.is_sideways() { size.transposed() } else { size };
        let display = Rect::from_size(rotated_size);
        let cutout = cutout.rotated(rotation);
        let cutout_safe = display.inset(cutout);

        Self {
            rotation,
            display,
            cutout_safe,
            current: display,
            content: display,
            stable: display,
            dock: display,
            system: display,
            cutout,
        }
    }

    /// Reset the derived frames before a layout pass.
    pub fn reset_for_layout(&mut self) {
        self.current = self.display;
        self.content = self.display;
        self.stable = self.display;
        self.dock = self.display;
        self.system = self.display;
    }

    /// Insets of the content frame relative to the full display.
    pub fn content_insets(&self) -> Insets {
        self.display.insets_of(self.content)
    }

    /// Insets of the stable frame relative to the full display.
    pub fn stable_insets(&self) -> Insets {
        self.display.insets_of(self.stable)
    }

    /// Logical display size at the current rotation.
    pub fn size(&self) -> Size {
        self.display.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sideways_rotation_swaps_dimensions() {
        let frames = DisplayFrames::new(Size::new(400, 800), Rotation::Rotation90, Insets::default());
        assert_eq!(frames.size(), Size::new(800, 400));

        let frames = DisplayFrames::new(Size::new(400, 800), Rotation::Rotation180, Insets::default());
        assert_eq!(frames.size(), Size::new(400, 800));
    }

    #[test]
    fn cutout_rotates_with_content() {
        let cutout = Insets::new(0, 30, 0, 0);
        let frames = DisplayFrames::new(Size::new(400, 800), Rotation::Rotation90, cutout);

        // The natural top notch sits on the left edge after a 90° rotation.
        assert_eq!(frames.cutout, Insets::new(30, 0, 0, 0));
        assert_eq!(frames.cutout_safe, Rect::new((30, 0), (770, 400)));
    }

    #[test]
    fn reset_restores_full_frames() {
        let mut frames = DisplayFrames::new(Size::new(400, 800), Rotation::Rotation0, Insets::default());
        frames.content = Rect::new((0, 24), (400, 776));
        frames.stable = frames.content;

        frames.reset_for_layout();
        assert_eq!(frames.content, frames.display);
        assert_eq!(frames.stable, frames.display);
    }
}
