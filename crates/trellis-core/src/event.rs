use serde::{Deserialize, Serialize};

use crate::Rect;
use crate::window::{WindowId, WindowState};

/// Longest window title, in bytes, an observer reports.
pub const MAX_TITLE_LEN: usize = 256;

/// What happened to a window, as captured by an observer.
///
/// Observers translate raw OS notifications into these variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HookEventKind {
    /// A new top-level window appeared.
    Created { rect: Rect, title: String },
    /// A window was destroyed or its process went away.
    Destroyed,
    /// A window finished being moved or resized.
    Moved { rect: Rect },
    /// A window received keyboard focus.
    FocusChanged,
    /// A window's title changed.
    TitleChanged { title: String },
    /// A window was minimized, maximized or restored.
    StateChanged { state: WindowState },
}

impl HookEventKind {
    /// Short label used in log lines.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Destroyed => "destroyed",
            Self::Moved { .. } => "moved",
            Self::FocusChanged => "focus",
            Self::TitleChanged { .. } => "title",
            Self::StateChanged { .. } => "state",
        }
    }

    /// Cuts any title down to [`MAX_TITLE_LEN`] bytes on a char boundary.
    pub fn bounded(mut self) -> Self {
        if let Self::Created { title, .. } | Self::TitleChanged { title } = &mut self {
            truncate_title(title);
        }
        self
    }
}

fn truncate_title(title: &mut String) {
    if title.len() <= MAX_TITLE_LEN {
        return;
    }
    let mut end = MAX_TITLE_LEN;
    while !title.is_char_boundary(end) {
        end -= 1;
    }
    title.truncate(end);
}

/// A window event stamped with its per-channel sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookEvent {
    pub window: WindowId,
    /// Strictly increasing per channel; a skipped value means an event
    /// was dropped somewhere between capture and the coordinator.
    pub seq: u64,
    pub kind: HookEventKind,
}

impl HookEvent {
    pub fn new(window: WindowId, seq: u64, kind: HookEventKind) -> Self {
        Self { window, seq, kind }
    }
}

/// An inclusive range of sequence numbers that never arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeqGap {
    pub first: u64,
    pub last: u64,
}

impl SeqGap {
    /// Number of events lost in this gap.
    pub fn len(&self) -> u64 {
        self.last - self.first + 1
    }

    pub fn is_empty(&self) -> bool {
        self.last < self.first
    }

    /// Returns the gap between the last applied sequence and `seq`, if any.
    pub fn between(last_applied: u64, seq: u64) -> Option<Self> {
        (seq > last_applied + 1).then(|| Self {
            first: last_applied + 1,
            last: seq - 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gap_between_detects_skipped_sequence() {
        assert_eq!(SeqGap::between(6, 8), Some(SeqGap { first: 7, last: 7 }));
        assert_eq!(SeqGap::between(6, 7), None);
        assert_eq!(SeqGap::between(0, 4).map(|g| g.len()), Some(3));
    }

    #[test]
    fn long_titles_are_cut_on_a_char_boundary() {
        // Arrange
        let ascii = HookEventKind::TitleChanged {
            title: "x".repeat(100_000),
        };
        let wide = HookEventKind::Created {
            rect: Rect::new(0, 0, 10, 10),
            title: "é".repeat(200),
        };

        // Act
        let ascii = ascii.bounded();
        let wide = wide.bounded();

        // Assert
        let HookEventKind::TitleChanged { title } = ascii else {
            panic!("kind changed");
        };
        assert_eq!(title.len(), MAX_TITLE_LEN);
        let HookEventKind::Created { title, .. } = wide else {
            panic!("kind changed");
        };
        assert_eq!(title, "é".repeat(MAX_TITLE_LEN / 2));
    }

    #[test]
    fn short_titles_are_untouched() {
        let kind = HookEventKind::TitleChanged {
            title: "notes.txt".into(),
        };

        assert_eq!(kind.clone().bounded(), kind);
    }

    #[test]
    fn event_kind_is_internally_tagged() {
        // Arrange
        let kind = HookEventKind::Moved {
            rect: Rect::new(1, 2, 3, 4),
        };

        // Act
        let json = serde_json::to_string(&kind).unwrap();

        // Assert
        assert!(json.contains("\"type\":\"moved\""));
        let back: HookEventKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, kind);
    }
}
