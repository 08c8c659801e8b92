use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};
use crate::{Rect, WindowId};

/// A layout algorithm that computes window positions within a work area.
///
/// Implementations must be deterministic: the same window sequence and
/// work area always produce the same assignment.
pub trait Layout {
    /// Computes positions for all windows in the given work area.
    ///
    /// Returns a list of (window, rect) pairs in the same order as the
    /// input windows.
    fn apply(&self, windows: &[WindowId], work_area: &Rect) -> Vec<(WindowId, Rect)>;

    /// Short name shown in status output.
    fn name(&self) -> &'static str;
}

/// Layout strategy selected per workspace in the configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LayoutKind {
    /// Binary space partitioning, see [`BspLayout`].
    Bsp { gap: i32, ratio: f64 },
    /// Equal-width side-by-side columns, see [`ColumnsLayout`].
    Columns { gap: i32 },
}

impl Default for LayoutKind {
    fn default() -> Self {
        let bsp = BspLayout::default();
        Self::Bsp {
            gap: bsp.gap,
            ratio: bsp.ratio,
        }
    }
}

impl LayoutKind {
    /// Builds the strategy described by this descriptor.
    pub fn strategy(&self) -> Box<dyn Layout + Send + Sync> {
        match *self {
            Self::Bsp { gap, ratio } => Box::new(BspLayout { gap, ratio }),
            Self::Columns { gap } => Box::new(ColumnsLayout { gap }),
        }
    }

    /// Clamps parameters to safe ranges.
    pub fn validate(&mut self) {
        match self {
            Self::Bsp { gap, ratio } => {
                *gap = (*gap).clamp(0, 200);
                *ratio = ratio.clamp(0.1, 0.9);
            }
            Self::Columns { gap } => *gap = (*gap).clamp(0, 200),
        }
    }
}

/// Smallest extent a BSP split leaves on either side of the cut.
pub const MIN_SPAN: i32 = 32;

/// Binary Space Partitioning layout.
///
/// Recursively splits the available space in half, alternating between
/// horizontal and vertical splits. The first window gets the larger
/// partition.
///
/// Cells are never split below [`MIN_SPAN`]; once neither axis has room,
/// the remaining windows share the last cell as a gapless grid.
///
/// For example, with 3 windows on a 1920x1080 screen:
/// ```text
/// +-----------+-----------+
/// |           |     2     |
/// |     1     +-----------+
/// |           |     3     |
/// +-----------+-----------+
/// ```
#[derive(Debug, Clone)]
pub struct BspLayout {
    /// Gap in pixels between windows.
    pub gap: i32,
    /// Ratio of space given to the first window in each split (0.0–1.0).
    pub ratio: f64,
}

impl Default for BspLayout {
    fn default() -> Self {
        Self { gap: 8, ratio: 0.5 }
    }
}

impl Layout for BspLayout {
    fn apply(&self, windows: &[WindowId], work_area: &Rect) -> Vec<(WindowId, Rect)> {
        if windows.is_empty() {
            return Vec::new();
        }

        let mut results = Vec::with_capacity(windows.len());
        self.split(windows, &inset(work_area, self.gap), true, &mut results);
        results
    }

    fn name(&self) -> &'static str {
        "bsp"
    }
}

impl BspLayout {
    fn split(
        &self,
        windows: &[WindowId],
        area: &Rect,
        horizontal: bool,
        results: &mut Vec<(WindowId, Rect)>,
    ) {
        if windows.len() == 1 {
            results.push((windows[0], *area));
            return;
        }

        let half = self.gap / 2;
        let extent = |horizontal: bool| if horizontal { area.width } else { area.height };
        let fits = |horizontal: bool| extent(horizontal) - half * 2 >= MIN_SPAN * 2;
        let Some(horizontal) = [horizontal, !horizontal].into_iter().find(|&h| fits(h)) else {
            pack(windows, area, results);
            return;
        };

        let size = extent(horizontal);
        let split =
            ((size as f64 * self.ratio) as i32).clamp(half + MIN_SPAN, size - half - MIN_SPAN);
        let (first_area, rest_area) = if horizontal {
            let first = Rect::new(area.x, area.y, split - half, area.height);
            let rest = Rect::new(
                area.x + split + half,
                area.y,
                area.width - split - half,
                area.height,
            );
            (first, rest)
        } else {
            let first = Rect::new(area.x, area.y, area.width, split - half);
            let rest = Rect::new(
                area.x,
                area.y + split + half,
                area.width,
                area.height - split - half,
            );
            (first, rest)
        };

        results.push((windows[0], first_area));
        self.split(&windows[1..], &rest_area, !horizontal, results);
    }
}

/// Side-by-side columns of equal width.
///
/// The last column absorbs the rounding remainder so the columns always
/// span the full padded width.
#[derive(Debug, Clone, Default)]
pub struct ColumnsLayout {
    /// Gap in pixels between columns and around the edges.
    pub gap: i32,
}

impl Layout for ColumnsLayout {
    fn apply(&self, windows: &[WindowId], work_area: &Rect) -> Vec<(WindowId, Rect)> {
        if windows.is_empty() {
            return Vec::new();
        }

        let area = inset(work_area, self.gap);
        let n = windows.len() as i32;
        let column = (area.width - self.gap * (n - 1)) / n;
        if column < 1 {
            let mut results = Vec::with_capacity(windows.len());
            pack(windows, &area, &mut results);
            return results;
        }

        windows
            .iter()
            .enumerate()
            .map(|(i, &id)| {
                let i = i as i32;
                let x = area.x + i * (column + self.gap);
                let w = if i == n - 1 {
                    area.x + area.width - x
                } else {
                    column
                };
                (id, Rect::new(x, area.y, w, area.height))
            })
            .collect()
    }

    fn name(&self) -> &'static str {
        "columns"
    }
}

/// Shrinks `area` by `gap` on every side, or returns it unchanged when
/// the padding would leave nothing.
fn inset(area: &Rect, gap: i32) -> Rect {
    if gap > 0 && area.width > gap * 2 && area.height > gap * 2 {
        Rect::new(
            area.x + gap,
            area.y + gap,
            area.width - gap * 2,
            area.height - gap * 2,
        )
    } else {
        *area
    }
}

/// Packs windows into a gapless grid over `area`, row by row. The last
/// cell of each row and the last row absorb rounding remainders.
///
/// Every cell is at least 1x1 while `area` has a pixel per window.
fn pack(windows: &[WindowId], area: &Rect, results: &mut Vec<(WindowId, Rect)>) {
    let n = windows.len() as i32;
    let width = area.width.max(1);
    let height = area.height.max(1);
    let mut cols = ((n as f64).sqrt().ceil() as i32).clamp(1, width);
    if (n + cols - 1) / cols > height {
        cols = n.min(width);
    }
    let rows = (n + cols - 1) / cols;
    let row_height = (height / rows).max(1);

    for (r, row) in windows.chunks(cols as usize).enumerate() {
        let r = r as i32;
        let y = area.y + r * row_height;
        let h = if r == rows - 1 {
            area.y + height - y
        } else {
            row_height
        };
        let count = row.len() as i32;
        let cell = (width / count).max(1);
        for (c, &id) in row.iter().enumerate() {
            let c = c as i32;
            let x = area.x + c * cell;
            let w = if c == count - 1 {
                area.x + width - x
            } else {
                cell
            };
            results.push((id, Rect::new(x, y, w, h)));
        }
    }
}

/// Checks that an assignment is usable before any of it is applied.
///
/// Every tiled window must receive exactly one non-empty rectangle, in
/// input order, inside the work area, with no two rectangles overlapping.
pub fn validate_assignment(
    windows: &[WindowId],
    work_area: &Rect,
    assignment: &[(WindowId, Rect)],
) -> Result<()> {
    let violation = |reason: String| Err(RelayError::LayoutInvariantViolation { reason });

    if assignment.len() != windows.len() {
        return violation(format!(
            "{} rectangles for {} windows",
            assignment.len(),
            windows.len()
        ));
    }
    for (expected, (id, rect)) in windows.iter().zip(assignment) {
        if expected != id {
            return violation(format!("assignment order changed at {id}"));
        }
        if rect.is_empty() {
            return violation(format!("{id} assigned an empty rectangle"));
        }
        if !work_area.contains(rect) {
            return violation(format!("{id} assigned {rect:?} outside {work_area:?}"));
        }
    }
    for (i, (a, ra)) in assignment.iter().enumerate() {
        for (b, rb) in &assignment[i + 1..] {
            if ra.intersects(rb) {
                return violation(format!("{a} overlaps {b}"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: u64) -> Vec<WindowId> {
        (1..=n).map(|h| WindowId::new(1, h)).collect()
    }

    #[test]
    fn single_window_fills_work_area() {
        // Arrange
        let layout = BspLayout { gap: 0, ratio: 0.5 };
        let area = Rect::new(0, 0, 1920, 1080);
        let windows = ids(1);

        // Act
        let result = layout.apply(&windows, &area);

        // Assert
        assert_eq!(result, vec![(windows[0], Rect::new(0, 0, 1920, 1080))]);
    }

    #[test]
    fn two_windows_cover_workspace_exactly() {
        // Arrange
        let layout = BspLayout { gap: 0, ratio: 0.5 };
        let area = Rect::new(0, 0, 1920, 1080);
        let windows = ids(2);

        // Act
        let result = layout.apply(&windows, &area);

        // Assert
        assert_eq!(result[0].1, Rect::new(0, 0, 960, 1080));
        assert_eq!(result[1].1, Rect::new(960, 0, 960, 1080));
        assert!(!result[0].1.intersects(&result[1].1));
        let covered: i64 = result.iter().map(|(_, r)| r.area()).sum();
        assert_eq!(covered, area.area());
        assert!(validate_assignment(&windows, &area, &result).is_ok());
    }

    #[test]
    fn three_windows_bsp_split() {
        // Arrange
        let layout = BspLayout { gap: 0, ratio: 0.5 };
        let area = Rect::new(0, 0, 1920, 1080);

        // Act
        let result = layout.apply(&ids(3), &area);

        // Assert: first split horizontal, second vertical
        assert_eq!(result.len(), 3);
        assert_eq!(result[0].1, Rect::new(0, 0, 960, 1080));
        assert_eq!(result[1].1, Rect::new(960, 0, 960, 540));
        assert_eq!(result[2].1, Rect::new(960, 540, 960, 540));
    }

    #[test]
    fn layout_is_idempotent() {
        // Arrange
        let area = Rect::new(100, 50, 2560, 1440);
        let windows = ids(5);

        for kind in [
            LayoutKind::Bsp { gap: 8, ratio: 0.6 },
            LayoutKind::Columns { gap: 4 },
        ] {
            // Act
            let first = kind.strategy().apply(&windows, &area);
            let second = kind.strategy().apply(&windows, &area);

            // Assert
            assert_eq!(first, second);
            assert!(validate_assignment(&windows, &area, &first).is_ok());
        }
    }

    #[test]
    fn columns_span_full_width() {
        // Arrange
        let layout = ColumnsLayout { gap: 0 };
        let area = Rect::new(0, 0, 1000, 500);

        // Act
        let result = layout.apply(&ids(3), &area);

        // Assert: 333 + 333 + 334
        assert_eq!(result[0].1, Rect::new(0, 0, 333, 500));
        assert_eq!(result[1].1, Rect::new(333, 0, 333, 500));
        assert_eq!(result[2].1, Rect::new(666, 0, 334, 500));
    }

    #[test]
    fn empty_windows_returns_empty() {
        let layout = BspLayout::default();

        assert!(layout.apply(&[], &Rect::new(0, 0, 1920, 1080)).is_empty());
    }

    #[test]
    fn large_gap_never_produces_negative_dimensions() {
        // Arrange: gap is larger than the work area
        let layout = BspLayout {
            gap: 500,
            ratio: 0.5,
        };
        let area = Rect::new(0, 0, 200, 200);

        // Act
        let result = layout.apply(&ids(2), &area);

        // Assert: all dimensions must be positive
        for (_id, rect) in &result {
            assert!(rect.width > 0, "width was {}", rect.width);
            assert!(rect.height > 0, "height was {}", rect.height);
        }
    }

    fn strategies() -> [LayoutKind; 3] {
        [
            LayoutKind::default(),
            LayoutKind::Bsp { gap: 8, ratio: 0.9 },
            LayoutKind::Columns { gap: 8 },
        ]
    }

    #[test]
    fn any_window_count_yields_a_valid_assignment() {
        let area = Rect::new(0, 0, 1920, 1080);

        for kind in strategies() {
            for n in 1..=64 {
                let windows = ids(n);

                let result = kind.strategy().apply(&windows, &area);

                assert!(
                    validate_assignment(&windows, &area, &result).is_ok(),
                    "{kind:?} with {n} windows: {:?}",
                    validate_assignment(&windows, &area, &result)
                );
            }
        }
    }

    #[test]
    fn small_work_area_still_yields_a_valid_assignment() {
        for area in [Rect::new(10, 20, 160, 120), Rect::new(0, 0, 40, 30)] {
            for kind in strategies() {
                for n in 1..=64 {
                    let windows = ids(n);

                    let result = kind.strategy().apply(&windows, &area);

                    assert!(
                        validate_assignment(&windows, &area, &result).is_ok(),
                        "{kind:?} with {n} windows in {area:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn outer_padding_is_skipped_when_it_does_not_fit() {
        // Arrange
        let layout = ColumnsLayout { gap: 50 };
        let area = Rect::new(0, 0, 60, 60);

        // Act
        let result = layout.apply(&ids(2), &area);

        // Assert
        assert_eq!(result[0].1, Rect::new(0, 0, 5, 60));
        assert_eq!(result[1].1, Rect::new(55, 0, 5, 60));
    }

    #[test]
    fn validation_rejects_overlap_and_out_of_bounds() {
        // Arrange
        let windows = ids(2);
        let area = Rect::new(0, 0, 100, 100);
        let overlapping = vec![
            (windows[0], Rect::new(0, 0, 60, 100)),
            (windows[1], Rect::new(50, 0, 50, 100)),
        ];
        let outside = vec![
            (windows[0], Rect::new(0, 0, 50, 100)),
            (windows[1], Rect::new(50, 0, 80, 100)),
        ];

        // Act / Assert
        assert!(matches!(
            validate_assignment(&windows, &area, &overlapping),
            Err(RelayError::LayoutInvariantViolation { .. })
        ));
        assert!(matches!(
            validate_assignment(&windows, &area, &outside),
            Err(RelayError::LayoutInvariantViolation { .. })
        ));
        assert!(validate_assignment(&windows, &area, &overlapping[..1]).is_err());
    }

    #[test]
    fn layout_kind_roundtrips_through_toml() {
        // Arrange
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            layout: LayoutKind,
        }
        let toml_str = "[layout]\nkind = \"columns\"\ngap = 12\n";

        // Act
        let parsed: Wrapper = toml::from_str(toml_str).unwrap();

        // Assert
        assert_eq!(parsed.layout, LayoutKind::Columns { gap: 12 });
    }
}
