/// Width of the rendered progress bar.
pub const PROGRESS_BAR_CELLS: usize = 15;

const FILLED: char = '█';
const EMPTY: char = '░';

/// Render `completed / total` as a fixed-width bar plus percentage.
///
/// `completed` is clamped to `total`; a zero `total` renders an empty bar.
#[must_use]
pub fn render_progress(completed: u32, total: u32) -> String {
    let completed = completed.min(total);
    let ratio = if total == 0 {
        0.0
    } else {
        f64::from(completed) / f64::from(total)
    };

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let filled = ((ratio * PROGRESS_BAR_CELLS as f64).round() as usize).min(PROGRESS_BAR_CELLS);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let percent = (ratio * 100.0).round() as u32;

    let bar: String = std::iter::repeat_n(FILLED, filled)
        .chain(std::iter::repeat_n(EMPTY, PROGRESS_BAR_CELLS - filled))
        .collect();

    format!("⏳ Purchasing cards...\n[{bar}] {percent}%\n{completed}/{total} completed")
}
