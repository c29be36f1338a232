use rand::seq::SliceRandom;

pub const DEFAULT_BOARD_COLOR: &str = "#3B82F6";
pub const FALLBACK_COLUMN_COLOR: &str = "#6B7280";
pub const NOTIFICATION_COLOR: &str = "#FF6B6B";

/// Lanes every new board starts with, in order.
pub const DEFAULT_COLUMNS: [&str; 3] = ["To Do", "Doing", "Done"];

const COLUMN_COLORS: [&str; 3] = ["#3B82F6", "#F59E0B", "#10B981"];

pub const GUEST_COLORS: [&str; 8] = [
    "#FF6B6B", "#4ECDC4", "#45B7D1", "#FFA07A", "#98D8C8", "#F7DC6F", "#BB8FCE", "#85C1E2",
];

/// Default background for the column at `position`.
pub fn column_color(position: i64) -> &'static str {
    usize::try_from(position)
        .ok()
        .and_then(|p| COLUMN_COLORS.get(p))
        .copied()
        .unwrap_or(FALLBACK_COLUMN_COLOR)
}

pub fn random_user_color() -> &'static str {
    GUEST_COLORS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(NOTIFICATION_COLOR)
}
