//! Plain-text rendering of query results
//!
//! Columns are aligned by terminal width, so names with wide characters
//! still line up.

use wdkp_common::model::{format_points, HistoryEntry, LootEntry, Standing};
use wdkp_common::time::format_epoch;

fn pad(text: &str, used: usize, width: usize) -> String {
    format!("{}{}", text, " ".repeat(width.saturating_sub(used)))
}

/// One line per standing: name, balance, class
pub fn standings(rows: &[&Standing], precision: u32) -> Vec<String> {
    let name_col = rows.iter().map(|s| s.name_width()).max().unwrap_or(0);
    let points_col = rows.iter().map(|s| s.points_width(precision)).max().unwrap_or(0);

    rows.iter()
        .map(|s| {
            let points = format_points(s.points, precision);
            format!(
                "{}  {}{}  {}",
                pad(&s.name, s.name_width(), name_col),
                " ".repeat(points_col.saturating_sub(s.points_width(precision))),
                points,
                s.class
            )
        })
        .collect()
}

/// Detail view for one player
pub fn player(
    standing: &Standing,
    latest_loot: Option<&LootEntry>,
    latest_gain: Option<&HistoryEntry>,
    precision: u32,
) -> Vec<String> {
    let mut lines = vec![
        format!(
            "{} ({}{})",
            standing.name,
            standing.class,
            standing
                .rank
                .as_deref()
                .map(|rank| format!(", {}", rank))
                .unwrap_or_default()
        ),
        format!("  balance:  {}", format_points(standing.points, precision)),
        format!(
            "  lifetime: +{} / -{}",
            format_points(standing.lifetime_gained, precision),
            format_points(standing.lifetime_spent, precision)
        ),
        format!("  active:   {}", if standing.active { "yes" } else { "no" }),
    ];
    if let Some(loot) = latest_loot {
        lines.push(format!(
            "  last item: {} for {} on {}",
            loot.item_name,
            format_points(loot.cost, precision),
            format_epoch(loot.timestamp)
        ));
    }
    if let Some(gain) = latest_gain {
        lines.push(format!(
            "  last gain: +{} ({}) on {}",
            format_points(gain.delta, precision),
            gain.reason,
            format_epoch(gain.timestamp)
        ));
    }
    lines
}

/// One line per award: date, item, cost, player
pub fn loot(entries: &[&LootEntry], precision: u32) -> Vec<String> {
    let item_col = entries.iter().map(|l| l.name_width()).max().unwrap_or(0);
    entries
        .iter()
        .map(|l| {
            format!(
                "{}  {}  {:>8}  {}",
                format_epoch(l.timestamp),
                pad(&l.item_name, l.name_width(), item_col),
                format_points(l.cost, precision),
                l.player
            )
        })
        .collect()
}

/// One line per history entry: date, signed delta, reason, officer
pub fn history(entries: &[HistoryEntry], precision: u32) -> Vec<String> {
    entries
        .iter()
        .map(|h| {
            let sign = if h.delta >= 0.0 { "+" } else { "" };
            format!(
                "{}  {:>9}  {} ({})",
                format_epoch(h.timestamp),
                format!("{}{}", sign, format_points(h.delta, precision)),
                h.reason,
                h.officer
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standings_aligned() {
        let thrall = Standing::new("Thrall", 120.5, 0.0, 0.0, "SHAMAN");
        let jaina = Standing::new("Jaina", 8.0, 0.0, 0.0, "MAGE");
        let lines = standings(&[&thrall, &jaina], 1);
        assert_eq!(lines[0], "Thrall  120.5  SHAMAN");
        assert_eq!(lines[1], "Jaina     8.0  MAGE");
    }

    #[test]
    fn test_wide_names_aligned_by_columns() {
        let wide = Standing::new("鈴木", 1.0, 0.0, 0.0, "MAGE");
        let narrow = Standing::new("Abc", 1.0, 0.0, 0.0, "MAGE");
        let lines = standings(&[&wide, &narrow], 0);
        // "鈴木" takes four columns
        assert_eq!(lines[0], "鈴木  1  MAGE");
        assert_eq!(lines[1], "Abc   1  MAGE");
    }

    #[test]
    fn test_history_signs() {
        let gain = HistoryEntry::new("thrall", 10.0, 0, "Boss Kill Bonus".to_string(), "Varian".to_string());
        let loss = HistoryEntry::new("thrall", -5.0, 0, "DKP Adjust".to_string(), "Garrosh".to_string());
        let lines = history(&[gain, loss], 0);
        assert_eq!(lines[0], "1970-01-01 00:00        +10  Boss Kill Bonus (Varian)");
        assert_eq!(lines[1], "1970-01-01 00:00         -5  DKP Adjust (Garrosh)");
    }

    #[test]
    fn test_player_detail() {
        let standing = Standing::new("Thrall", 75.0, 100.0, 25.0, "SHAMAN").with_rank(Some("Officer".to_string()));
        let lines = player(&standing, None, None, 0);
        assert_eq!(lines[0], "Thrall (SHAMAN, Officer)");
        assert_eq!(lines[1], "  balance:  75");
        assert_eq!(lines[2], "  lifetime: +100 / -25");
        assert_eq!(lines.len(), 4);
    }
}
