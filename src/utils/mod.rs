/// Team code used by season tables for a traded player's combined line
pub const AGGREGATE_TEAM: &str = "TOT";

/// Strip award markers (`*`) and stray whitespace from a player name
pub fn clean_player_name(raw: &str) -> String {
    raw.replace('*', "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split a full name into (first, last). Everything after the first token is the last name.
pub fn split_player_name(full_name: &str) -> (String, String) {
    let mut parts = full_name.split_whitespace();
    let first = parts.next().unwrap_or_default().to_string();
    let last = parts.collect::<Vec<_>>().join(" ");
    (first, last)
}

/// Canonical player-season identifier, e.g. "Caitlin Clark (2024)"
pub fn canonical_id(first_name: &str, last_name: &str, season: &str) -> String {
    let name = [first_name.trim(), last_name.trim()]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ");
    format!("{} ({})", name, season.trim())
}

/// True for multi-team aggregate rows ("TOT", and the newer "2TM"/"3TM" style)
pub fn is_aggregate_team(team: &str) -> bool {
    let team = team.trim();
    if team.eq_ignore_ascii_case(AGGREGATE_TEAM) {
        return true;
    }
    team.len() == 3
        && team.as_bytes()[0].is_ascii_digit()
        && team[1..].eq_ignore_ascii_case("TM")
}

/// Round to one decimal place
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Convert a season total into a per-game value. Missing or zero games count as one game.
pub fn per_game(total: Option<f64>, games: Option<f64>) -> f64 {
    let games = match games {
        Some(g) if g > 0.0 => g,
        _ => 1.0,
    };
    round1(total.unwrap_or(0.0) / games)
}

/// Validate a player name part
pub fn validate_name(name: &str) -> bool {
    !name.trim().is_empty() && name.len() <= 100
}

/// Validate a season label ("2024", "2023-24")
pub fn validate_season(season: &str) -> bool {
    let season = season.trim();
    !season.is_empty()
        && season.len() <= 16
        && season.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}
