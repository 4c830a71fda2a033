use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Player {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub team: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PlayerStat {
    pub id: i64,
    pub player_id: i64,
    pub season: String,
    /// Team this line was recorded for; `None` means the player's own team
    pub team: Option<String>,
    pub points_per_game: f64,
    pub rebounds_per_game: f64,
    pub assists_per_game: f64,
    pub steals_per_game: f64,
    pub blocks_per_game: f64,
    pub games_played: i64,
    pub games_started: i64,
    pub field_goal_percentage: f64,
    pub three_point_percentage: f64,
    pub player_efficiency_rating: f64,
    pub win_shares: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerWithStats {
    #[serde(flatten)]
    pub player: Player,
    pub stats: Vec<PlayerStat>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPlayer {
    pub first_name: String,
    pub last_name: String,
    pub team: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewPlayerStat {
    pub season: String,
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default)]
    pub points_per_game: f64,
    #[serde(default)]
    pub rebounds_per_game: f64,
    #[serde(default)]
    pub assists_per_game: f64,
    #[serde(default)]
    pub steals_per_game: f64,
    #[serde(default)]
    pub blocks_per_game: f64,
    #[serde(default)]
    pub games_played: i64,
    #[serde(default)]
    pub games_started: i64,
    #[serde(default)]
    pub field_goal_percentage: f64,
    #[serde(default)]
    pub three_point_percentage: f64,
    #[serde(default)]
    pub player_efficiency_rating: f64,
    #[serde(default)]
    pub win_shares: f64,
}

/// One row of a season statistics table, as scraped ("Player", "Team", "PTS", ...).
///
/// Every numeric column is optional: absent keys, `null` and empty strings all
/// read as `None`. `season` is only present when the source already carries it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeasonRow {
    #[serde(rename = "Player", default)]
    pub player: Option<String>,
    #[serde(rename = "Team", default)]
    pub team: Option<String>,
    #[serde(default)]
    pub season: Option<String>,
    #[serde(rename = "G", default, deserialize_with = "lenient_f64")]
    pub games: Option<f64>,
    #[serde(rename = "GS", default, deserialize_with = "lenient_f64")]
    pub games_started: Option<f64>,
    #[serde(rename = "PTS", default, deserialize_with = "lenient_f64")]
    pub points: Option<f64>,
    #[serde(rename = "TRB", default, deserialize_with = "lenient_f64")]
    pub rebounds: Option<f64>,
    #[serde(rename = "AST", default, deserialize_with = "lenient_f64")]
    pub assists: Option<f64>,
    #[serde(rename = "STL", default, deserialize_with = "lenient_f64")]
    pub steals: Option<f64>,
    #[serde(rename = "BLK", default, deserialize_with = "lenient_f64")]
    pub blocks: Option<f64>,
    #[serde(rename = "FG%", default, deserialize_with = "lenient_f64")]
    pub field_goal_pct: Option<f64>,
    #[serde(rename = "3P%", default, deserialize_with = "lenient_f64")]
    pub three_point_pct: Option<f64>,
    #[serde(rename = "PER", default, deserialize_with = "lenient_f64")]
    pub efficiency: Option<f64>,
    #[serde(rename = "WS", default, deserialize_with = "lenient_f64")]
    pub win_shares: Option<f64>,
}

// Scraped tables mix numbers, numeric strings and "" for blanks
fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Cell {
        Number(f64),
        Text(String),
    }

    Ok(match Option::<Cell>::deserialize(deserializer)? {
        Some(Cell::Number(n)) if n.is_finite() => Some(n),
        Some(Cell::Text(s)) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarPlayer {
    pub player_season_id: String,
    pub similarity_score: f64,
}

/// Describes the currently published similarity model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSummary {
    pub build_id: String,
    pub built_at: DateTime<Utc>,
    pub rows: usize,
    pub features: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub model: Option<ModelSummary>,
}

// API Response types
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: Utc::now(),
        }
    }
}
