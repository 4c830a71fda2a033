pub mod seed;
pub use seed::seed_from_files;

pub async fn clear_all_data(pool: &SqlitePool) -> Result<()> {
    sqlx::query("DELETE FROM player_stats").execute(pool).await?;
    sqlx::query("DELETE FROM players").execute(pool).await?;
    tracing::info!("All data cleared");
    Ok(())
}

use anyhow::Result;
use sqlx::{sqlite::SqliteConnectOptions, Row, SqlitePool};
use std::str::FromStr;

use crate::models::*;

pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
    // Strip the "sqlite:" prefix to get the file path, create parent dir if needed
    let file_path = database_url
        .strip_prefix("sqlite:///")
        .or_else(|| database_url.strip_prefix("sqlite://"))
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url);

    if !file_path.starts_with(":memory:") {
        if let Some(parent) = std::path::Path::new(file_path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
        }
    }

    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePool::connect_with(options).await?;
    Ok(pool)
}

/// Called from the CLI where no pool exists yet.
pub async fn init_database(database_url: &str) -> Result<()> {
    let pool = create_pool(database_url).await?;
    init_database_with_pool(&pool).await
}

/// Called from the server so schema creation shares the main pool.
pub async fn init_database_with_pool(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS players (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            team TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS player_stats (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            player_id INTEGER NOT NULL,
            season TEXT NOT NULL,
            team TEXT,
            points_per_game REAL NOT NULL DEFAULT 0,
            rebounds_per_game REAL NOT NULL DEFAULT 0,
            assists_per_game REAL NOT NULL DEFAULT 0,
            steals_per_game REAL NOT NULL DEFAULT 0,
            blocks_per_game REAL NOT NULL DEFAULT 0,
            games_played INTEGER NOT NULL DEFAULT 0,
            games_started INTEGER NOT NULL DEFAULT 0,
            field_goal_percentage REAL NOT NULL DEFAULT 0,
            three_point_percentage REAL NOT NULL DEFAULT 0,
            player_efficiency_rating REAL NOT NULL DEFAULT 0,
            win_shares REAL NOT NULL DEFAULT 0,
            FOREIGN KEY (player_id) REFERENCES players (id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_players_name ON players(last_name, first_name)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_player_stats_player ON player_stats(player_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_player_stats_season ON player_stats(season)")
        .execute(pool)
        .await?;

    tracing::info!("Database initialized successfully");
    Ok(())
}

// Player operations
pub async fn insert_player(pool: &SqlitePool, player: &NewPlayer) -> Result<Player> {
    let id = sqlx::query("INSERT INTO players (first_name, last_name, team) VALUES (?, ?, ?)")
        .bind(player.first_name.trim())
        .bind(player.last_name.trim())
        .bind(player.team.trim())
        .execute(pool)
        .await?
        .last_insert_rowid();

    Ok(Player {
        id,
        first_name: player.first_name.trim().to_string(),
        last_name: player.last_name.trim().to_string(),
        team: player.team.trim().to_string(),
    })
}

pub async fn get_player_by_id(pool: &SqlitePool, player_id: i64) -> Result<Option<Player>> {
    let player = sqlx::query_as::<_, Player>("SELECT id, first_name, last_name, team FROM players WHERE id = ?")
        .bind(player_id)
        .fetch_optional(pool)
        .await?;
    Ok(player)
}

pub async fn list_players(pool: &SqlitePool, skip: i64, limit: i64) -> Result<Vec<Player>> {
    let players = sqlx::query_as::<_, Player>(
        "SELECT id, first_name, last_name, team FROM players ORDER BY last_name, first_name, id LIMIT ? OFFSET ?",
    )
    .bind(limit)
    .bind(skip)
    .fetch_all(pool)
    .await?;
    Ok(players)
}

pub async fn update_player(pool: &SqlitePool, player_id: i64, player: &NewPlayer) -> Result<Option<Player>> {
    let updated = sqlx::query("UPDATE players SET first_name = ?, last_name = ?, team = ? WHERE id = ?")
        .bind(player.first_name.trim())
        .bind(player.last_name.trim())
        .bind(player.team.trim())
        .bind(player_id)
        .execute(pool)
        .await?
        .rows_affected();

    if updated == 0 {
        return Ok(None);
    }
    get_player_by_id(pool, player_id).await
}

/// Delete a player and every stat line that belongs to them. Returns false if no such player.
pub async fn delete_player(pool: &SqlitePool, player_id: i64) -> Result<bool> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM player_stats WHERE player_id = ?")
        .bind(player_id)
        .execute(&mut *tx)
        .await?;
    let deleted = sqlx::query("DELETE FROM players WHERE id = ?")
        .bind(player_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    tx.commit().await?;
    Ok(deleted > 0)
}

// Stat operations
pub async fn insert_player_stat(pool: &SqlitePool, player_id: i64, stat: &NewPlayerStat) -> Result<PlayerStat> {
    let team = stat
        .team
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    let id = sqlx::query(
        r#"
        INSERT INTO player_stats
        (player_id, season, team, points_per_game, rebounds_per_game, assists_per_game,
         steals_per_game, blocks_per_game, games_played, games_started,
         field_goal_percentage, three_point_percentage, player_efficiency_rating, win_shares)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(player_id)
    .bind(stat.season.trim())
    .bind(team.as_deref())
    .bind(stat.points_per_game)
    .bind(stat.rebounds_per_game)
    .bind(stat.assists_per_game)
    .bind(stat.steals_per_game)
    .bind(stat.blocks_per_game)
    .bind(stat.games_played)
    .bind(stat.games_started)
    .bind(stat.field_goal_percentage)
    .bind(stat.three_point_percentage)
    .bind(stat.player_efficiency_rating)
    .bind(stat.win_shares)
    .execute(pool)
    .await?
    .last_insert_rowid();

    Ok(PlayerStat {
        id,
        player_id,
        season: stat.season.trim().to_string(),
        team,
        points_per_game: stat.points_per_game,
        rebounds_per_game: stat.rebounds_per_game,
        assists_per_game: stat.assists_per_game,
        steals_per_game: stat.steals_per_game,
        blocks_per_game: stat.blocks_per_game,
        games_played: stat.games_played,
        games_started: stat.games_started,
        field_goal_percentage: stat.field_goal_percentage,
        three_point_percentage: stat.three_point_percentage,
        player_efficiency_rating: stat.player_efficiency_rating,
        win_shares: stat.win_shares,
    })
}

pub async fn get_player_stats(pool: &SqlitePool, player_id: i64) -> Result<Vec<PlayerStat>> {
    let stats = sqlx::query_as::<_, PlayerStat>(
        "SELECT * FROM player_stats WHERE player_id = ? ORDER BY season DESC, id",
    )
    .bind(player_id)
    .fetch_all(pool)
    .await?;
    Ok(stats)
}

pub async fn get_player_with_stats(pool: &SqlitePool, player_id: i64) -> Result<Option<PlayerWithStats>> {
    let Some(player) = get_player_by_id(pool, player_id).await? else {
        return Ok(None);
    };
    let stats = get_player_stats(pool, player_id).await?;
    Ok(Some(PlayerWithStats { player, stats }))
}

/// Every stored stat line as a season table row, for building the similarity model.
///
/// Lines come back in insertion order with the team they were recorded for
/// (falling back to the player's team), so traded players resolve the same way
/// they do from season files. Counting stats are stored per game, so a model
/// rebuilt from the database scales PTS, TRB, AST, STL and BLK per game while a
/// build from season files uses the files' season totals.
pub async fn get_season_rows(pool: &SqlitePool) -> Result<Vec<SeasonRow>> {
    let rows = sqlx::query(
        r#"
        SELECT p.first_name, p.last_name, COALESCE(s.team, p.team) AS line_team, s.*
        FROM player_stats s
        JOIN players p ON p.id = s.player_id
        ORDER BY s.id
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut season_rows = Vec::with_capacity(rows.len());
    for row in rows {
        let first: String = row.get("first_name");
        let last: String = row.get("last_name");
        season_rows.push(SeasonRow {
            player: Some(format!("{} {}", first, last).trim().to_string()),
            team: Some(row.get("line_team")),
            season: Some(row.get("season")),
            games: Some(row.get::<i64, _>("games_played") as f64),
            games_started: Some(row.get::<i64, _>("games_started") as f64),
            points: Some(row.get("points_per_game")),
            rebounds: Some(row.get("rebounds_per_game")),
            assists: Some(row.get("assists_per_game")),
            steals: Some(row.get("steals_per_game")),
            blocks: Some(row.get("blocks_per_game")),
            field_goal_pct: Some(row.get("field_goal_percentage")),
            three_point_pct: Some(row.get("three_point_percentage")),
            efficiency: Some(row.get("player_efficiency_rating")),
            win_shares: Some(row.get("win_shares")),
        });
    }
    Ok(season_rows)
}

#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    init_database_with_pool(&pool).await.unwrap();
    pool
}
