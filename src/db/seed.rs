use anyhow::Result;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::db::{clear_all_data, insert_player, insert_player_stat};
use crate::models::{NewPlayer, NewPlayerStat, SeasonRow};
use crate::services::feature_builder::{label_batches, SeasonBatch};
use crate::services::source::read_season_files;
use crate::utils::{clean_player_name, is_aggregate_team, per_game, split_player_name};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct SeedSummary {
    pub players: usize,
    pub stat_lines: usize,
    pub skipped: usize,
}

pub async fn seed_from_files(pool: &SqlitePool, paths: &[PathBuf], reset: bool) -> Result<SeedSummary> {
    let source = read_season_files(paths)?;
    let mut summary = seed_batches(pool, source.batches, reset).await?;
    summary.skipped += source.rejected.len();
    Ok(summary)
}

/// Load season tables into the players / player_stats tables.
///
/// Every row with a name and a team becomes a stat line for its season,
/// aggregate ("TOT") rows included, with season totals converted to per-game
/// values and the row's team kept on the line. Each player is created once,
/// with the first real team listed for them in the season that introduces them.
pub async fn seed_batches(pool: &SqlitePool, batches: Vec<SeasonBatch>, reset: bool) -> Result<SeedSummary> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM players")
        .fetch_one(pool)
        .await?;

    if count > 0 && !reset {
        tracing::info!("Database already seeded ({} players found), skipping. Use --reset to reload.", count);
        return Ok(SeedSummary::default());
    }
    if reset {
        clear_all_data(pool).await?;
    }

    let mut summary = SeedSummary::default();
    let mut players: HashMap<String, i64> = HashMap::new();

    for batch in batches {
        tracing::info!("Processing {} rows for season {}...", batch.rows.len(), batch.season);

        let rows = label_batches(vec![batch]);
        let home_teams = first_real_teams(&rows);

        for row in &rows {
            let name = row.player.as_deref().map(clean_player_name).unwrap_or_default();
            let team = row.team.as_deref().map(str::trim).unwrap_or_default();
            let season = row.season.as_deref().map(str::trim).unwrap_or_default();
            if name.is_empty() || team.is_empty() || season.is_empty() {
                summary.skipped += 1;
                continue;
            }

            let player_id = match players.get(&name) {
                Some(id) => *id,
                None => {
                    let Some(home_team) = home_teams.get(&name) else {
                        tracing::warn!("No real team listed for {} in {}, skipping", name, season);
                        summary.skipped += 1;
                        continue;
                    };
                    let (first_name, last_name) = split_player_name(&name);
                    let player = insert_player(
                        pool,
                        &NewPlayer {
                            first_name,
                            last_name,
                            team: home_team.clone(),
                        },
                    )
                    .await?;
                    tracing::info!("Created player: {}", name);
                    players.insert(name.clone(), player.id);
                    summary.players += 1;
                    player.id
                }
            };

            insert_player_stat(pool, player_id, &stat_line(season, team, row)).await?;
            summary.stat_lines += 1;
        }
    }

    tracing::info!(
        "Seeded {} players and {} stat lines ({} rows skipped)",
        summary.players,
        summary.stat_lines,
        summary.skipped
    );
    Ok(summary)
}

// cleaned player name -> first non-aggregate team in source order
fn first_real_teams(rows: &[SeasonRow]) -> HashMap<String, String> {
    let mut teams = HashMap::new();
    for row in rows {
        let (Some(player), Some(team)) = (row.player.as_deref(), row.team.as_deref().map(str::trim)) else {
            continue;
        };
        if team.is_empty() || is_aggregate_team(team) {
            continue;
        }
        teams
            .entry(clean_player_name(player))
            .or_insert_with(|| team.to_string());
    }
    teams
}

fn stat_line(season: &str, team: &str, row: &SeasonRow) -> NewPlayerStat {
    NewPlayerStat {
        season: season.to_string(),
        team: Some(team.to_string()),
        points_per_game: per_game(row.points, row.games),
        rebounds_per_game: per_game(row.rebounds, row.games),
        assists_per_game: per_game(row.assists, row.games),
        steals_per_game: per_game(row.steals, row.games),
        blocks_per_game: per_game(row.blocks, row.games),
        games_played: row.games.unwrap_or(0.0) as i64,
        games_started: row.games_started.unwrap_or(0.0) as i64,
        field_goal_percentage: row.field_goal_pct.unwrap_or(0.0),
        three_point_percentage: row.three_point_pct.unwrap_or(0.0),
        player_efficiency_rating: row.efficiency.unwrap_or(0.0),
        win_shares: row.win_shares.unwrap_or(0.0),
    }
}
