use anyhow::Result;
use std::path::PathBuf;

use crate::config::{Config, MAX_SIMILAR_K};
use crate::db::{create_pool, get_season_rows, init_database_with_pool, list_players, seed_from_files};
use crate::services::{build_and_save, label_batches, read_season_files, ModelError, ModelStore};
use crate::utils::canonical_id;

pub async fn seed(config: &Config, files: &[PathBuf], reset: bool) -> Result<()> {
    let pool = create_pool(&config.database_url).await?;
    init_database_with_pool(&pool).await?;

    println!("📥 Seeding database from {} file(s)...", files.len());
    let summary = seed_from_files(&pool, files, reset).await?;

    if summary.players == 0 && summary.stat_lines == 0 {
        println!("📭 Nothing loaded. The database may already be seeded; pass --reset to reload.");
        return Ok(());
    }

    println!(
        "✅ Loaded {} players and {} season stat lines ({} rows skipped)",
        summary.players, summary.stat_lines, summary.skipped
    );
    Ok(())
}

pub async fn build_model(config: &Config, files: &[PathBuf], out: Option<PathBuf>) -> Result<()> {
    let (rows, mut rejected) = if files.is_empty() {
        println!("🗄️  Reading season stats from {}...", config.database_url);
        let pool = create_pool(&config.database_url).await?;
        init_database_with_pool(&pool).await?;
        (get_season_rows(&pool).await?, Vec::new())
    } else {
        println!("📂 Reading {} season file(s)...", files.len());
        let source = read_season_files(files)?;
        (label_batches(source.batches), source.rejected)
    };

    let store = ModelStore::new(out.unwrap_or_else(|| config.model_dir.clone()));
    println!("🧮 Building similarity model from {} rows...", rows.len());

    let outcome = match build_and_save(rows, &store) {
        Ok(outcome) => outcome,
        Err(ModelError::EmptyDataset) => {
            println!("📭 No usable player seasons found. Seed the database or pass --file.");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let summary = outcome.model.summary();
    println!("✅ Published model {} to {}", summary.build_id, store.dir().display());
    println!("   Player seasons: {}", summary.rows);

    println!("\n📊 Feature scaling:");
    let features = outcome.model.features();
    for (column, stats) in features.columns().iter().zip(features.column_stats()) {
        println!("   {:<4} mean {:>9.3}  std {:>9.3}", column, stats.mean, stats.std_dev);
    }

    rejected.extend(outcome.rejected);
    if !rejected.is_empty() {
        println!("\n⚠️  {} rows were rejected:", rejected.len());
        for reason in rejected.iter().take(10) {
            println!("   • {}", reason);
        }
        if rejected.len() > 10 {
            println!("   ... and {} more", rejected.len() - 10);
        }
    }

    Ok(())
}

pub async fn show_similar(config: &Config, first_name: &str, last_name: &str, season: &str, k: Option<usize>) -> Result<()> {
    let store = ModelStore::new(&config.model_dir);
    let Some(model) = store.load()? else {
        println!(
            "❌ No similarity model in {}. Build one first with: courtsight build-model",
            store.dir().display()
        );
        return Ok(());
    };

    let k = k.unwrap_or(config.similar_default_k).clamp(1, MAX_SIMILAR_K);
    let id = canonical_id(first_name, last_name, season);
    println!("🔍 Player seasons most similar to {}:\n", id);

    match model.similar_players(first_name, last_name, season, k) {
        Ok(similar) => {
            for (i, player) in similar.iter().enumerate() {
                println!("{:>2}. {:<40} {:.4}", i + 1, player.player_season_id, player.similarity_score);
            }
            if similar.is_empty() {
                println!("📭 No other player seasons in the model.");
            }
        }
        Err(ModelError::NotFound(_)) => {
            println!("❌ {} is not in the model", id);
            let hints = model.suggestions(&id, 5);
            if !hints.is_empty() {
                println!("\n💡 Did you mean:");
                for hint in hints {
                    println!("   • {}", hint);
                }
            }
        }
        Err(e) => return Err(e.into()),
    }

    Ok(())
}

pub async fn show_players(config: &Config, skip: i64, limit: i64) -> Result<()> {
    let pool = create_pool(&config.database_url).await?;
    init_database_with_pool(&pool).await?;

    let players = list_players(&pool, skip.max(0), limit.clamp(1, 500)).await?;
    if players.is_empty() {
        println!("📭 No players found. Load some with: courtsight seed --file <season.json>");
        return Ok(());
    }

    println!("🏀 Players ({} shown):\n", players.len());
    for player in players {
        println!("{:>5}  {} {} ({})", player.id, player.first_name, player.last_name, player.team);
    }

    Ok(())
}
