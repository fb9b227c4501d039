use super::{from_json, to_json, Database, DatabaseConversion};
use anyhow::{Context, Result};
use forgeci_data::config::PlatformRule;
use sqlx::{query, query_as};

#[derive(Debug, Clone)]
pub struct BuildConfigRecord {
    pub name: String,
    pub label: String,
    pub path: String,
    pub min_rev: Option<String>,
    pub max_rev: Option<String>,
    pub recipe: String,
    pub active: bool,
    pub description: String,
}

#[derive(sqlx::FromRow)]
struct BuildConfigRow {
    name: String,
    label: String,
    path: String,
    min_rev: Option<String>,
    max_rev: Option<String>,
    recipe: String,
    active: i64,
    description: String,
}

impl DatabaseConversion<BuildConfigRow> for BuildConfigRecord {
    fn create_record(&self) -> Result<BuildConfigRow> {
        Ok(BuildConfigRow {
            name: self.name.clone(),
            label: self.label.clone(),
            path: self.path.clone(),
            min_rev: self.min_rev.clone(),
            max_rev: self.max_rev.clone(),
            recipe: self.recipe.clone(),
            active: self.active as i64,
            description: self.description.clone(),
        })
    }

    fn from_record(row: BuildConfigRow) -> Result<Self> {
        Ok(Self {
            name: row.name,
            label: row.label,
            path: row.path,
            min_rev: row.min_rev,
            max_rev: row.max_rev,
            recipe: row.recipe,
            active: row.active != 0,
            description: row.description,
        })
    }
}

impl BuildConfigRecord {
    pub async fn find(name: &str, db: &Database) -> Result<Option<Self>> {
        let row = query_as::<_, BuildConfigRow>("SELECT * FROM build_config WHERE name = ?")
            .bind(name)
            .fetch_optional(db)
            .await
            .context("failed to query build config")?;

        row.map(Self::from_record).transpose()
    }

    pub async fn find_all(db: &Database) -> Result<Vec<Self>> {
        let rows = query_as::<_, BuildConfigRow>("SELECT * FROM build_config ORDER BY name")
            .fetch_all(db)
            .await
            .context("failed to query build configs")?;

        rows.into_iter().map(Self::from_record).collect()
    }

    pub async fn find_active(db: &Database) -> Result<Vec<Self>> {
        let rows = query_as::<_, BuildConfigRow>("SELECT * FROM build_config WHERE active = 1 ORDER BY name")
            .fetch_all(db)
            .await
            .context("failed to query active build configs")?;

        rows.into_iter().map(Self::from_record).collect()
    }

    pub async fn save(&self, db: &Database) -> Result<()> {
        let record = self.create_record()?;

        query(
            r#"
            INSERT INTO build_config (name, label, path, min_rev, max_rev, recipe, active, description)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (name) DO UPDATE SET
                label = excluded.label, path = excluded.path, min_rev = excluded.min_rev,
                max_rev = excluded.max_rev, recipe = excluded.recipe, active = excluded.active,
                description = excluded.description
            "#,
        )
        .bind(record.name)
        .bind(record.label)
        .bind(record.path)
        .bind(record.min_rev)
        .bind(record.max_rev)
        .bind(record.recipe)
        .bind(record.active)
        .bind(record.description)
        .execute(db)
        .await
        .context("failed to save build config")?;

        Ok(())
    }

    pub async fn set_active(name: &str, active: bool, db: &Database) -> Result<()> {
        query("UPDATE build_config SET active = ? WHERE name = ?")
            .bind(active as i64)
            .bind(name)
            .execute(db)
            .await
            .context("failed to update build config activity")?;

        Ok(())
    }

    pub async fn set_description(name: &str, description: &str, db: &Database) -> Result<()> {
        query("UPDATE build_config SET description = ? WHERE name = ?")
            .bind(description)
            .bind(name)
            .execute(db)
            .await
            .context("failed to update build config description")?;

        Ok(())
    }

    pub async fn delete(name: &str, db: &Database) -> Result<()> {
        query("DELETE FROM build_config WHERE name = ?")
            .bind(name)
            .execute(db)
            .await
            .context("failed to delete build config")?;

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PlatformRecord {
    pub id: i64,
    pub config: String,
    pub name: String,
    pub rules: Vec<PlatformRule>,
}

#[derive(sqlx::FromRow)]
struct PlatformRow {
    id: i64,
    config: String,
    name: String,
    rules: String,
}

impl DatabaseConversion<PlatformRow> for PlatformRecord {
    fn create_record(&self) -> Result<PlatformRow> {
        Ok(PlatformRow { id: self.id, config: self.config.clone(), name: self.name.clone(), rules: to_json(&self.rules)? })
    }

    fn from_record(row: PlatformRow) -> Result<Self> {
        Ok(Self { id: row.id, config: row.config, name: row.name, rules: from_json(&row.rules)? })
    }
}

impl PlatformRecord {
    pub async fn find_for_config(config: &str, db: &Database) -> Result<Vec<Self>> {
        let rows = query_as::<_, PlatformRow>("SELECT * FROM target_platform WHERE config = ? ORDER BY id")
            .bind(config)
            .fetch_all(db)
            .await
            .context("failed to query platforms")?;

        rows.into_iter().map(Self::from_record).collect()
    }

    pub async fn find_active(db: &Database) -> Result<Vec<Self>> {
        let rows = query_as::<_, PlatformRow>(
            "SELECT p.* FROM target_platform p JOIN build_config c ON c.name = p.config WHERE c.active = 1 ORDER BY p.id",
        )
        .fetch_all(db)
        .await
        .context("failed to query active platforms")?;

        rows.into_iter().map(Self::from_record).collect()
    }

    pub async fn find(id: i64, db: &Database) -> Result<Option<Self>> {
        let row = query_as::<_, PlatformRow>("SELECT * FROM target_platform WHERE id = ?")
            .bind(id)
            .fetch_optional(db)
            .await
            .context("failed to query platform")?;

        row.map(Self::from_record).transpose()
    }

    pub async fn insert(config: &str, name: &str, rules: &[PlatformRule], db: &Database) -> Result<i64> {
        let rules_json = to_json(&rules.to_vec())?;

        let id = query("INSERT INTO target_platform (config, name, rules) VALUES (?, ?, ?)")
            .bind(config)
            .bind(name)
            .bind(rules_json)
            .execute(db)
            .await
            .context("failed to insert platform")?
            .last_insert_rowid();

        Ok(id)
    }

    pub async fn delete_for_config(config: &str, db: &Database) -> Result<()> {
        query("DELETE FROM target_platform WHERE config = ?")
            .bind(config)
            .execute(db)
            .await
            .context("failed to delete platforms for config")?;

        Ok(())
    }
}
