use std::collections::HashMap;

use async_trait::async_trait;

use crate::{
    application::repos::{ParentsRepo, RepoError},
    domain::{
        entities::{BlockRecord, ParentRecord, ParentRef, Site, SiteRelation},
        types::{BlockId, SiteId},
    },
};

use super::{
    PostgresRepositories,
    blocks::{BLOCK_COLUMNS, BlockRow},
    map_sqlx_error,
};

#[derive(sqlx::FromRow)]
struct ParentRow {
    kind: String,
    id: i64,
    name: String,
    slug: String,
    site_relation: String,
}

#[derive(sqlx::FromRow)]
struct ParentSiteRow {
    parent_id: i64,
    id: SiteId,
    domain: String,
    name: String,
}

fn relation(
    mode: &str,
    parent: &ParentRef,
    sites: Vec<Site>,
) -> Result<SiteRelation, RepoError> {
    match mode {
        "absent" => Ok(SiteRelation::Absent),
        "single" => Ok(SiteRelation::Single(sites.into_iter().next())),
        "many" => Ok(SiteRelation::Many(sites)),
        other => Err(RepoError::integrity(format!(
            "parent {parent} has unknown site relation `{other}`"
        ))),
    }
}

fn relation_columns(sites: &SiteRelation) -> (&'static str, Vec<i64>) {
    match sites {
        SiteRelation::Absent => ("absent", Vec::new()),
        SiteRelation::Single(site) => ("single", site.iter().map(|site| site.id.get()).collect()),
        SiteRelation::Many(sites) => ("many", sites.iter().map(|site| site.id.get()).collect()),
    }
}

impl PostgresRepositories {
    async fn parent_sites(
        &self,
        kind: &str,
        id: Option<i64>,
    ) -> Result<HashMap<i64, Vec<Site>>, RepoError> {
        let rows = sqlx::query_as::<_, ParentSiteRow>(
            r#"
            SELECT ps.parent_id, s.id, s.domain, s.name
            FROM parent_sites ps
            INNER JOIN sites s ON s.id = ps.site_id
            WHERE ps.parent_kind = $1 AND ($2::BIGINT IS NULL OR ps.parent_id = $2)
            ORDER BY ps.parent_id, s.id
            "#,
        )
        .bind(kind)
        .bind(id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        let mut grouped: HashMap<i64, Vec<Site>> = HashMap::new();
        for row in rows {
            grouped.entry(row.parent_id).or_default().push(Site {
                id: row.id,
                domain: row.domain,
                name: row.name,
            });
        }
        Ok(grouped)
    }

    fn assemble(
        rows: Vec<ParentRow>,
        mut sites: HashMap<i64, Vec<Site>>,
    ) -> Result<Vec<ParentRecord>, RepoError> {
        rows.into_iter()
            .map(|row| {
                let parent = ParentRef::new(row.kind, row.id);
                let members = sites.remove(&row.id).unwrap_or_default();
                Ok(ParentRecord {
                    sites: relation(&row.site_relation, &parent, members)?,
                    parent,
                    name: row.name,
                    slug: row.slug,
                })
            })
            .collect()
    }

    /// Insert or update a site by domain.
    pub async fn upsert_site(&self, domain: &str, name: &str) -> Result<Site, RepoError> {
        let (id, domain, name): (SiteId, String, String) = sqlx::query_as(
            r#"
            INSERT INTO sites (domain, name)
            VALUES ($1, $2)
            ON CONFLICT (domain) DO UPDATE SET name = EXCLUDED.name
            RETURNING id, domain, name
            "#,
        )
        .bind(domain)
        .bind(name)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(Site { id, domain, name })
    }

    /// Mirror a host entity that owns blocks, replacing its site membership.
    pub async fn upsert_parent(&self, record: &ParentRecord) -> Result<(), RepoError> {
        let (mode, site_ids) = relation_columns(&record.sites);
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        sqlx::query(
            r#"
            INSERT INTO parents (kind, id, name, slug, site_relation)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (kind, id) DO UPDATE
            SET name = EXCLUDED.name,
                slug = EXCLUDED.slug,
                site_relation = EXCLUDED.site_relation
            "#,
        )
        .bind(&record.parent.kind)
        .bind(record.parent.id)
        .bind(&record.name)
        .bind(&record.slug)
        .bind(mode)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        sqlx::query("DELETE FROM parent_sites WHERE parent_kind = $1 AND parent_id = $2")
            .bind(&record.parent.kind)
            .bind(record.parent.id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        sqlx::query(
            r#"
            INSERT INTO parent_sites (parent_kind, parent_id, site_id)
            SELECT $1, $2, UNNEST($3::BIGINT[])
            "#,
        )
        .bind(&record.parent.kind)
        .bind(record.parent.id)
        .bind(site_ids)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)
    }
}

#[async_trait]
impl ParentsRepo for PostgresRepositories {
    async fn list_parents(&self, kind: &str) -> Result<Vec<ParentRecord>, RepoError> {
        let rows = sqlx::query_as::<_, ParentRow>(
            "SELECT kind, id, name, slug, site_relation FROM parents WHERE kind = $1 ORDER BY id",
        )
        .bind(kind)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        let sites = self.parent_sites(kind, None).await?;
        Self::assemble(rows, sites)
    }

    async fn find_parent(&self, parent: &ParentRef) -> Result<Option<ParentRecord>, RepoError> {
        let row = sqlx::query_as::<_, ParentRow>(
            "SELECT kind, id, name, slug, site_relation FROM parents WHERE kind = $1 AND id = $2",
        )
        .bind(&parent.kind)
        .bind(parent.id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let sites = self.parent_sites(&parent.kind, Some(parent.id)).await?;
        Ok(Self::assemble(vec![row], sites)?.pop())
    }

    async fn parent_blocks(&self, parent: &ParentRef) -> Result<Vec<BlockRecord>, RepoError> {
        let sql = format!(
            r#"
            SELECT {BLOCK_COLUMNS}
            FROM blocks b
            INNER JOIN parent_blocks pb ON pb.block_id = b.id
            WHERE pb.parent_kind = $1 AND pb.parent_id = $2
            ORDER BY b.position, b.id
            "#
        );
        let rows = sqlx::query_as::<_, BlockRow>(&sql)
            .bind(&parent.kind)
            .bind(parent.id)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(BlockRecord::from).collect())
    }

    async fn parents_of_block(&self, block: BlockId) -> Result<Vec<ParentRef>, RepoError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT parent_kind, parent_id
            FROM parent_blocks
            WHERE block_id = $1
            ORDER BY parent_kind, parent_id
            "#,
        )
        .bind(block)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows
            .into_iter()
            .map(|(kind, id)| ParentRef::new(kind, id))
            .collect())
    }

    async fn attach_block(&self, parent: &ParentRef, block: BlockId) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            INSERT INTO parent_blocks (parent_kind, parent_id, block_id)
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&parent.kind)
        .bind(parent.id)
        .bind(block)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn delete_parent(&self, parent: &ParentRef) -> Result<(), RepoError> {
        sqlx::query("DELETE FROM parents WHERE kind = $1 AND id = $2")
            .bind(&parent.kind)
            .bind(parent.id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}
