use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info};

use circuitmap_common::{
    encode_node_id, CircuitMapError, Point3, Relation, Result, SkeletonNode, MAX_NODES_PER_SEGMENT,
    MAX_PROJECTS,
};
use circuitmap_spatial::{Assignment, LINK_CONFIDENCE};

use crate::catalog::{CatalogStore, SkeletonWrite, SkeletonWriteOutcome};

use super::{bounded, db_err, DEFAULT_QUERY_TIMEOUT};

/// The host application's tables (`treenode`, `connector`,
/// `treenode_connector`, class instances and their relations).
#[derive(Clone)]
pub struct PgCatalog {
    pool: PgPool,
    timeout: Duration,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    /// Bound every call, transaction included, by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Resolve `names` in `table` (`relation` or `class`) for `project_id`.
/// Every name must exist.
async fn lookup_ids(
    tx: &mut Transaction<'_, Postgres>,
    table: &str,
    project_id: i64,
    names: &[&str],
) -> Result<HashMap<String, i64>> {
    let sql = match table {
        "relation" => {
            "SELECT relation_name, id::bigint FROM relation WHERE project_id = $1 AND relation_name = ANY($2)"
        }
        "class" => "SELECT class_name, id::bigint FROM class WHERE project_id = $1 AND class_name = ANY($2)",
        other => return Err(CircuitMapError::invalid(format!("unknown lookup table {other}"))),
    };
    let wanted: Vec<String> = names.iter().map(|n| n.to_string()).collect();
    let rows = sqlx::query_as::<_, (String, i64)>(sql)
        .bind(project_id)
        .bind(&wanted)
        .fetch_all(&mut **tx)
        .await
        .map_err(db_err)?;

    let ids: HashMap<String, i64> = rows.into_iter().collect();
    if let Some(missing) = names.iter().find(|n| !ids.contains_key(**n)) {
        return Err(CircuitMapError::invalid(format!(
            "{table} '{missing}' is not defined in project {project_id}"
        )));
    }
    Ok(ids)
}

async fn insert_class_instance(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i64,
    project_id: i64,
    class_id: i64,
    name: &str,
) -> Result<i64> {
    sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO class_instance (user_id, project_id, class_id, name)
        VALUES ($1, $2, $3, $4)
        RETURNING id::bigint
        "#,
    )
    .bind(user_id)
    .bind(project_id)
    .bind(class_id)
    .bind(name)
    .fetch_one(&mut **tx)
    .await
    .map_err(db_err)
}

/// Existing class instance named `name`, or a new one.
async fn class_instance_named(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i64,
    project_id: i64,
    class_id: i64,
    name: &str,
) -> Result<i64> {
    let existing = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT id::bigint FROM class_instance
        WHERE project_id = $1 AND class_id = $2 AND name = $3
        ORDER BY id
        LIMIT 1
        "#,
    )
    .bind(project_id)
    .bind(class_id)
    .bind(name)
    .fetch_optional(&mut **tx)
    .await
    .map_err(db_err)?;

    match existing {
        Some(id) => Ok(id),
        None => insert_class_instance(tx, user_id, project_id, class_id, name).await,
    }
}

async fn link_class_instances(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i64,
    project_id: i64,
    a: i64,
    b: i64,
    relation_id: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO class_instance_class_instance
            (user_id, project_id, class_instance_a, class_instance_b, relation_id)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(user_id)
    .bind(project_id)
    .bind(a)
    .bind(b)
    .bind(relation_id)
    .execute(&mut **tx)
    .await
    .map_err(db_err)?;
    Ok(())
}

impl PgCatalog {
    async fn segment_skeleton(&self, project_id: i64, segment_id: i64) -> Result<Option<i64>> {
        let first = encode_node_id(segment_id, 0, project_id)?;
        let last = encode_node_id(segment_id, MAX_NODES_PER_SEGMENT - 1, project_id)?;
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT skeleton_id::bigint FROM treenode
            WHERE project_id = $1 AND id BETWEEN $2 AND $3 AND id % $4 = $1
            ORDER BY id
            LIMIT 1
            "#,
        )
        .bind(project_id)
        .bind(first)
        .bind(last)
        .bind(MAX_PROJECTS)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn select_nodes(&self, project_id: i64, skeleton_id: i64) -> Result<Vec<SkeletonNode>> {
        let rows = sqlx::query_as::<_, (i64, f64, f64, f64)>(
            r#"
            SELECT id::bigint, location_x::float8, location_y::float8, location_z::float8
            FROM treenode
            WHERE skeleton_id = $1 AND project_id = $2
            ORDER BY id
            "#,
        )
        .bind(skeleton_id)
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .map(|(id, x, y, z)| SkeletonNode::new(id, Point3::new(x, y, z)))
            .collect())
    }

    async fn insert_skeleton(&self, write: &SkeletonWrite) -> Result<SkeletonWriteOutcome> {
        let (root, children) = write
            .nodes
            .split_first()
            .ok_or_else(|| CircuitMapError::invalid("cannot write a skeleton without nodes"))?;
        let (project_id, user_id) = (write.project_id, write.user_id);

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let mut relation_names = vec!["model_of"];
        let mut class_names = vec!["neuron", "skeleton"];
        if !write.tags.is_empty() {
            relation_names.push("labeled_as");
            class_names.push("label");
        }
        if !write.annotations.is_empty() {
            relation_names.push("annotated_with");
            class_names.push("annotation");
        }
        let relations = lookup_ids(&mut tx, "relation", project_id, &relation_names).await?;
        let classes = lookup_ids(&mut tx, "class", project_id, &class_names).await?;

        let neuron_id = insert_class_instance(
            &mut tx,
            user_id,
            project_id,
            classes["neuron"],
            &format!("neuron {}", write.segment_id),
        )
        .await?;
        let skeleton_id = insert_class_instance(
            &mut tx,
            user_id,
            project_id,
            classes["skeleton"],
            &format!("skeleton {}", write.segment_id),
        )
        .await?;
        link_class_instances(
            &mut tx,
            user_id,
            project_id,
            skeleton_id,
            neuron_id,
            relations["model_of"],
        )
        .await?;

        let inserted_root = sqlx::query(
            r#"
            INSERT INTO treenode
                (id, project_id, location_x, location_y, location_z,
                 editor_id, user_id, skeleton_id, radius)
            VALUES ($1, $2, $3, $4, $5, $6, $6, $7, $8)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(root.id)
        .bind(project_id)
        .bind(root.location.x)
        .bind(root.location.y)
        .bind(root.location.z)
        .bind(user_id)
        .bind(skeleton_id)
        .bind(root.radius)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?
        .rows_affected();

        if inserted_root == 0 {
            tx.rollback().await.map_err(db_err)?;
            let existing = self
                .segment_skeleton(project_id, write.segment_id)
                .await?
                .ok_or_else(|| {
                    CircuitMapError::ImportConflict(format!(
                        "root node {} conflicted but no owning skeleton was found",
                        root.id
                    ))
                })?;
            info!(
                segment_id = write.segment_id,
                skeleton_id = existing,
                "Skeleton root already present, reusing existing skeleton"
            );
            return Ok(SkeletonWriteOutcome {
                skeleton_id: existing,
                created: false,
            });
        }

        if !children.is_empty() {
            let ids: Vec<i64> = children.iter().map(|n| n.id).collect();
            let parents: Vec<Option<i64>> = children.iter().map(|n| n.parent_id).collect();
            let xs: Vec<f64> = children.iter().map(|n| n.location.x).collect();
            let ys: Vec<f64> = children.iter().map(|n| n.location.y).collect();
            let zs: Vec<f64> = children.iter().map(|n| n.location.z).collect();
            let radii: Vec<f64> = children.iter().map(|n| n.radius).collect();

            sqlx::query(
                r#"
                INSERT INTO treenode
                    (id, project_id, location_x, location_y, location_z,
                     editor_id, user_id, skeleton_id, radius, parent_id)
                SELECT t.id, $1, t.x, t.y, t.z, $2, $2, $3, t.radius, t.parent_id
                FROM UNNEST($4::bigint[], $5::bigint[], $6::float8[], $7::float8[], $8::float8[], $9::float8[])
                    AS t(id, parent_id, x, y, z, radius)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(project_id)
            .bind(user_id)
            .bind(skeleton_id)
            .bind(&ids)
            .bind(&parents)
            .bind(&xs)
            .bind(&ys)
            .bind(&zs)
            .bind(&radii)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        for tag in &write.tags {
            let label_id =
                class_instance_named(&mut tx, user_id, project_id, classes["label"], tag).await?;
            sqlx::query(
                r#"
                INSERT INTO treenode_class_instance
                    (user_id, project_id, treenode_id, class_instance_id, relation_id)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(user_id)
            .bind(project_id)
            .bind(root.id)
            .bind(label_id)
            .bind(relations["labeled_as"])
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        for annotation in &write.annotations {
            let annotation_id = class_instance_named(
                &mut tx,
                user_id,
                project_id,
                classes["annotation"],
                annotation,
            )
            .await?;
            link_class_instances(
                &mut tx,
                user_id,
                project_id,
                neuron_id,
                annotation_id,
                relations["annotated_with"],
            )
            .await?;
        }

        tx.commit().await.map_err(db_err)?;

        info!(
            segment_id = write.segment_id,
            skeleton_id,
            neuron_id,
            nodes = write.nodes.len(),
            tags = write.tags.len(),
            annotations = write.annotations.len(),
            "Wrote skeleton"
        );
        Ok(SkeletonWriteOutcome {
            skeleton_id,
            created: true,
        })
    }

    async fn insert_synapses(
        &self,
        project_id: i64,
        user_id: i64,
        skeleton_id: i64,
        assignment: &Assignment,
    ) -> Result<i64> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let relations = lookup_ids(
            &mut tx,
            "relation",
            project_id,
            &[
                Relation::PresynapticTo.name(),
                Relation::PostsynapticTo.name(),
            ],
        )
        .await?;

        let connectors: Vec<_> = assignment.connectors.values().collect();
        let ids: Vec<i64> = connectors.iter().map(|c| c.id).collect();
        let xs: Vec<f64> = connectors.iter().map(|c| c.location.x).collect();
        let ys: Vec<f64> = connectors.iter().map(|c| c.location.y).collect();
        let zs: Vec<f64> = connectors.iter().map(|c| c.location.z).collect();

        let new_connectors = sqlx::query(
            r#"
            INSERT INTO connector (id, user_id, editor_id, project_id, location_x, location_y, location_z)
            SELECT c.id, $1, $1, $2, c.x, c.y, c.z
            FROM UNNEST($3::bigint[], $4::float8[], $5::float8[], $6::float8[]) AS c(id, x, y, z)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(project_id)
        .bind(&ids)
        .bind(&xs)
        .bind(&ys)
        .bind(&zs)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?
        .rows_affected();

        let node_ids: Vec<i64> = assignment.links.iter().map(|l| l.node_id).collect();
        let connector_ids: Vec<i64> = assignment.links.iter().map(|l| l.connector_id).collect();
        let relation_ids: Vec<i64> = assignment
            .links
            .iter()
            .map(|l| relations[l.relation.name()])
            .collect();

        let new_links = sqlx::query(
            r#"
            INSERT INTO treenode_connector
                (user_id, project_id, treenode_id, connector_id, relation_id, skeleton_id, confidence)
            SELECT $1, $2, l.treenode_id, l.connector_id, l.relation_id, $3, $4
            FROM UNNEST($5::bigint[], $6::bigint[], $7::bigint[]) AS l(treenode_id, connector_id, relation_id)
            ON CONFLICT ON CONSTRAINT treenode_connector_project_id_treenode_id_connector_id_relation
            DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(project_id)
        .bind(skeleton_id)
        .bind(LINK_CONFIDENCE)
        .bind(&node_ids)
        .bind(&connector_ids)
        .bind(&relation_ids)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?
        .rows_affected();

        let txid = sqlx::query_scalar::<_, i64>("SELECT txid_current()")
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        debug!(
            skeleton_id,
            connectors = ids.len(),
            new_connectors,
            links = node_ids.len(),
            new_links,
            txid,
            "Wrote synapses"
        );
        Ok(txid)
    }
}

#[async_trait]
impl CatalogStore for PgCatalog {
    async fn find_imported_skeleton(&self, project_id: i64, segment_id: i64) -> Result<Option<i64>> {
        bounded(
            self.timeout,
            "find imported skeleton",
            self.segment_skeleton(project_id, segment_id),
        )
        .await
    }

    async fn skeleton_nodes(&self, project_id: i64, skeleton_id: i64) -> Result<Vec<SkeletonNode>> {
        bounded(
            self.timeout,
            "load skeleton nodes",
            self.select_nodes(project_id, skeleton_id),
        )
        .await
    }

    async fn write_skeleton(&self, write: &SkeletonWrite) -> Result<SkeletonWriteOutcome> {
        bounded(self.timeout, "write skeleton", self.insert_skeleton(write)).await
    }

    async fn write_synapses(
        &self,
        project_id: i64,
        user_id: i64,
        skeleton_id: i64,
        assignment: &Assignment,
    ) -> Result<i64> {
        bounded(
            self.timeout,
            "write synapses",
            self.insert_synapses(project_id, user_id, skeleton_id, assignment),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    #[tokio::test]
    async fn call_timeout_has_a_default_and_can_be_overridden() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/catmaid")
            .unwrap();
        let catalog = PgCatalog::new(pool.clone());
        assert_eq!(catalog.timeout, DEFAULT_QUERY_TIMEOUT);

        let catalog = PgCatalog::new(pool).with_timeout(Duration::from_secs(2));
        assert_eq!(catalog.timeout, Duration::from_secs(2));
    }
}
