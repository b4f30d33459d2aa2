//! Integration tests for PgLinkStore.
//! Requires a Postgres instance. Set DATABASE_TEST_URL or these tests are skipped.

use std::collections::BTreeSet;
use std::time::Duration;

use circuitmap_common::{LinkRole, SynapticLink};
use circuitmap_links::{LinkStore, PgLinkStore};
use sqlx::PgPool;

/// Get a test database pool, or skip if no test DB is available.
async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("DATABASE_TEST_URL").ok()?;
    let pool = PgPool::connect(&url).await.ok()?;
    sqlx::migrate!("../../migrations").run(&pool).await.ok()?;
    Some(pool)
}

/// Tests share one table, so each uses its own id range.
async fn seed(pool: &PgPool, links: &[SynapticLink]) {
    for l in links {
        sqlx::query("DELETE FROM circuitmap_synlinks WHERE id = $1 OR \"offset\" = $2")
            .bind(l.id)
            .bind(l.offset)
            .execute(pool)
            .await
            .unwrap();
        sqlx::query(
            r#"
            INSERT INTO circuitmap_synlinks
                (id, segmentid_pre, segmentid_post, pre_x, pre_y, pre_z,
                 post_x, post_y, post_z, scores, clust_con_offset, "offset")
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(l.id)
        .bind(l.segmentid_pre)
        .bind(l.segmentid_post)
        .bind(l.pre.x)
        .bind(l.pre.y)
        .bind(l.pre.z)
        .bind(l.post.x)
        .bind(l.post.y)
        .bind(l.post.z)
        .bind(l.scores)
        .bind(l.clust_con_offset)
        .bind(l.offset)
        .execute(pool)
        .await
        .unwrap();
    }
}

#[tokio::test]
async fn links_for_filters_by_role_and_orders_by_id() {
    let Some(pool) = test_pool().await else {
        return;
    };
    seed(
        &pool,
        &[
            SynapticLink::new(910_002, 9_100, 9_200, 910_002),
            SynapticLink::new(910_001, 9_100, 9_300, 910_001),
            SynapticLink::new(910_003, 9_400, 9_100, 910_003),
        ],
    )
    .await;
    let store = PgLinkStore::new(pool);

    let pre = store.links_for(9_100, LinkRole::Pre).await.unwrap();
    assert_eq!(
        pre.iter().map(|l| l.id).collect::<Vec<_>>(),
        vec![910_001, 910_002]
    );

    let post = store.links_for(9_100, LinkRole::Post).await.unwrap();
    assert_eq!(post.len(), 1);
    assert_eq!(post[0].segmentid_pre, 9_400);
}

#[tokio::test]
async fn representative_lookup_is_keyed_by_offset() {
    let Some(pool) = test_pool().await else {
        return;
    };
    seed(
        &pool,
        &[
            SynapticLink::new(920_001, 9_500, 9_600, 920_001),
            SynapticLink::new(920_002, 9_500, 9_600, 920_002).with_cluster(920_001),
        ],
    )
    .await;
    let store = PgLinkStore::new(pool).with_timeout(Duration::from_secs(5));

    let offsets: BTreeSet<i32> = [920_001, 920_999].into_iter().collect();
    let reps = store.representative_links_for(&offsets).await.unwrap();
    assert_eq!(reps.len(), 1);
    assert_eq!(reps[&920_001].id, 920_001);

    assert!(store
        .representative_links_for(&BTreeSet::new())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn missing_segment_yields_no_rows() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let store = PgLinkStore::new(pool);
    assert!(store
        .links_for(-424_242, LinkRole::Pre)
        .await
        .unwrap()
        .is_empty());
}
