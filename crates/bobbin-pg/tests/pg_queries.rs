//! PgQueries and PgConnector against a real database.
//!
//! Each test gets a fresh database from `#[sqlx::test]`; the tables are
//! created here since the adapters never run DDL.

use std::collections::HashSet;
use std::time::Duration;

use bobbin_core::ports::{Connector, Queries};
use bobbin_core::{JobId, JobStatus};
use bobbin_pg::{PgConnector, PgQueries, TableNames};
use sqlx::PgPool;

const LOG_TABLE: &str = "bobbin_log";

fn queue_ddl(name: &str, with_updated: bool) -> String {
    format!(
        "CREATE TABLE {name} ( \
             id BIGSERIAL PRIMARY KEY, \
             priority INTEGER NOT NULL DEFAULT 0, \
             entrypoint TEXT NOT NULL, \
             payload BYTEA, \
             status TEXT NOT NULL, \
             enqueued TIMESTAMPTZ NOT NULL, \
             picked TIMESTAMPTZ{updated} \
         )",
        updated = if with_updated {
            ", updated TIMESTAMPTZ NOT NULL"
        } else {
            ""
        },
    )
}

fn log_ddl(name: &str) -> String {
    format!(
        "CREATE TABLE {name} ( \
             id BIGINT PRIMARY KEY, \
             priority INTEGER NOT NULL, \
             entrypoint TEXT NOT NULL, \
             payload BYTEA, \
             status TEXT NOT NULL, \
             enqueued TIMESTAMPTZ NOT NULL, \
             picked TIMESTAMPTZ, \
             logged TIMESTAMPTZ NOT NULL \
         )"
    )
}

async fn create_tables(pool: &PgPool) {
    let ddl = format!("{}; {};", queue_ddl("bobbin_jobs", true), log_ddl(LOG_TABLE));
    sqlx::raw_sql(&ddl).execute(pool).await.unwrap();
}

fn entrypoints(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[sqlx::test(migrations = false)]
async fn test_has_updated_column(pool: PgPool) {
    create_tables(&pool).await;
    sqlx::raw_sql(&queue_ddl("legacy_jobs", false))
        .execute(&pool)
        .await
        .unwrap();

    let queries = PgQueries::new(pool.clone());
    assert!(queries.has_updated_column().await.unwrap());

    let legacy = PgQueries::new(pool)
        .with_tables(TableNames::new("legacy_jobs", LOG_TABLE).unwrap());
    assert!(!legacy.has_updated_column().await.unwrap());
}

#[sqlx::test(migrations = false)]
async fn test_has_updated_column_uses_the_named_schema(pool: PgPool) {
    // public.jobs lacks the column, queue.jobs has it
    let ddl = format!(
        "CREATE SCHEMA queue; {}; {};",
        queue_ddl("queue.jobs", true),
        queue_ddl("public.jobs", false),
    );
    sqlx::raw_sql(&ddl).execute(&pool).await.unwrap();

    let qualified = PgQueries::new(pool.clone())
        .with_tables(TableNames::new("queue.jobs", "queue.log").unwrap());
    assert!(qualified.has_updated_column().await.unwrap());

    let unqualified = PgQueries::new(pool)
        .with_tables(TableNames::new("jobs", "log").unwrap());
    assert!(!unqualified.has_updated_column().await.unwrap());
}

#[sqlx::test(migrations = false)]
async fn test_dequeue_orders_by_priority_and_filters_entrypoints(pool: PgPool) {
    create_tables(&pool).await;
    let queries = PgQueries::new(pool.clone());
    let low = queries.enqueue("email", None, 0).await.unwrap();
    let high = queries.enqueue("email", Some(&b"urgent"[..]), 5).await.unwrap();
    let other = queries.enqueue("report", None, 9).await.unwrap();
    let low_again = queries.enqueue("email", None, 0).await.unwrap();

    let jobs = queries.dequeue(2, &entrypoints(&["email"]), None).await.unwrap();
    let ids: Vec<JobId> = jobs.iter().map(|j| j.id).collect();
    assert_eq!(ids, vec![high, low]);
    assert!(jobs.iter().all(|j| j.status == JobStatus::Picked && j.picked_at.is_some()));
    assert_eq!(jobs[0].payload.as_deref(), Some(&b"urgent"[..]));

    let rest = queries.dequeue(10, &entrypoints(&["email"]), None).await.unwrap();
    assert_eq!(rest.iter().map(|j| j.id).collect::<Vec<_>>(), vec![low_again]);

    let status: String = sqlx::query_scalar("SELECT status FROM bobbin_jobs WHERE id = $1")
        .bind(other.get())
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(status, "queued");
}

#[sqlx::test(migrations = false)]
async fn test_concurrent_dequeues_never_claim_the_same_job(pool: PgPool) {
    create_tables(&pool).await;
    let queries = PgQueries::new(pool);
    for _ in 0..10 {
        queries.enqueue("email", None, 0).await.unwrap();
    }

    let names = entrypoints(&["email"]);
    let (a, b) = tokio::join!(
        queries.dequeue(6, &names, None),
        queries.dequeue(6, &names, None),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    let ids: HashSet<JobId> = a.iter().chain(&b).map(|j| j.id).collect();
    assert_eq!(ids.len(), a.len() + b.len());
    assert!(ids.len() <= 10);
}

#[sqlx::test(migrations = false)]
async fn test_stale_picked_job_is_reclaimed_only_with_a_timer(pool: PgPool) {
    create_tables(&pool).await;
    let queries = PgQueries::new(pool.clone());
    let id = queries.enqueue("email", None, 0).await.unwrap();
    let names = entrypoints(&["email"]);
    assert_eq!(queries.dequeue(1, &names, None).await.unwrap().len(), 1);

    sqlx::query("UPDATE bobbin_jobs SET updated = NOW() - interval '2 minutes'")
        .execute(&pool)
        .await
        .unwrap();

    assert!(queries.dequeue(1, &names, None).await.unwrap().is_empty());
    let timer = Some(Duration::from_secs(300));
    assert!(queries.dequeue(1, &names, timer).await.unwrap().is_empty());

    let timer = Some(Duration::from_secs(60));
    let reclaimed = queries.dequeue(1, &names, timer).await.unwrap();
    assert_eq!(reclaimed.iter().map(|j| j.id).collect::<Vec<_>>(), vec![id]);

    // 再取得で updated が進むので、すぐには取り直せない
    assert!(queries.dequeue(1, &names, timer).await.unwrap().is_empty());
}

#[sqlx::test(migrations = false)]
async fn test_log_job_keeps_the_first_terminal_status(pool: PgPool) {
    create_tables(&pool).await;
    let queries = PgQueries::new(pool.clone());
    queries.enqueue("email", Some(&b"x"[..]), 3).await.unwrap();
    let job = queries
        .dequeue(1, &entrypoints(&["email"]), None)
        .await
        .unwrap()
        .remove(0);

    queries.log_job(&job, JobStatus::Successful).await.unwrap();
    queries.log_job(&job, JobStatus::Exception).await.unwrap();

    let rows: Vec<(i64, String, i32)> =
        sqlx::query_as("SELECT id, status, priority FROM bobbin_log")
            .fetch_all(&pool)
            .await
            .unwrap();
    assert_eq!(rows, vec![(job.id.get(), "successful".to_string(), 3)]);

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bobbin_jobs")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(remaining, 0);
}

#[sqlx::test(migrations = false)]
async fn test_enqueue_wakes_a_listening_connection(pool: PgPool) {
    create_tables(&pool).await;
    let connector = PgConnector::with_options((*pool.connect_options()).clone());
    let mut conn = connector.connect().await.unwrap();
    let mut wake = conn.listen("bobbin_channel", 4).await.unwrap();

    let queries = PgQueries::new(pool).with_channel("bobbin_channel");
    queries.enqueue("email", None, 0).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), wake.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.channel, "bobbin_channel");
    assert_eq!(event.payload, "email");

    conn.unlisten("bobbin_channel").await.unwrap();
    conn.release().await.unwrap();
}
