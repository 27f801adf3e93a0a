mod support;

use quoll::{Quoll, query};

use support::db::MockServer;

/// Statement logging runs on every execution path; make sure it stays out
/// of the way when a subscriber is installed.
#[tokio::test]
async fn statement_logging_does_not_disturb_execution() -> anyhow::Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    let server = MockServer::new();
    let pool = Quoll::new()
        .max_connections(1)
        .open("host=h user=u dbname=d", server.connector())
        .await?;

    pool.execute("CREATE TABLE logged(v int)").await?;
    pool.execute(query("INSERT INTO logged VALUES ($1)").bind(1)).await?;
    pool.fetch_all("SELECT * FROM logged").await?;

    assert_eq!(server.table_len("logged"), 1);

    Ok(())
}
