#![allow(dead_code)]

pub mod db;

use quoll::{Pool, Quoll, Result};

use db::MockServer;

/// Open a pool of `max` connections against a mock server.
pub async fn pool(server: &MockServer, max: u32) -> Result<Pool> {
    Quoll::new()
        .max_connections(max)
        .open(
            "host=localhost user=postgres dbname=quoll_test",
            server.connector(),
        )
        .await
}
