//! Jiptv-DB: the durable job record store.
//!
//! SQLite through rusqlite with an r2d2 connection pool.
//!
//! # Modules
//!
//! - `migrations` - Embedded schema migrations
//! - `pool` - Connection pool management
//! - `models` - The `TranscodingJob` record and its lifecycle transitions
//! - `queries` - Query operations
//!
//! # Example
//!
//! ```
//! use jiptv_common::JobType;
//! use jiptv_db::models::NewJob;
//! use jiptv_db::pool::{get_conn, init_memory_pool};
//! use jiptv_db::queries::transcoding_jobs;
//!
//! let pool = init_memory_pool().unwrap();
//! let conn = get_conn(&pool).unwrap();
//!
//! let job = transcoding_jobs::create_job(
//!     &conn,
//!     &NewJob::new(7.into(), JobType::Analysis, "/media/a.mkv"),
//! )
//! .unwrap();
//! println!("Created job: {}", job.id);
//! ```

pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;
