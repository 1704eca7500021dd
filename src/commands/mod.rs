pub mod chat;
pub mod query;
pub mod schema;

use std::sync::Arc;
use tokio::sync::Mutex;

use crate::pipeline::Pipeline;

/// Pipeline session shared by the command handlers.
pub type SharedPipeline = Arc<Mutex<Pipeline>>;

pub fn share(pipeline: Pipeline) -> SharedPipeline {
    Arc::new(Mutex::new(pipeline))
}

pub use chat::{explain_sql, suggest_questions};
pub use query::{ask, format_result};
pub use schema::{get_schema_info, get_table_info, list_tables, TableDetails};
