//! Book catalog models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Book {
    pub id: String,
    pub title: String,
    pub author: String,
    pub description: String,
    pub publisher: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Body for create, bulk insert, and update. Update is a full replace
/// of all four fields.
#[derive(Debug, Clone, Deserialize)]
pub struct BookPayload {
    pub title: String,
    pub author: String,
    pub description: String,
    pub publisher: String,
}

#[derive(Debug, Serialize)]
pub struct CreateBookResponse {
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct BulkInsertResponse {
    pub ids: Vec<String>,
}

/// Storage-side listing: one page of rows plus the total size of the
/// filtered set.
#[derive(Debug, Serialize)]
pub struct BookListResponse {
    pub rows: Vec<Book>,
    pub count: i64,
}

/// In-memory listing: every matching row, no pagination and no count.
#[derive(Debug, Serialize)]
pub struct LocalSortResponse {
    pub rows: Vec<Book>,
}
