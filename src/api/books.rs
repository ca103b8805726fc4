//! Book catalog endpoints: create, bulk insert, get, update, delete, and
//! the two listing modes.
//!
//! Listing is deliberately exposed twice: `/books` sorts and paginates in
//! the database and returns the total filtered count, while
//! `/books/local/sorting` fetches every matching row and sorts in
//! process. The second mode is unbounded and unsuitable at scale but is
//! part of the observable contract.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::{
    Book, BookListResponse, BookPayload, BulkInsertResponse, CreateBookResponse,
    LocalSortResponse, MessageResponse,
};
use crate::{AppState, DbPool};

use super::auth::CurrentUser;
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{validate_text_field, validate_uuid};

const DEFAULT_PAGE_SIZE: u32 = 10;

/// Columns a caller may sort by, in either listing mode. Checked before
/// the name is ever interpolated into SQL.
const SORT_COLUMNS: &[&str] = &[
    "id",
    "title",
    "author",
    "description",
    "publisher",
    "created_at",
    "updated_at",
];

#[derive(Debug, Deserialize)]
pub struct ListBooksQuery {
    pub author: Option<String>,
    pub publisher: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct LocalSortQuery {
    pub author: Option<String>,
    pub publisher: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

fn collect_payload_errors(
    errors: &mut ValidationErrorBuilder,
    payload: &BookPayload,
    prefix: &str,
) {
    if let Err(e) = validate_text_field(&payload.title, "Title", 500) {
        errors.add(format!("{}title", prefix), e);
    }
    if let Err(e) = validate_text_field(&payload.author, "Author", 200) {
        errors.add(format!("{}author", prefix), e);
    }
    if let Err(e) = validate_text_field(&payload.description, "Description", 2000) {
        errors.add(format!("{}description", prefix), e);
    }
    if let Err(e) = validate_text_field(&payload.publisher, "Publisher", 200) {
        errors.add(format!("{}publisher", prefix), e);
    }
}

fn validate_payload(payload: &BookPayload) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    collect_payload_errors(&mut errors, payload, "");
    errors.finish()
}

/// Resolve the sort column and direction, defaulting to title ascending
fn resolve_sort(
    sort_by: Option<&str>,
    sort_order: Option<&str>,
) -> Result<(&'static str, bool), ApiError> {
    let column = match sort_by {
        None => "title",
        Some(requested) => SORT_COLUMNS
            .iter()
            .copied()
            .find(|c| *c == requested)
            .ok_or_else(|| {
                ApiError::validation_field("sort_by", format!("Unknown sort field: {}", requested))
            })?,
    };

    let ascending = match sort_order.map(|s| s.to_ascii_lowercase()) {
        None => true,
        Some(order) if order == "asc" => true,
        Some(order) if order == "desc" => false,
        Some(order) => {
            return Err(ApiError::validation_field(
                "sort_order",
                format!("sort_order must be 'asc' or 'desc', got '{}'", order),
            ))
        }
    };

    Ok((column, ascending))
}

/// Build the WHERE clause for the optional equality filters. Both
/// filters are ANDed when both are present; values are bound, never
/// interpolated.
fn filter_clause(author: &Option<String>, publisher: &Option<String>) -> String {
    let mut conditions = Vec::new();
    if author.is_some() {
        conditions.push("author = ?");
    }
    if publisher.is_some() {
        conditions.push("publisher = ?");
    }
    if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    }
}

fn sort_key<'a>(book: &'a Book, column: &str) -> &'a str {
    match column {
        "id" => &book.id,
        "author" => &book.author,
        "description" => &book.description,
        "publisher" => &book.publisher,
        "created_at" => &book.created_at,
        "updated_at" => &book.updated_at,
        // resolve_sort only admits known columns; title is the default
        _ => &book.title,
    }
}

fn sort_rows(rows: &mut [Book], column: &str, ascending: bool) {
    rows.sort_by(|a, b| {
        let ord = sort_key(a, column).cmp(sort_key(b, column));
        if ascending {
            ord
        } else {
            ord.reverse()
        }
    });
}

async fn insert_book(db: &DbPool, payload: &BookPayload) -> Result<String, ApiError> {
    let id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO books (id, title, author, description, publisher, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&payload.title)
    .bind(&payload.author)
    .bind(&payload.description)
    .bind(&payload.publisher)
    .bind(&now)
    .bind(&now)
    .execute(db)
    .await?;

    Ok(id)
}

/// Create a book
///
/// POST /books
pub async fn create_book(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
    Json(payload): Json<BookPayload>,
) -> Result<(StatusCode, Json<CreateBookResponse>), ApiError> {
    validate_payload(&payload)?;

    let id = insert_book(&state.db, &payload).await?;

    tracing::info!(book_id = %id, title = %payload.title, "Book created");

    Ok((StatusCode::CREATED, Json(CreateBookResponse { id })))
}

/// Insert a batch of books, returning ids in input order
///
/// POST /books/bulkinsert
///
/// Inserts are per-record; there is no enclosing transaction, so a
/// failure partway leaves earlier rows in place.
pub async fn bulk_insert_books(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
    Json(payloads): Json<Vec<BookPayload>>,
) -> Result<(StatusCode, Json<BulkInsertResponse>), ApiError> {
    if payloads.is_empty() {
        return Err(ApiError::validation_field(
            "books",
            "At least one book is required",
        ));
    }

    let mut errors = ValidationErrorBuilder::new();
    for (i, payload) in payloads.iter().enumerate() {
        collect_payload_errors(&mut errors, payload, &format!("books[{}].", i));
    }
    errors.finish()?;

    let mut ids = Vec::with_capacity(payloads.len());
    for payload in &payloads {
        ids.push(insert_book(&state.db, payload).await?);
    }

    tracing::info!(count = ids.len(), "Books bulk inserted");

    Ok((StatusCode::CREATED, Json(BulkInsertResponse { ids })))
}

/// List books with storage-side sort and skip/limit pagination
///
/// GET /books
pub async fn list_books(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
    Query(query): Query<ListBooksQuery>,
) -> Result<Json<BookListResponse>, ApiError> {
    let (column, ascending) = resolve_sort(query.sort_by.as_deref(), query.sort_order.as_deref())?;

    let page = query.page.unwrap_or(1);
    if page == 0 {
        return Err(ApiError::validation_field("page", "page must be at least 1"));
    }
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    if limit == 0 {
        return Err(ApiError::validation_field(
            "limit",
            "limit must be at least 1",
        ));
    }
    // Both values are caller-supplied; the product can exceed i64
    let offset = (i64::from(page) - 1)
        .checked_mul(i64::from(limit))
        .ok_or_else(|| ApiError::validation_field("page", "page is out of range"))?;

    let filter = filter_clause(&query.author, &query.publisher);
    let direction = if ascending { "ASC" } else { "DESC" };

    let rows_sql = format!(
        "SELECT * FROM books{} ORDER BY {} {} LIMIT ? OFFSET ?",
        filter, column, direction
    );
    let mut rows_query = sqlx::query_as::<_, Book>(&rows_sql);
    if let Some(author) = &query.author {
        rows_query = rows_query.bind(author);
    }
    if let Some(publisher) = &query.publisher {
        rows_query = rows_query.bind(publisher);
    }
    let rows = rows_query
        .bind(limit as i64)
        .bind(offset)
        .fetch_all(&state.db)
        .await?;

    let count_sql = format!("SELECT COUNT(*) FROM books{}", filter);
    let mut count_query = sqlx::query_as::<_, (i64,)>(&count_sql);
    if let Some(author) = &query.author {
        count_query = count_query.bind(author);
    }
    if let Some(publisher) = &query.publisher {
        count_query = count_query.bind(publisher);
    }
    let (count,) = count_query.fetch_one(&state.db).await?;

    Ok(Json(BookListResponse { rows, count }))
}

/// List books, sorting in memory after fetching all matching rows
///
/// GET /books/local/sorting
pub async fn list_books_local_sort(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
    Query(query): Query<LocalSortQuery>,
) -> Result<Json<LocalSortResponse>, ApiError> {
    let (column, ascending) = resolve_sort(query.sort_by.as_deref(), query.sort_order.as_deref())?;

    let filter = filter_clause(&query.author, &query.publisher);
    let sql = format!("SELECT * FROM books{}", filter);
    let mut rows_query = sqlx::query_as::<_, Book>(&sql);
    if let Some(author) = &query.author {
        rows_query = rows_query.bind(author);
    }
    if let Some(publisher) = &query.publisher {
        rows_query = rows_query.bind(publisher);
    }
    let mut rows = rows_query.fetch_all(&state.db).await?;

    sort_rows(&mut rows, column, ascending);

    Ok(Json(LocalSortResponse { rows }))
}

/// Get a book by id
///
/// GET /books/:id
///
/// A malformed id and a missing row both answer 400 with the same
/// not-found-class body — the shape existing callers rely on.
pub async fn get_book(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Book>, ApiError> {
    let book: Option<Book> = if validate_uuid(&id, "book_id").is_ok() {
        sqlx::query_as("SELECT * FROM books WHERE id = ?")
            .bind(&id)
            .fetch_optional(&state.db)
            .await?
    } else {
        None
    };

    book.map(Json)
        .ok_or_else(|| ApiError::not_found("Book not found").with_status(StatusCode::BAD_REQUEST))
}

/// Replace a book's four text fields
///
/// PUT /books/:id
pub async fn update_book(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
    Path(id): Path<String>,
    Json(payload): Json<BookPayload>,
) -> Result<Json<MessageResponse>, ApiError> {
    if let Err(e) = validate_uuid(&id, "book_id") {
        return Err(ApiError::validation_field("book_id", e));
    }
    validate_payload(&payload)?;

    let now = chrono::Utc::now().to_rfc3339();
    let result = sqlx::query(
        r#"
        UPDATE books SET
            title = ?,
            author = ?,
            description = ?,
            publisher = ?,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&payload.title)
    .bind(&payload.author)
    .bind(&payload.description)
    .bind(&payload.publisher)
    .bind(&now)
    .bind(&id)
    .execute(&state.db)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Book not found"));
    }

    Ok(Json(MessageResponse::new("Book updated successfully")))
}

/// Delete a book
///
/// DELETE /books/:id
pub async fn delete_book(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    if let Err(e) = validate_uuid(&id, "book_id") {
        return Err(ApiError::validation_field("book_id", e));
    }

    let result = sqlx::query("DELETE FROM books WHERE id = ?")
        .bind(&id)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Book not found"));
    }

    tracing::info!(book_id = %id, "Book deleted");

    Ok(Json(MessageResponse::new("Book deleted successfully")))
}
