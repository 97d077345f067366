pub use in_memory_books_repository::InMemoryBooksRepository;
pub use postgres_books_repository::{PostgresBooksRepository, PostgresBooksRepositoryConfig};

use crate::api::{Book, BookDetails, BookDetailsPatch, BookId, BookQuery, UserId};

mod in_memory_books_repository;
mod postgres_books_repository;

#[derive(Debug, thiserror::Error)]
pub enum BooksRepositoryError {
    #[error("Book {0} not found")]
    NotFound(BookId),

    #[error("{0}")]
    Validation(String),

    #[error("Failed to deserialize book: {0}")]
    DeserializationError(#[from] serde_json::Error),

    #[error("DatabaseFailure failure {0}")]
    DatabaseFailure(#[from] tokio_postgres::Error),

    #[error("Other error {0}")]
    Other(String),
}

#[async_trait::async_trait]
pub trait BooksRepository: Send + Sync {
    /// Adds a book owned by `owner_id`, returns the id assigned to it.
    /// The rating aggregate starts at 0 average / 0 reviews.
    async fn add_book(
        &self,
        details: BookDetails,
        owner_id: UserId,
    ) -> Result<BookId, BooksRepositoryError>;

    /// Retrieves a single book.
    async fn get_book(&self, book_id: BookId) -> Result<Book, BooksRepositoryError>;

    /// Lists books matching the query, returns the page of books together
    /// with the total number of matches across all pages.
    async fn list_books(&self, query: &BookQuery) -> Result<(Vec<Book>, u64), BooksRepositoryError>;

    /// Applies the patch to the book's details. Fields absent from the patch
    /// are left unchanged; owner and rating aggregate are not patchable.
    async fn update_book(
        &self,
        book_id: BookId,
        patch: BookDetailsPatch,
    ) -> Result<Book, BooksRepositoryError>;

    /// Removes the book. Reviews referencing it are not touched.
    async fn delete_book(&self, book_id: BookId) -> Result<(), BooksRepositoryError>;

    /// Writes the derived rating aggregate. This is the only write path for
    /// `average_rating` / `review_count` and is reserved for the rating
    /// aggregator.
    async fn set_rating_aggregate(
        &self,
        book_id: BookId,
        average_rating: f64,
        review_count: u32,
    ) -> Result<(), BooksRepositoryError>;
}
