use std::sync::Arc;

use crate::api::{Book, BookDetails, BookDetailsPatch, BookId, BookQuery, UserId};
use crate::books_repository::{BooksRepository, BooksRepositoryError};

#[derive(Debug, thiserror::Error)]
pub enum BookWorkflowError {
    #[error("Book {0} not found")]
    NotFound(BookId),

    #[error("Not authorized to modify book {0}")]
    Forbidden(BookId),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Repository(BooksRepositoryError),
}

fn map_books_error(err: BooksRepositoryError) -> BookWorkflowError {
    match err {
        BooksRepositoryError::NotFound(id) => BookWorkflowError::NotFound(id),
        BooksRepositoryError::Validation(message) => BookWorkflowError::Validation(message),
        other => BookWorkflowError::Repository(other),
    }
}

/// Orchestrates book mutations: validation is delegated to the store,
/// ownership is checked here. Only the owner may update or delete a book,
/// and neither owner nor the rating aggregate can be changed through any
/// of these operations.
#[derive(Clone)]
pub struct BookWorkflow {
    books: Arc<dyn BooksRepository>,
}

impl BookWorkflow {
    pub fn new(books: Arc<dyn BooksRepository>) -> Self {
        Self { books }
    }

    pub async fn create_book(
        &self,
        requester_id: UserId,
        details: BookDetails,
    ) -> Result<Book, BookWorkflowError> {
        let book_id = self
            .books
            .add_book(details, requester_id)
            .await
            .map_err(map_books_error)?;
        self.books.get_book(book_id).await.map_err(map_books_error)
    }

    pub async fn get_book(&self, book_id: BookId) -> Result<Book, BookWorkflowError> {
        self.books.get_book(book_id).await.map_err(map_books_error)
    }

    pub async fn list_books(
        &self,
        query: &BookQuery,
    ) -> Result<(Vec<Book>, u64), BookWorkflowError> {
        self.books.list_books(query).await.map_err(map_books_error)
    }

    pub async fn update_book(
        &self,
        book_id: BookId,
        requester_id: UserId,
        patch: BookDetailsPatch,
    ) -> Result<Book, BookWorkflowError> {
        let book = self.books.get_book(book_id).await.map_err(map_books_error)?;
        if book.owner_id != requester_id {
            return Err(BookWorkflowError::Forbidden(book_id));
        }
        self.books
            .update_book(book_id, patch)
            .await
            .map_err(map_books_error)
    }

    /// Deletes the book only; its reviews are left in place and surfaced as
    /// orphans by the review read paths.
    pub async fn delete_book(
        &self,
        book_id: BookId,
        requester_id: UserId,
    ) -> Result<(), BookWorkflowError> {
        let book = self.books.get_book(book_id).await.map_err(map_books_error)?;
        if book.owner_id != requester_id {
            return Err(BookWorkflowError::Forbidden(book_id));
        }
        self.books
            .delete_book(book_id)
            .await
            .map_err(map_books_error)
    }
}

#[cfg(test)]
mod book_workflow_tests {
    use std::sync::Arc;

    use crate::api::{BookDetails, BookDetailsPatch, Genre};
    use crate::book_workflow::{BookWorkflow, BookWorkflowError};
    use crate::books_repository::InMemoryBooksRepository;

    fn workflow() -> BookWorkflow {
        BookWorkflow::new(Arc::new(InMemoryBooksRepository::default()))
    }

    fn book_details() -> BookDetails {
        BookDetails {
            title: "Dune".to_string(),
            author: "Frank Herbert".to_string(),
            description: "Spice".to_string(),
            genre: Genre::ScienceFiction,
            published_year: 1965,
        }
    }

    #[tokio::test]
    /// Creating sets the requester as owner and zeroes the aggregate
    async fn test_create_book_sets_owner() {
        let workflow = workflow();
        let book = workflow.create_book(42, book_details()).await.unwrap();
        assert_eq!(book.owner_id, 42);
        assert_eq!(book.average_rating, 0.0);
        assert_eq!(book.review_count, 0);

        let result = workflow
            .create_book(
                42,
                BookDetails {
                    title: "".to_string(),
                    ..book_details()
                },
            )
            .await;
        assert!(matches!(result, Err(BookWorkflowError::Validation(..))));
    }

    #[tokio::test]
    /// Only the owner may update, and a rejected update changes nothing
    async fn test_update_book_ownership() {
        let workflow = workflow();
        let book = workflow.create_book(1, book_details()).await.unwrap();

        let patch = BookDetailsPatch {
            title: Some("Hijacked".to_string()),
            ..BookDetailsPatch::default()
        };
        let result = workflow.update_book(book.id, 2, patch.clone()).await;
        assert!(matches!(result, Err(BookWorkflowError::Forbidden(..))));
        assert_eq!(
            workflow.get_book(book.id).await.unwrap().details.title,
            "Dune"
        );

        let updated = workflow.update_book(book.id, 1, patch).await.unwrap();
        assert_eq!(updated.details.title, "Hijacked");
        // Ownership is immutable through updates
        assert_eq!(updated.owner_id, 1);

        let missing = workflow
            .update_book(9999, 1, BookDetailsPatch::default())
            .await;
        assert!(matches!(missing, Err(BookWorkflowError::NotFound(..))));
    }

    #[tokio::test]
    /// Only the owner may delete
    async fn test_delete_book_ownership() {
        let workflow = workflow();
        let book = workflow.create_book(1, book_details()).await.unwrap();

        let result = workflow.delete_book(book.id, 2).await;
        assert!(matches!(result, Err(BookWorkflowError::Forbidden(..))));
        assert!(workflow.get_book(book.id).await.is_ok());

        workflow.delete_book(book.id, 1).await.unwrap();
        assert!(matches!(
            workflow.get_book(book.id).await,
            Err(BookWorkflowError::NotFound(..))
        ));

        let missing = workflow.delete_book(book.id, 1).await;
        assert!(matches!(missing, Err(BookWorkflowError::NotFound(..))));
    }
}
