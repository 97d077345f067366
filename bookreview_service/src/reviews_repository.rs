pub use in_memory_reviews_repository::InMemoryReviewsRepository;
pub use postgres_reviews_repository::{
    PostgresReviewsRepository, PostgresReviewsRepositoryConfig,
};

use crate::api::{BookId, Review, ReviewDetails, ReviewId, ReviewPatch, UserId};

mod in_memory_reviews_repository;
mod postgres_reviews_repository;

#[derive(Debug, thiserror::Error)]
pub enum ReviewsRepositoryError {
    #[error("Review {0} not found")]
    NotFound(ReviewId),

    #[error("User {user_id} has already reviewed book {book_id}")]
    Duplicate { book_id: BookId, user_id: UserId },

    #[error("{0}")]
    Validation(String),

    #[error("Failed to deserialize review: {0}")]
    DeserializationError(#[from] serde_json::Error),

    #[error("DatabaseFailure failure {0}")]
    DatabaseFailure(#[from] tokio_postgres::Error),

    #[error("Other error {0}")]
    Other(String),
}

/// Store for reviews. Uniqueness of (book_id, user_id) is enforced here,
/// atomically, so concurrent duplicate creates degrade into the same
/// `Duplicate` error as the workflow's pre-check.
#[async_trait::async_trait]
pub trait ReviewsRepository: Send + Sync {
    async fn add_review(
        &self,
        book_id: BookId,
        user_id: UserId,
        details: ReviewDetails,
    ) -> Result<Review, ReviewsRepositoryError>;

    async fn get_review(&self, review_id: ReviewId) -> Result<Review, ReviewsRepositoryError>;

    /// All reviews of a book, newest first.
    async fn list_by_book(&self, book_id: BookId) -> Result<Vec<Review>, ReviewsRepositoryError>;

    /// All reviews written by a user, newest first.
    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Review>, ReviewsRepositoryError>;

    async fn find_by_book_and_user(
        &self,
        book_id: BookId,
        user_id: UserId,
    ) -> Result<Option<Review>, ReviewsRepositoryError>;

    /// Applies the patch; fields absent from the patch are left unchanged.
    /// book_id and user_id are immutable.
    async fn update_review(
        &self,
        review_id: ReviewId,
        patch: ReviewPatch,
    ) -> Result<Review, ReviewsRepositoryError>;

    async fn delete_review(&self, review_id: ReviewId) -> Result<(), ReviewsRepositoryError>;
}
