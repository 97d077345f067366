use std::sync::Arc;

use crate::api::{BookId, Review, ReviewDetails, ReviewId, ReviewPatch, UserId};
use crate::books_repository::{BooksRepository, BooksRepositoryError};
use crate::rating_aggregator::{RatingAggregator, RecomputeError};
use crate::reviews_repository::{ReviewsRepository, ReviewsRepositoryError};

#[derive(Debug, thiserror::Error)]
pub enum ReviewWorkflowError {
    #[error("Book {0} not found")]
    BookNotFound(BookId),

    #[error("Review {0} not found")]
    ReviewNotFound(ReviewId),

    #[error("Not authorized to modify review {0}")]
    Forbidden(ReviewId),

    #[error("User {user_id} has already reviewed book {book_id}")]
    AlreadyReviewed { book_id: BookId, user_id: UserId },

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Recompute(#[from] RecomputeError),

    #[error(transparent)]
    BooksRepository(BooksRepositoryError),

    #[error(transparent)]
    ReviewsRepository(ReviewsRepositoryError),
}

fn map_reviews_error(err: ReviewsRepositoryError) -> ReviewWorkflowError {
    match err {
        ReviewsRepositoryError::NotFound(id) => ReviewWorkflowError::ReviewNotFound(id),
        ReviewsRepositoryError::Duplicate { book_id, user_id } => {
            ReviewWorkflowError::AlreadyReviewed { book_id, user_id }
        }
        ReviewsRepositoryError::Validation(message) => ReviewWorkflowError::Validation(message),
        other => ReviewWorkflowError::ReviewsRepository(other),
    }
}

/// Orchestrates review mutations: book existence and the
/// one-review-per-user-per-book rule on create, authorship on update and
/// delete, and a rating recompute after every state change.
#[derive(Clone)]
pub struct ReviewWorkflow {
    reviews: Arc<dyn ReviewsRepository>,
    books: Arc<dyn BooksRepository>,
    aggregator: RatingAggregator,
}

impl ReviewWorkflow {
    pub fn new(
        reviews: Arc<dyn ReviewsRepository>,
        books: Arc<dyn BooksRepository>,
        aggregator: RatingAggregator,
    ) -> Self {
        Self {
            reviews,
            books,
            aggregator,
        }
    }

    pub async fn create_review(
        &self,
        book_id: BookId,
        requester_id: UserId,
        details: ReviewDetails,
    ) -> Result<Review, ReviewWorkflowError> {
        match self.books.get_book(book_id).await {
            Ok(_) => {}
            Err(BooksRepositoryError::NotFound(id)) => {
                return Err(ReviewWorkflowError::BookNotFound(id))
            }
            Err(err) => return Err(ReviewWorkflowError::BooksRepository(err)),
        }

        // Pre-check for a friendly error; the store's uniqueness guard is
        // what actually decides races between concurrent creates.
        if self
            .reviews
            .find_by_book_and_user(book_id, requester_id)
            .await
            .map_err(map_reviews_error)?
            .is_some()
        {
            return Err(ReviewWorkflowError::AlreadyReviewed {
                book_id,
                user_id: requester_id,
            });
        }

        let review = self
            .reviews
            .add_review(book_id, requester_id, details)
            .await
            .map_err(map_reviews_error)?;

        self.recompute(book_id).await?;
        Ok(review)
    }

    pub async fn update_review(
        &self,
        review_id: ReviewId,
        requester_id: UserId,
        patch: ReviewPatch,
    ) -> Result<Review, ReviewWorkflowError> {
        let review = self
            .reviews
            .get_review(review_id)
            .await
            .map_err(map_reviews_error)?;
        if review.user_id != requester_id {
            return Err(ReviewWorkflowError::Forbidden(review_id));
        }

        let updated = self
            .reviews
            .update_review(review_id, patch)
            .await
            .map_err(map_reviews_error)?;

        self.recompute(updated.book_id).await?;
        Ok(updated)
    }

    pub async fn delete_review(
        &self,
        review_id: ReviewId,
        requester_id: UserId,
    ) -> Result<(), ReviewWorkflowError> {
        let review = self
            .reviews
            .get_review(review_id)
            .await
            .map_err(map_reviews_error)?;
        if review.user_id != requester_id {
            return Err(ReviewWorkflowError::Forbidden(review_id));
        }

        // The book id must be captured before the delete, it is gone afterwards.
        let book_id = review.book_id;
        self.reviews
            .delete_review(review_id)
            .await
            .map_err(map_reviews_error)?;

        self.recompute(book_id).await
    }

    pub async fn reviews_for_book(
        &self,
        book_id: BookId,
    ) -> Result<Vec<Review>, ReviewWorkflowError> {
        self.reviews
            .list_by_book(book_id)
            .await
            .map_err(map_reviews_error)
    }

    pub async fn reviews_by_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Review>, ReviewWorkflowError> {
        self.reviews
            .list_by_user(user_id)
            .await
            .map_err(map_reviews_error)
    }

    /// A failed recompute leaves the stored aggregate stale until the next
    /// successful one, so it is surfaced to the caller rather than swallowed.
    async fn recompute(&self, book_id: BookId) -> Result<(), ReviewWorkflowError> {
        self.aggregator.recompute(book_id).await.map_err(|err| {
            tracing::error!("Failed to recompute rating for book {}: {}", book_id, err);
            ReviewWorkflowError::Recompute(err)
        })
    }
}

#[cfg(test)]
mod review_workflow_tests {
    use std::sync::Arc;

    use crate::api::{BookDetails, Genre, ReviewDetails, ReviewPatch};
    use crate::books_repository::{BooksRepository, InMemoryBooksRepository};
    use crate::rating_aggregator::RatingAggregator;
    use crate::review_workflow::{ReviewWorkflow, ReviewWorkflowError};
    use crate::reviews_repository::InMemoryReviewsRepository;

    struct Fixture {
        books: Arc<InMemoryBooksRepository>,
        workflow: ReviewWorkflow,
    }

    async fn fixture_with_book() -> (Fixture, crate::api::BookId) {
        let books = Arc::new(InMemoryBooksRepository::default());
        let reviews = Arc::new(InMemoryReviewsRepository::default());
        let aggregator = RatingAggregator::new(books.clone(), reviews.clone());
        let workflow = ReviewWorkflow::new(reviews, books.clone(), aggregator);

        let book_id = books
            .add_book(
                BookDetails {
                    title: "Dune".to_string(),
                    author: "Frank Herbert".to_string(),
                    description: "Spice".to_string(),
                    genre: Genre::ScienceFiction,
                    published_year: 1965,
                },
                1,
            )
            .await
            .unwrap();
        (Fixture { books, workflow }, book_id)
    }

    fn review_details(rating: i32) -> ReviewDetails {
        ReviewDetails {
            rating,
            review_text: "text".to_string(),
        }
    }

    #[tokio::test]
    /// Walks the aggregate through the full review lifecycle:
    /// 0 reviews -> 0/0, add 4 -> 4.0/1, add 5 -> 4.5/2,
    /// delete the 4 -> 5.0/1, delete the last -> 0/0
    async fn test_aggregate_follows_review_lifecycle() {
        let (fixture, book_id) = fixture_with_book().await;

        let book = fixture.books.get_book(book_id).await.unwrap();
        assert_eq!((book.average_rating, book.review_count), (0.0, 0));

        let first = fixture
            .workflow
            .create_review(book_id, 10, review_details(4))
            .await
            .unwrap();
        let book = fixture.books.get_book(book_id).await.unwrap();
        assert_eq!((book.average_rating, book.review_count), (4.0, 1));

        let second = fixture
            .workflow
            .create_review(book_id, 11, review_details(5))
            .await
            .unwrap();
        let book = fixture.books.get_book(book_id).await.unwrap();
        assert_eq!((book.average_rating, book.review_count), (4.5, 2));

        fixture.workflow.delete_review(first.id, 10).await.unwrap();
        let book = fixture.books.get_book(book_id).await.unwrap();
        assert_eq!((book.average_rating, book.review_count), (5.0, 1));

        fixture.workflow.delete_review(second.id, 11).await.unwrap();
        let book = fixture.books.get_book(book_id).await.unwrap();
        assert_eq!((book.average_rating, book.review_count), (0.0, 0));
    }

    #[tokio::test]
    /// A second review by the same user is rejected and changes nothing;
    /// updating the review recomputes the aggregate
    async fn test_duplicate_rejected_and_update_recomputes() {
        let (fixture, book_id) = fixture_with_book().await;

        let review = fixture
            .workflow
            .create_review(book_id, 10, review_details(3))
            .await
            .unwrap();

        let duplicate = fixture
            .workflow
            .create_review(book_id, 10, review_details(1))
            .await;
        assert!(matches!(
            duplicate,
            Err(ReviewWorkflowError::AlreadyReviewed { user_id: 10, .. })
        ));
        let book = fixture.books.get_book(book_id).await.unwrap();
        assert_eq!((book.average_rating, book.review_count), (3.0, 1));

        let updated = fixture
            .workflow
            .update_review(
                review.id,
                10,
                ReviewPatch {
                    rating: Some(5),
                    ..ReviewPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.details.rating, 5);
        let book = fixture.books.get_book(book_id).await.unwrap();
        assert_eq!((book.average_rating, book.review_count), (5.0, 1));
    }

    #[tokio::test]
    /// Reviewing a missing book fails with BookNotFound
    async fn test_create_review_for_missing_book() {
        let (fixture, _) = fixture_with_book().await;
        let result = fixture
            .workflow
            .create_review(9999, 10, review_details(4))
            .await;
        assert!(matches!(
            result,
            Err(ReviewWorkflowError::BookNotFound(9999))
        ));
    }

    #[tokio::test]
    /// Only the author may update or delete a review, rejected mutations
    /// leave both review and aggregate untouched
    async fn test_review_authorization() {
        let (fixture, book_id) = fixture_with_book().await;

        let review = fixture
            .workflow
            .create_review(book_id, 10, review_details(4))
            .await
            .unwrap();

        let update_by_stranger = fixture
            .workflow
            .update_review(
                review.id,
                11,
                ReviewPatch {
                    rating: Some(1),
                    ..ReviewPatch::default()
                },
            )
            .await;
        assert!(matches!(
            update_by_stranger,
            Err(ReviewWorkflowError::Forbidden(..))
        ));

        let delete_by_stranger = fixture.workflow.delete_review(review.id, 11).await;
        assert!(matches!(
            delete_by_stranger,
            Err(ReviewWorkflowError::Forbidden(..))
        ));

        let book = fixture.books.get_book(book_id).await.unwrap();
        assert_eq!((book.average_rating, book.review_count), (4.0, 1));
        let reviews = fixture.workflow.reviews_for_book(book_id).await.unwrap();
        assert_eq!(reviews, vec![review.clone()]);

        // Authorship survives an authorized update
        let updated = fixture
            .workflow
            .update_review(
                review.id,
                10,
                ReviewPatch {
                    review_text: Some("Changed my mind".to_string()),
                    ..ReviewPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.user_id, 10);
        assert_eq!(updated.book_id, book_id);

        let missing_update = fixture
            .workflow
            .update_review(9999, 10, ReviewPatch::default())
            .await;
        assert!(matches!(
            missing_update,
            Err(ReviewWorkflowError::ReviewNotFound(..))
        ));
        let missing_delete = fixture.workflow.delete_review(9999, 10).await;
        assert!(matches!(
            missing_delete,
            Err(ReviewWorkflowError::ReviewNotFound(..))
        ));
    }

    #[tokio::test]
    /// Reviews of a deleted book stay readable and deletable (orphan-tolerant)
    async fn test_orphaned_review_can_still_be_deleted() {
        let (fixture, book_id) = fixture_with_book().await;

        let review = fixture
            .workflow
            .create_review(book_id, 10, review_details(4))
            .await
            .unwrap();
        fixture.books.delete_book(book_id).await.unwrap();

        let orphans = fixture.workflow.reviews_by_user(10).await.unwrap();
        assert_eq!(orphans, vec![review.clone()]);

        // Delete recomputes against the missing book without failing
        fixture.workflow.delete_review(review.id, 10).await.unwrap();
        assert!(fixture.workflow.reviews_by_user(10).await.unwrap().is_empty());
    }
}
