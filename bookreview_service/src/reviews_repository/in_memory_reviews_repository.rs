use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};

use serde_json::json;

use crate::api::{BookId, Review, ReviewDetails, ReviewId, ReviewPatch, UserId};
use crate::reviews_repository::{ReviewsRepository, ReviewsRepositoryError};

#[derive(Default)]
pub struct InMemoryReviewsRepository {
    review_sequence_generator: AtomicI32,
    reviews: parking_lot::RwLock<HashMap<ReviewId, Review>>,
}

fn newest_first(reviews: &mut [Review]) {
    reviews.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

#[async_trait::async_trait]
impl ReviewsRepository for InMemoryReviewsRepository {
    async fn add_review(
        &self,
        book_id: BookId,
        user_id: UserId,
        details: ReviewDetails,
    ) -> Result<Review, ReviewsRepositoryError> {
        details
            .validate()
            .map_err(ReviewsRepositoryError::Validation)?;

        // Check and insert under one write lock so two concurrent creates
        // for the same (book, user) pair cannot both get through.
        let mut locked_reviews = self.reviews.write();
        if locked_reviews
            .values()
            .any(|review| review.book_id == book_id && review.user_id == user_id)
        {
            return Err(ReviewsRepositoryError::Duplicate { book_id, user_id });
        }

        let id = self.review_sequence_generator.fetch_add(1, Ordering::Relaxed);
        let now = chrono::Utc::now().timestamp();
        let review = Review {
            id,
            book_id,
            user_id,
            details,
            created_at: now,
            updated_at: now,
        };
        locked_reviews.insert(id, review.clone());
        Ok(review)
    }

    async fn get_review(&self, review_id: ReviewId) -> Result<Review, ReviewsRepositoryError> {
        self.reviews
            .read()
            .get(&review_id)
            .cloned()
            .ok_or(ReviewsRepositoryError::NotFound(review_id))
    }

    async fn list_by_book(&self, book_id: BookId) -> Result<Vec<Review>, ReviewsRepositoryError> {
        let mut reviews: Vec<Review> = self
            .reviews
            .read()
            .values()
            .filter(|review| review.book_id == book_id)
            .cloned()
            .collect();
        newest_first(&mut reviews);
        Ok(reviews)
    }

    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Review>, ReviewsRepositoryError> {
        let mut reviews: Vec<Review> = self
            .reviews
            .read()
            .values()
            .filter(|review| review.user_id == user_id)
            .cloned()
            .collect();
        newest_first(&mut reviews);
        Ok(reviews)
    }

    async fn find_by_book_and_user(
        &self,
        book_id: BookId,
        user_id: UserId,
    ) -> Result<Option<Review>, ReviewsRepositoryError> {
        Ok(self
            .reviews
            .read()
            .values()
            .find(|review| review.book_id == book_id && review.user_id == user_id)
            .cloned())
    }

    async fn update_review(
        &self,
        review_id: ReviewId,
        patch: ReviewPatch,
    ) -> Result<Review, ReviewsRepositoryError> {
        let mut locked_reviews = self.reviews.write();
        let review = locked_reviews
            .get_mut(&review_id)
            .ok_or(ReviewsRepositoryError::NotFound(review_id))?;

        let mut merged = json!(review.details);
        json_patch::merge(&mut merged, &json!(patch));
        let merged: ReviewDetails = serde_json::from_value(merged)?;
        merged
            .validate()
            .map_err(ReviewsRepositoryError::Validation)?;

        review.details = merged;
        review.updated_at = chrono::Utc::now().timestamp();
        Ok(review.clone())
    }

    async fn delete_review(&self, review_id: ReviewId) -> Result<(), ReviewsRepositoryError> {
        self.reviews
            .write()
            .remove(&review_id)
            .map(|_| ())
            .ok_or(ReviewsRepositoryError::NotFound(review_id))
    }
}
