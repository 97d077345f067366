use std::collections::HashMap;
use std::sync::Arc;

use crate::api::{BookId, Review};
use crate::books_repository::{BooksRepository, BooksRepositoryError};
use crate::reviews_repository::{ReviewsRepository, ReviewsRepositoryError};

#[derive(Debug, thiserror::Error)]
pub enum RecomputeError {
    #[error(transparent)]
    Books(#[from] BooksRepositoryError),

    #[error(transparent)]
    Reviews(#[from] ReviewsRepositoryError),
}

/// Recomputes a book's rating aggregate from its full review set and writes
/// it back. This is the only writer of `average_rating` / `review_count`.
///
/// Recomputes for the same book are serialized through a per-book mutex, and
/// every recompute re-reads the complete current review set, so overlapping
/// review mutations can at worst persist an older complete snapshot, never a
/// partially applied one.
#[derive(Clone)]
pub struct RatingAggregator {
    books: Arc<dyn BooksRepository>,
    reviews: Arc<dyn ReviewsRepository>,
    book_locks: Arc<parking_lot::Mutex<HashMap<BookId, Arc<tokio::sync::Mutex<()>>>>>,
}

/// Average of the ratings rounded half-up to one decimal, together with the
/// review count. An empty review set yields (0.0, 0).
fn aggregate(reviews: &[Review]) -> (f64, u32) {
    if reviews.is_empty() {
        return (0.0, 0);
    }
    let sum: i64 = reviews
        .iter()
        .map(|review| i64::from(review.details.rating))
        .sum();
    // Scale before dividing so .x5 averages round up instead of drowning in
    // float representation error.
    let average_rating = ((sum * 10) as f64 / reviews.len() as f64).round() / 10.0;
    (average_rating, reviews.len() as u32)
}

impl RatingAggregator {
    pub fn new(books: Arc<dyn BooksRepository>, reviews: Arc<dyn ReviewsRepository>) -> Self {
        Self {
            books,
            reviews,
            book_locks: Arc::new(parking_lot::Mutex::new(HashMap::new())),
        }
    }

    fn lock_for_book(&self, book_id: BookId) -> Arc<tokio::sync::Mutex<()>> {
        self.book_locks
            .lock()
            .entry(book_id)
            .or_default()
            .clone()
    }

    /// Drops the book's lock entry once no other recompute holds it, so the
    /// map does not keep an entry for every book id ever recomputed.
    fn release_idle_lock(&self, book_id: BookId, book_lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.book_locks.lock();
        if let Some(entry) = locks.get(&book_id) {
            // Two holders are the map entry and our own clone; any more mean
            // a concurrent recompute is still using it.
            if Arc::ptr_eq(entry, book_lock) && Arc::strong_count(entry) == 2 {
                locks.remove(&book_id);
            }
        }
    }

    #[cfg(test)]
    fn tracked_lock_count(&self) -> usize {
        self.book_locks.lock().len()
    }

    /// Recomputes and writes back the aggregate for `book_id`. Idempotent:
    /// repeated calls without intervening review mutations produce the same
    /// values. A book deleted while its reviews are being aggregated is
    /// skipped, the reviews are orphaned and no longer have an aggregate to
    /// maintain.
    pub async fn recompute(&self, book_id: BookId) -> Result<(), RecomputeError> {
        let book_lock = self.lock_for_book(book_id);
        let result = {
            let _guard = book_lock.lock().await;
            self.recompute_locked(book_id).await
        };
        self.release_idle_lock(book_id, &book_lock);
        result
    }

    async fn recompute_locked(&self, book_id: BookId) -> Result<(), RecomputeError> {
        let reviews = self.reviews.list_by_book(book_id).await?;
        let (average_rating, review_count) = aggregate(&reviews);
        tracing::debug!(
            "Recomputed aggregate for book {}: average {} over {} reviews",
            book_id,
            average_rating,
            review_count
        );

        match self
            .books
            .set_rating_aggregate(book_id, average_rating, review_count)
            .await
        {
            Ok(()) => Ok(()),
            Err(BooksRepositoryError::NotFound(id)) => {
                tracing::warn!("Skipping aggregate write-back, book {} no longer exists", id);
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}
