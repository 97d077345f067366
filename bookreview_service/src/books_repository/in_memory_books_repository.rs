use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};

use serde_json::json;

use crate::api::{Book, BookDetails, BookDetailsPatch, BookId, BookQuery, BookSort, UserId};
use crate::books_repository::{BooksRepository, BooksRepositoryError};

#[derive(Default)]
pub struct InMemoryBooksRepository {
    book_sequence_generator: AtomicI32,
    books: parking_lot::RwLock<HashMap<BookId, Book>>,
}

fn matches_query(book: &Book, query: &BookQuery) -> bool {
    if let Some(search) = &query.search {
        let needle = search.to_lowercase();
        if !book.details.title.to_lowercase().contains(&needle)
            && !book.details.author.to_lowercase().contains(&needle)
        {
            return false;
        }
    }
    if let Some(genre) = query.genre {
        if book.details.genre != genre {
            return false;
        }
    }
    true
}

fn sort_books(books: &mut [Book], sort: BookSort) {
    match sort {
        BookSort::Newest => books.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id))),
        BookSort::Year => books.sort_by(|a, b| {
            b.details
                .published_year
                .cmp(&a.details.published_year)
                .then(b.created_at.cmp(&a.created_at))
        }),
        BookSort::Rating => books.sort_by(|a, b| {
            b.average_rating
                .total_cmp(&a.average_rating)
                .then(b.created_at.cmp(&a.created_at))
        }),
    }
}

#[async_trait::async_trait]
impl BooksRepository for InMemoryBooksRepository {
    async fn add_book(
        &self,
        details: BookDetails,
        owner_id: UserId,
    ) -> Result<BookId, BooksRepositoryError> {
        details.validate().map_err(BooksRepositoryError::Validation)?;
        let id = self.book_sequence_generator.fetch_add(1, Ordering::Relaxed);
        let now = chrono::Utc::now().timestamp();
        self.books.write().insert(
            id,
            Book {
                id,
                owner_id,
                details,
                average_rating: 0.0,
                review_count: 0,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn get_book(&self, book_id: BookId) -> Result<Book, BooksRepositoryError> {
        self.books
            .read()
            .get(&book_id)
            .cloned()
            .ok_or(BooksRepositoryError::NotFound(book_id))
    }

    async fn list_books(
        &self,
        query: &BookQuery,
    ) -> Result<(Vec<Book>, u64), BooksRepositoryError> {
        let mut books: Vec<Book> = self
            .books
            .read()
            .values()
            .filter(|book| matches_query(book, query))
            .cloned()
            .collect();

        sort_books(&mut books, query.sort);

        let total = books.len() as u64;
        // Offset arithmetic is done in u64, a huge page number must yield an
        // empty page rather than overflow
        let start = u64::from(query.page() - 1) * u64::from(query.page_size());
        let page: Vec<Book> = books
            .into_iter()
            .skip(usize::try_from(start).unwrap_or(usize::MAX))
            .take(query.page_size() as usize)
            .collect();
        Ok((page, total))
    }

    async fn update_book(
        &self,
        book_id: BookId,
        patch: BookDetailsPatch,
    ) -> Result<Book, BooksRepositoryError> {
        let mut locked_books = self.books.write();
        let book = locked_books
            .get_mut(&book_id)
            .ok_or(BooksRepositoryError::NotFound(book_id))?;

        let mut merged = json!(book.details);
        json_patch::merge(&mut merged, &json!(patch));
        let merged: BookDetails = serde_json::from_value(merged)?;
        merged.validate().map_err(BooksRepositoryError::Validation)?;

        book.details = merged;
        book.updated_at = chrono::Utc::now().timestamp();
        Ok(book.clone())
    }

    async fn delete_book(&self, book_id: BookId) -> Result<(), BooksRepositoryError> {
        self.books
            .write()
            .remove(&book_id)
            .map(|_| ())
            .ok_or(BooksRepositoryError::NotFound(book_id))
    }

    async fn set_rating_aggregate(
        &self,
        book_id: BookId,
        average_rating: f64,
        review_count: u32,
    ) -> Result<(), BooksRepositoryError> {
        let mut locked_books = self.books.write();
        let book = locked_books
            .get_mut(&book_id)
            .ok_or(BooksRepositoryError::NotFound(book_id))?;
        book.average_rating = average_rating;
        book.review_count = review_count;
        Ok(())
    }
}
