use chrono::Datelike;
use paperclip::actix::{Apiv2Schema, Apiv2Security};
use serde::{Deserialize, Serialize};

pub type BookId = i32;
pub type ReviewId = i32;
pub type UserId = i32;

/// Headers set by the auth gateway in front of the service.
pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_NAME_HEADER: &str = "x-user-name";

pub const MIN_PUBLISHED_YEAR: i32 = 1000;
pub const MAX_TITLE_LENGTH: usize = 200;
pub const MAX_AUTHOR_LENGTH: usize = 100;
pub const MAX_DESCRIPTION_LENGTH: usize = 2000;

pub const MIN_RATING: i32 = 1;
pub const MAX_RATING: i32 = 5;

pub const DEFAULT_PAGE_SIZE: u32 = 5;

/// Authenticated user identity forwarded by the gateway.
/// Carried per request, never stored in process-wide state.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Security)]
#[openapi(
    apiKey,
    alias = "GatewayIdentity",
    in = "header",
    name = "x-user-id",
    description = "User identity forwarded by the authentication gateway"
)]
pub struct Identity {
    pub id: UserId,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash, Apiv2Schema)]
pub enum Genre {
    Fiction,
    #[serde(rename = "Non-Fiction")]
    NonFiction,
    #[serde(rename = "Science Fiction")]
    ScienceFiction,
    Fantasy,
    Mystery,
    Thriller,
    Romance,
    Horror,
    Biography,
    History,
    #[serde(rename = "Self-Help")]
    SelfHelp,
    Poetry,
    Other,
}

impl Genre {
    /// Matches the serde representation, used for database queries.
    pub fn as_str(&self) -> &'static str {
        match self {
            Genre::Fiction => "Fiction",
            Genre::NonFiction => "Non-Fiction",
            Genre::ScienceFiction => "Science Fiction",
            Genre::Fantasy => "Fantasy",
            Genre::Mystery => "Mystery",
            Genre::Thriller => "Thriller",
            Genre::Romance => "Romance",
            Genre::Horror => "Horror",
            Genre::Biography => "Biography",
            Genre::History => "History",
            Genre::SelfHelp => "Self-Help",
            Genre::Poetry => "Poetry",
            Genre::Other => "Other",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Apiv2Schema)]
pub struct BookDetails {
    pub title: String,
    pub author: String,
    pub description: String,
    pub genre: Genre,
    pub published_year: i32,
}

impl BookDetails {
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("Title is required".to_string());
        }
        if self.title.len() > MAX_TITLE_LENGTH {
            return Err(format!("Title must be at most {MAX_TITLE_LENGTH} characters"));
        }
        if self.author.trim().is_empty() {
            return Err("Author is required".to_string());
        }
        if self.author.len() > MAX_AUTHOR_LENGTH {
            return Err(format!("Author must be at most {MAX_AUTHOR_LENGTH} characters"));
        }
        if self.description.trim().is_empty() {
            return Err("Description is required".to_string());
        }
        if self.description.len() > MAX_DESCRIPTION_LENGTH {
            return Err(format!(
                "Description must be at most {MAX_DESCRIPTION_LENGTH} characters"
            ));
        }
        let current_year = chrono::Utc::now().year();
        if self.published_year < MIN_PUBLISHED_YEAR || self.published_year > current_year {
            return Err(format!(
                "Published year must be between {MIN_PUBLISHED_YEAR} and {current_year}"
            ));
        }
        Ok(())
    }
}

/// Partial update of book details. `None` means "leave unchanged",
/// so empty strings and other zero-like values can be set explicitly.
/// Owner and rating aggregate are not part of the patch and cannot be
/// changed through this type at all.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Apiv2Schema)]
pub struct BookDetailsPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genre: Option<Genre>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_year: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Apiv2Schema)]
pub struct Book {
    pub id: BookId,
    pub owner_id: UserId,
    pub details: BookDetails,
    /// Derived from the book's reviews, writable only by the rating aggregator.
    pub average_rating: f64,
    /// Derived from the book's reviews, writable only by the rating aggregator.
    pub review_count: u32,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Apiv2Schema)]
pub struct ReviewDetails {
    pub rating: i32,
    pub review_text: String,
}

impl ReviewDetails {
    pub fn validate(&self) -> Result<(), String> {
        if self.rating < MIN_RATING || self.rating > MAX_RATING {
            return Err(format!(
                "Rating must be between {MIN_RATING} and {MAX_RATING}"
            ));
        }
        if self.review_text.trim().is_empty() {
            return Err("Review text is required".to_string());
        }
        Ok(())
    }
}

/// Partial update of a review, same presence semantics as [`BookDetailsPatch`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Apiv2Schema)]
pub struct ReviewPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Apiv2Schema)]
pub struct Review {
    pub id: ReviewId,
    pub book_id: BookId,
    pub user_id: UserId,
    pub details: ReviewDetails,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
#[serde(rename_all = "lowercase")]
pub enum BookSort {
    /// Most recently added first.
    #[default]
    Newest,
    /// Published year, descending.
    Year,
    /// Average rating, descending.
    Rating,
}

/// Listing parameters accepted by the book store.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Apiv2Schema)]
pub struct BookQuery {
    /// Case-insensitive substring match against title or author.
    pub search: Option<String>,
    pub genre: Option<Genre>,
    #[serde(default)]
    pub sort: BookSort,
    /// 1-based page number.
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl BookQuery {
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn page_size(&self) -> u32 {
        self.page_size.unwrap_or(DEFAULT_PAGE_SIZE).max(1)
    }
}

/// Query string shape of `GET /api/books`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Apiv2Schema)]
pub struct BookListRequest {
    pub search: Option<String>,
    pub genre: Option<Genre>,
    pub sort_by: Option<BookSort>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl From<BookListRequest> for BookQuery {
    fn from(request: BookListRequest) -> Self {
        BookQuery {
            search: request.search,
            genre: request.genre,
            sort: request.sort_by.unwrap_or_default(),
            page: request.page,
            page_size: request.limit,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Apiv2Schema)]
pub struct BookWithOwner {
    pub book: Book,
    pub owner_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Apiv2Schema)]
pub struct BookPage {
    pub books: Vec<BookWithOwner>,
    pub page: u32,
    pub total_pages: u32,
    pub total_books: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Apiv2Schema)]
pub struct CreateReviewRequest {
    pub book_id: BookId,
    pub rating: i32,
    pub review_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Apiv2Schema)]
pub struct ReviewWithReviewer {
    pub review: Review,
    pub reviewer_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct BookTitleAndAuthor {
    pub book_id: BookId,
    pub title: String,
    pub author: String,
}

/// A review joined with a summary of its book; the summary is absent
/// when the book has been deleted and the review is orphaned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Apiv2Schema)]
pub struct ReviewWithBook {
    pub review: Review,
    pub book: Option<BookTitleAndAuthor>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct ErrorMessage {
    pub message: String,
}
