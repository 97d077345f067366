use anyhow::{bail, Context};
use reqwest::header::LOCATION;
use reqwest::StatusCode;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use reqwest_tracing::TracingMiddleware;

use crate::api::{
    BookDetails, BookDetailsPatch, BookId, BookListRequest, BookPage, BookWithOwner,
    CreateReviewRequest, Identity, ReviewId, ReviewPatch, ReviewWithBook, ReviewWithReviewer,
    UserId, USER_ID_HEADER, USER_NAME_HEADER,
};

pub struct BookReviewClient {
    url: String,
    client: ClientWithMiddleware,
}

/// The caller's identity is attached per request, mirroring how the auth
/// gateway forwards it; the client keeps no ambient credential state.
fn with_identity(builder: RequestBuilder, identity: &Identity) -> RequestBuilder {
    builder
        .header(USER_ID_HEADER, identity.id.to_string())
        .header(USER_NAME_HEADER, identity.name.clone())
}

impl BookReviewClient {
    pub fn new(url: &str) -> anyhow::Result<Self> {
        let reqwest_client = reqwest::Client::builder()
            .build()
            .context("Failed to build reqwest client")?;
        let client = ClientBuilder::new(reqwest_client)
            // Insert the tracing middleware
            .with(TracingMiddleware::default())
            .build();

        Ok(Self {
            url: url.to_string(),
            client,
        })
    }

    pub async fn list_books(&self, request: &BookListRequest) -> anyhow::Result<BookPage> {
        let response = self
            .client
            .get(format!("{}/api/books", self.url))
            .query(request)
            .send()
            .await?;

        if !response.status().is_success() {
            bail!("Failed to list books, status {}", response.status())
        }
        response.json().await.context("Failed to parse book page")
    }

    pub async fn get_book(&self, book_id: BookId) -> anyhow::Result<Option<BookWithOwner>> {
        let response = self
            .client
            .get(format!("{}/api/books/{}", self.url, book_id))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            bail!("Failed to get book, status {}", response.status())
        }
        Ok(Some(response.json().await.context("Failed to parse book")?))
    }

    pub async fn add_book(
        &self,
        identity: &Identity,
        details: BookDetails,
    ) -> anyhow::Result<BookId> {
        let response = with_identity(
            self.client.post(format!("{}/api/books", self.url)),
            identity,
        )
        .json(&details)
        .send()
        .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error: String = response.text().await.unwrap_or_default();
            bail!("Failed to add book, status {} {}", status, error)
        }

        let location_header = response
            .headers()
            .get(LOCATION)
            .context("No location header")?;

        location_header
            .to_str()
            .context("Failed to convert header to str")?
            .strip_prefix("/api/books/")
            .context("Invalid location header")?
            .parse()
            .context("Failed to parse book id")
    }

    pub async fn update_book(
        &self,
        identity: &Identity,
        book_id: BookId,
        patch: BookDetailsPatch,
    ) -> anyhow::Result<BookWithOwner> {
        let response = with_identity(
            self.client.put(format!("{}/api/books/{}", self.url, book_id)),
            identity,
        )
        .json(&patch)
        .send()
        .await?;

        if !response.status().is_success() {
            bail!("Failed to update book, status {}", response.status())
        }
        response.json().await.context("Failed to parse book")
    }

    pub async fn delete_book(&self, identity: &Identity, book_id: BookId) -> anyhow::Result<()> {
        let response = with_identity(
            self.client
                .delete(format!("{}/api/books/{}", self.url, book_id)),
            identity,
        )
        .send()
        .await?;

        if !response.status().is_success() {
            bail!("Failed to delete book, status {}", response.status())
        }
        Ok(())
    }

    pub async fn reviews_for_book(
        &self,
        book_id: BookId,
    ) -> anyhow::Result<Vec<ReviewWithReviewer>> {
        let response = self
            .client
            .get(format!("{}/api/reviews/book/{}", self.url, book_id))
            .send()
            .await?;

        if !response.status().is_success() {
            bail!("Failed to list reviews, status {}", response.status())
        }
        response.json().await.context("Failed to parse reviews")
    }

    pub async fn reviews_by_user(&self, user_id: UserId) -> anyhow::Result<Vec<ReviewWithBook>> {
        let response = self
            .client
            .get(format!("{}/api/reviews/user/{}", self.url, user_id))
            .send()
            .await?;

        if !response.status().is_success() {
            bail!("Failed to list reviews, status {}", response.status())
        }
        response.json().await.context("Failed to parse reviews")
    }

    pub async fn add_review(
        &self,
        identity: &Identity,
        request: CreateReviewRequest,
    ) -> anyhow::Result<ReviewWithReviewer> {
        let response = with_identity(
            self.client.post(format!("{}/api/reviews", self.url)),
            identity,
        )
        .json(&request)
        .send()
        .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error: String = response.text().await.unwrap_or_default();
            bail!("Failed to add review, status {} {}", status, error)
        }
        response.json().await.context("Failed to parse review")
    }

    pub async fn update_review(
        &self,
        identity: &Identity,
        review_id: ReviewId,
        patch: ReviewPatch,
    ) -> anyhow::Result<ReviewWithReviewer> {
        let response = with_identity(
            self.client
                .put(format!("{}/api/reviews/{}", self.url, review_id)),
            identity,
        )
        .json(&patch)
        .send()
        .await?;

        if !response.status().is_success() {
            bail!("Failed to update review, status {}", response.status())
        }
        response.json().await.context("Failed to parse review")
    }

    pub async fn delete_review(
        &self,
        identity: &Identity,
        review_id: ReviewId,
    ) -> anyhow::Result<()> {
        let response = with_identity(
            self.client
                .delete(format!("{}/api/reviews/{}", self.url, review_id)),
            identity,
        )
        .send()
        .await?;

        if !response.status().is_success() {
            bail!("Failed to delete review, status {}", response.status())
        }
        Ok(())
    }
}
