use std::sync::Arc;

use actix_web::http::header::LOCATION;
use actix_web::Error;
use actix_web::HttpResponse;
use actix_web::web::Data;
use paperclip::actix::{
    api_v2_operation,
    web::{self},
};

use crate::api::{
    BookDetails, BookDetailsPatch, BookId, BookListRequest, BookPage, BookQuery,
    BookTitleAndAuthor, BookWithOwner, CreateReviewRequest, ErrorMessage, Identity, ReviewDetails,
    ReviewId, ReviewPatch, ReviewWithBook, ReviewWithReviewer, UserId,
};
use crate::auth::UsersDirectory;
use crate::book_workflow::{BookWorkflow, BookWorkflowError};
use crate::review_workflow::{ReviewWorkflow, ReviewWorkflowError};

fn error_body(message: impl ToString) -> ErrorMessage {
    ErrorMessage {
        message: message.to_string(),
    }
}

fn book_error_response(context: &str, err: BookWorkflowError) -> HttpResponse {
    match err {
        BookWorkflowError::NotFound(..) => HttpResponse::NotFound().json(error_body(err)),
        BookWorkflowError::Forbidden(..) => HttpResponse::Forbidden().json(error_body(err)),
        BookWorkflowError::Validation(..) => HttpResponse::BadRequest().json(error_body(err)),
        other => {
            tracing::error!("{} failed {}", context, other);
            HttpResponse::InternalServerError().finish()
        }
    }
}

fn review_error_response(context: &str, err: ReviewWorkflowError) -> HttpResponse {
    match err {
        ReviewWorkflowError::BookNotFound(..) | ReviewWorkflowError::ReviewNotFound(..) => {
            HttpResponse::NotFound().json(error_body(err))
        }
        ReviewWorkflowError::Forbidden(..) => HttpResponse::Forbidden().json(error_body(err)),
        ReviewWorkflowError::AlreadyReviewed { .. } => {
            HttpResponse::Conflict().json(error_body(err))
        }
        ReviewWorkflowError::Validation(..) => HttpResponse::BadRequest().json(error_body(err)),
        other => {
            tracing::error!("{} failed {}", context, other);
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[api_v2_operation]
pub async fn health() -> Result<HttpResponse, Error> {
    Ok(HttpResponse::Ok().finish())
}

#[api_v2_operation]
pub async fn list_books(
    book_workflow: Data<BookWorkflow>,
    users_directory: Data<Arc<UsersDirectory>>,
    request: web::Query<BookListRequest>,
) -> Result<HttpResponse, Error> {
    let query: BookQuery = request.into_inner().into();
    Ok(match book_workflow.list_books(&query).await {
        Ok((books, total_books)) => {
            let page_size = u64::from(query.page_size());
            let total_pages = total_books.div_ceil(page_size) as u32;
            let books = books
                .into_iter()
                .map(|book| BookWithOwner {
                    owner_name: users_directory.display_name(book.owner_id),
                    book,
                })
                .collect();
            HttpResponse::Ok().json(BookPage {
                books,
                page: query.page(),
                total_pages,
                total_books,
            })
        }
        Err(err) => book_error_response("List books", err),
    })
}

#[api_v2_operation]
pub async fn get_book(
    book_workflow: Data<BookWorkflow>,
    users_directory: Data<Arc<UsersDirectory>>,
    book_id: web::Path<BookId>,
) -> Result<HttpResponse, Error> {
    Ok(match book_workflow.get_book(book_id.into_inner()).await {
        Ok(book) => HttpResponse::Ok().json(BookWithOwner {
            owner_name: users_directory.display_name(book.owner_id),
            book,
        }),
        Err(err) => book_error_response("Get book", err),
    })
}

#[api_v2_operation]
pub async fn add_book(
    book_workflow: Data<BookWorkflow>,
    users_directory: Data<Arc<UsersDirectory>>,
    identity: Identity,
    details: web::Json<BookDetails>,
) -> Result<HttpResponse, Error> {
    users_directory.record(&identity);
    Ok(
        match book_workflow
            .create_book(identity.id, details.into_inner())
            .await
        {
            Ok(book) => HttpResponse::Created()
                .append_header((LOCATION, format!("/api/books/{}", book.id)))
                .json(BookWithOwner {
                    owner_name: Some(identity.name),
                    book,
                }),
            Err(err) => book_error_response("Add book", err),
        },
    )
}

#[api_v2_operation]
pub async fn update_book(
    book_workflow: Data<BookWorkflow>,
    users_directory: Data<Arc<UsersDirectory>>,
    identity: Identity,
    book_id: web::Path<BookId>,
    patch: web::Json<BookDetailsPatch>,
) -> Result<HttpResponse, Error> {
    users_directory.record(&identity);
    Ok(
        match book_workflow
            .update_book(book_id.into_inner(), identity.id, patch.into_inner())
            .await
        {
            Ok(book) => HttpResponse::Ok().json(BookWithOwner {
                owner_name: users_directory.display_name(book.owner_id),
                book,
            }),
            Err(err) => book_error_response("Update book", err),
        },
    )
}

#[api_v2_operation]
pub async fn delete_book(
    book_workflow: Data<BookWorkflow>,
    users_directory: Data<Arc<UsersDirectory>>,
    identity: Identity,
    book_id: web::Path<BookId>,
) -> Result<HttpResponse, Error> {
    users_directory.record(&identity);
    Ok(
        match book_workflow
            .delete_book(book_id.into_inner(), identity.id)
            .await
        {
            Ok(()) => HttpResponse::Ok().json(error_body("Book removed")),
            Err(err) => book_error_response("Delete book", err),
        },
    )
}

#[api_v2_operation]
pub async fn list_reviews_for_book(
    review_workflow: Data<ReviewWorkflow>,
    users_directory: Data<Arc<UsersDirectory>>,
    book_id: web::Path<BookId>,
) -> Result<HttpResponse, Error> {
    Ok(
        match review_workflow.reviews_for_book(book_id.into_inner()).await {
            Ok(reviews) => {
                let reviews: Vec<ReviewWithReviewer> = reviews
                    .into_iter()
                    .map(|review| ReviewWithReviewer {
                        reviewer_name: users_directory.display_name(review.user_id),
                        review,
                    })
                    .collect();
                HttpResponse::Ok().json(reviews)
            }
            Err(err) => review_error_response("List reviews for book", err),
        },
    )
}

#[api_v2_operation]
pub async fn list_reviews_by_user(
    review_workflow: Data<ReviewWorkflow>,
    book_workflow: Data<BookWorkflow>,
    user_id: web::Path<UserId>,
) -> Result<HttpResponse, Error> {
    let reviews = match review_workflow.reviews_by_user(user_id.into_inner()).await {
        Ok(reviews) => reviews,
        Err(err) => return Ok(review_error_response("List reviews by user", err)),
    };

    let mut joined = Vec::with_capacity(reviews.len());
    for review in reviews {
        // Orphaned reviews (book deleted) are returned without a book summary
        let book = match book_workflow.get_book(review.book_id).await {
            Ok(book) => Some(BookTitleAndAuthor {
                book_id: book.id,
                title: book.details.title,
                author: book.details.author,
            }),
            Err(BookWorkflowError::NotFound(..)) => None,
            Err(err) => return Ok(book_error_response("List reviews by user", err)),
        };
        joined.push(ReviewWithBook { review, book });
    }
    Ok(HttpResponse::Ok().json(joined))
}

#[api_v2_operation]
pub async fn add_review(
    review_workflow: Data<ReviewWorkflow>,
    users_directory: Data<Arc<UsersDirectory>>,
    identity: Identity,
    request: web::Json<CreateReviewRequest>,
) -> Result<HttpResponse, Error> {
    users_directory.record(&identity);
    let request = request.into_inner();
    let details = ReviewDetails {
        rating: request.rating,
        review_text: request.review_text,
    };
    Ok(
        match review_workflow
            .create_review(request.book_id, identity.id, details)
            .await
        {
            Ok(review) => HttpResponse::Created().json(ReviewWithReviewer {
                review,
                reviewer_name: Some(identity.name),
            }),
            Err(err) => review_error_response("Add review", err),
        },
    )
}

#[api_v2_operation]
pub async fn update_review(
    review_workflow: Data<ReviewWorkflow>,
    users_directory: Data<Arc<UsersDirectory>>,
    identity: Identity,
    review_id: web::Path<ReviewId>,
    patch: web::Json<ReviewPatch>,
) -> Result<HttpResponse, Error> {
    users_directory.record(&identity);
    Ok(
        match review_workflow
            .update_review(review_id.into_inner(), identity.id, patch.into_inner())
            .await
        {
            Ok(review) => HttpResponse::Ok().json(ReviewWithReviewer {
                reviewer_name: users_directory.display_name(review.user_id),
                review,
            }),
            Err(err) => review_error_response("Update review", err),
        },
    )
}

#[api_v2_operation]
pub async fn delete_review(
    review_workflow: Data<ReviewWorkflow>,
    users_directory: Data<Arc<UsersDirectory>>,
    identity: Identity,
    review_id: web::Path<ReviewId>,
) -> Result<HttpResponse, Error> {
    users_directory.record(&identity);
    Ok(
        match review_workflow
            .delete_review(review_id.into_inner(), identity.id)
            .await
        {
            Ok(()) => HttpResponse::Ok().json(error_body("Review removed")),
            Err(err) => review_error_response("Delete review", err),
        },
    )
}
