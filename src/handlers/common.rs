use crate::{errors::ServiceError, services::Page, ApiResponse, PaginatedResponse};
use axum::{http::StatusCode, Json};
use serde::Serialize;
use uuid::Uuid;

impl<T> From<Page<T>> for PaginatedResponse<T> {
    fn from(page: Page<T>) -> Self {
        let total_pages = page.total_pages();
        Self {
            items: page.items,
            total: page.total,
            page: page.page,
            limit: page.limit,
            total_pages,
        }
    }
}

/// Standard paginated success response
pub fn paginated<T: Serialize>(page: Page<T>) -> Json<ApiResponse<PaginatedResponse<T>>> {
    Json(ApiResponse::success(PaginatedResponse::from(page)))
}

/// Standard created response
pub fn created<T: Serialize>(data: T) -> (StatusCode, Json<ApiResponse<T>>) {
    (StatusCode::CREATED, Json(ApiResponse::success(data)))
}

/// Id of the signed-in user; tokens always carry one but a malformed subject is a 401
pub fn actor_id(user: &crate::auth::AuthUser) -> Result<Uuid, ServiceError> {
    user.id()
        .ok_or_else(|| ServiceError::Unauthorized("token subject is not a user id".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_converts_with_total_pages() {
        let page = Page {
            items: vec![1, 2, 3],
            total: 23,
            page: 2,
            limit: 10,
        };
        let response = PaginatedResponse::from(page);
        assert_eq!(response.total_pages, 3);
        assert_eq!(response.items, vec![1, 2, 3]);
        assert_eq!(response.page, 2);
    }
}
