use chrono::Utc;
use sea_orm::{
    sea_query::{Expr, Func},
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, IntoActiveModel, PaginatorTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::password::hash_password,
    db::DbPool,
    entities::{inquiry, push_subscription, user, UserRole},
    errors::ServiceError,
    services::{like_pattern, page_bounds, Page},
    unify::normalize_email,
};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8, max = 200))]
    pub password: String,
    pub role: UserRole,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateUserRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(min = 8, max = 200))]
    pub password: Option<String>,
    pub role: Option<UserRole>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserFilter {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub role: Option<UserRole>,
    pub search: Option<String>,
}

fn staff_email(raw: &str) -> Result<String, ServiceError> {
    normalize_email(raw).ok_or_else(|| ServiceError::ValidationError(format!("invalid email '{}'", raw)))
}

#[derive(Clone)]
pub struct UserService {
    db_pool: Arc<DbPool>,
}

impl UserService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    pub async fn list_users(&self, filter: UserFilter) -> Result<Page<user::Model>, ServiceError> {
        let (page, limit) = page_bounds(filter.page, filter.limit);
        let mut condition = Condition::all();
        if let Some(role) = filter.role {
            condition = condition.add(user::Column::Role.eq(role));
        }
        if let Some(pattern) = like_pattern(filter.search.as_deref()) {
            condition = condition.add(
                Condition::any()
                    .add(Expr::expr(Func::lower(Expr::col(user::Column::Name))).like(pattern.clone()))
                    .add(user::Column::Email.like(pattern)),
            );
        }

        let paginator = user::Entity::find()
            .filter(condition)
            .order_by_asc(user::Column::Name)
            .paginate(&*self.db_pool, limit);
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page - 1).await?;
        Ok(Page {
            items,
            total,
            page,
            limit,
        })
    }

    pub async fn get_user(&self, user_id: Uuid) -> Result<user::Model, ServiceError> {
        user::Entity::find_by_id(user_id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::not_found("User", user_id))
    }

    async fn ensure_email_free(&self, email: &str, except: Option<Uuid>) -> Result<(), ServiceError> {
        let mut query = user::Entity::find().filter(user::Column::Email.eq(email));
        if let Some(id) = except {
            query = query.filter(user::Column::Id.ne(id));
        }
        if query.count(&*self.db_pool).await? > 0 {
            return Err(ServiceError::Conflict(format!("a user with email {} already exists", email)));
        }
        Ok(())
    }

    #[instrument(skip(self, request), fields(email = %request.email, role = %request.role))]
    pub async fn create_user(&self, request: CreateUserRequest) -> Result<user::Model, ServiceError> {
        request.validate()?;
        let email = staff_email(&request.email)?;
        self.ensure_email_free(&email, None).await?;

        let now = Utc::now();
        let created = user::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(request.name.trim().to_string()),
            email: Set(email),
            password_hash: Set(hash_password(&request.password)?),
            role: Set(request.role),
            active: Set(true),
            last_login_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db_pool)
        .await?;
        info!(user_id = %created.id, "user created");
        Ok(created)
    }

    #[instrument(skip(self, request), fields(user_id = %user_id))]
    pub async fn update_user(
        &self,
        user_id: Uuid,
        request: UpdateUserRequest,
    ) -> Result<user::Model, ServiceError> {
        request.validate()?;
        let current = self.get_user(user_id).await?;
        let mut active = current.into_active_model();

        if let Some(raw) = request.email.as_deref() {
            let email = staff_email(raw)?;
            self.ensure_email_free(&email, Some(user_id)).await?;
            active.email = Set(email);
        }
        if let Some(name) = request.name {
            active.name = Set(name.trim().to_string());
        }
        if let Some(password) = request.password.as_deref() {
            active.password_hash = Set(hash_password(password)?);
        }
        if let Some(role) = request.role {
            active.role = Set(role);
        }
        if let Some(flag) = request.active {
            active.active = Set(flag);
        }
        active.updated_at = Set(Utc::now());
        Ok(active.update(&*self.db_pool).await?)
    }

    /// Deletes a user along with their push subscriptions; their inquiries become unassigned
    #[instrument(skip(self), fields(user_id = %user_id, actor_id = %actor_id))]
    pub async fn delete_user(&self, actor_id: Uuid, user_id: Uuid) -> Result<(), ServiceError> {
        if actor_id == user_id {
            return Err(ServiceError::InvalidOperation("you cannot delete your own account".into()));
        }
        self.get_user(user_id).await?;

        let txn = self.db_pool.begin().await?;
        push_subscription::Entity::delete_many()
            .filter(push_subscription::Column::UserId.eq(user_id))
            .exec(&txn)
            .await?;
        inquiry::Entity::update_many()
            .col_expr(inquiry::Column::AssignedTo, Expr::value(Option::<Uuid>::None))
            .filter(inquiry::Column::AssignedTo.eq(user_id))
            .exec(&txn)
            .await?;
        user::Entity::delete_by_id(user_id).exec(&txn).await?;
        txn.commit().await?;

        info!("user deleted");
        Ok(())
    }
}
